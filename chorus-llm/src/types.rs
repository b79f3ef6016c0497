//! Core types for LLM requests and responses.

use serde::{Deserialize, Serialize};

/// Sampling and transport options sent with every completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Stop sequences.
    pub stop: Vec<String>,
    /// Penalty for tokens already frequent in the output.
    pub frequency_penalty: f32,
    /// Penalty for tokens already present in the output.
    pub presence_penalty: f32,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.65,
            max_tokens: 160,
            stop: vec!["\n\n".to_string(), "[INST".to_string()],
            frequency_penalty: 0.6,
            presence_penalty: 0.6,
            timeout_ms: 30_000,
        }
    }
}

/// A request to the LLM.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// The prompt text, sent as a single user turn.
    pub prompt: String,
    /// Sampling options.
    pub options: GenerationOptions,
}

impl LlmRequest {
    /// A single-turn request with default options.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            options: GenerationOptions::default(),
        }
    }

    /// Replace the sampling options.
    #[must_use]
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.options.timeout_ms = timeout_ms;
        self
    }
}

/// A response from the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,
    /// How many tokens were generated.
    pub tokens_generated: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Which model was used.
    pub model: String,
}
