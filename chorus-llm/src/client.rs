//! LLM Client: unified interface for OpenAI-compatible servers and Ollama.

use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::types::{GenerationOptions, LlmRequest, LlmResponse};

/// Provider backend for LLM inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    /// OpenAI-compatible chat completions (LM Studio, vLLM, llama.cpp server, OpenAI).
    OpenAiCompatible {
        /// Server root, without the `/v1` suffix.
        base_url: String,
        /// Bearer token, if the server wants one.
        api_key: Option<String>,
    },
    /// Ollama running locally.
    Ollama {
        /// Server root.
        base_url: String,
    },
    /// No LLM available. Every call fails and the caller falls back.
    None,
}

impl LlmProvider {
    /// Build a provider from its config name (`"openai"`, `"ollama"`, `"none"`).
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] for an unknown provider name.
    pub fn from_name(
        name: &str,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, LlmError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        match name.to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" | "lmstudio" => {
                Ok(Self::OpenAiCompatible { base_url, api_key })
            }
            "ollama" => Ok(Self::Ollama { base_url }),
            "none" => Ok(Self::None),
            other => Err(LlmError::ConfigError(format!(
                "unknown LLM provider '{other}' (expected openai, ollama or none)"
            ))),
        }
    }
}

/// The main LLM client that routes requests to the configured backend.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
    options: GenerationOptions,
    max_retries: u32,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a new LLM client.
    ///
    /// `options` are used for requests built by [`crate::Generate::generate_text`].
    #[must_use]
    pub fn new(
        provider: LlmProvider,
        model: impl Into<String>,
        options: GenerationOptions,
        max_retries: u32,
    ) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            options,
            max_retries,
        }
    }

    /// Create a client with no LLM backend (all calls fail).
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, String::new(), GenerationOptions::default(), 0)
    }

    /// Default options for prompts sent through [`crate::Generate`].
    #[must_use]
    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Model name sent with every request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a response from the LLM.
    ///
    /// Returns `Err` if the LLM is unavailable or all retries fail.
    /// The caller decides what to say instead.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        match &self.provider {
            LlmProvider::None => Err(LlmError::Unavailable("No LLM provider configured".into())),
            LlmProvider::Ollama { base_url } => self.generate_ollama(base_url, request).await,
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                self.generate_openai(base_url, api_key.as_deref(), request)
                    .await
            }
        }
    }

    /// Generate using Ollama's API.
    async fn generate_ollama(
        &self,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{base_url}/api/generate");
        let opts = &request.options;
        let body = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": opts.temperature,
                "num_predict": opts.max_tokens,
                "frequency_penalty": opts.frequency_penalty,
                "presence_penalty": opts.presence_penalty,
                "stop": opts.stop,
            }
        });

        let (json, latency_ms) = self
            .with_retries("ollama", opts.timeout_ms, || self.http.post(&url).json(&body))
            .await?;
        let text = extract_ollama_text(&json)
            .ok_or_else(|| LlmError::ParseError("no 'response' field".into()))?;

        debug!(latency_ms, model = %self.model, "Ollama completion");
        Ok(LlmResponse {
            text,
            tokens_generated: token_count(&json["eval_count"]),
            latency_ms,
            model: self.model.clone(),
        })
    }

    /// Generate using an OpenAI-compatible chat completions API.
    ///
    /// The prompt goes out as a single user message.
    async fn generate_openai(
        &self,
        base_url: &str,
        api_key: Option<&str>,
        request: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{base_url}/v1/chat/completions");
        let opts = &request.options;
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": opts.max_tokens,
            "temperature": opts.temperature,
            "frequency_penalty": opts.frequency_penalty,
            "presence_penalty": opts.presence_penalty,
            "stop": opts.stop,
        });

        let (json, latency_ms) = self
            .with_retries("openai", opts.timeout_ms, || {
                let builder = self.http.post(&url).json(&body);
                match api_key {
                    Some(key) => builder.bearer_auth(key),
                    None => builder,
                }
            })
            .await?;
        let text = extract_openai_text(&json)
            .ok_or_else(|| LlmError::ParseError("no completion text in choices".into()))?;

        debug!(latency_ms, model = %self.model, "OpenAI completion");
        Ok(LlmResponse {
            text,
            tokens_generated: token_count(&json["usage"]["completion_tokens"]),
            latency_ms,
            model: self.model.clone(),
        })
    }

    /// Send the request built by `build` up to `max_retries + 1` times.
    ///
    /// Transport and HTTP status failures are retried; a body that is not
    /// JSON fails at once. Returns the decoded body and the latency of the
    /// successful attempt.
    async fn with_retries(
        &self,
        backend: &'static str,
        timeout_ms: u64,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<(Value, u64), LlmError> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(backend, attempt = attempt + 1, max = self.max_retries + 1, "Retrying LLM call");
            }

            let start = Instant::now();
            match send_json(build().timeout(Duration::from_millis(timeout_ms))).await {
                Ok(json) => return Ok((json, elapsed_ms(start))),
                Err(err @ LlmError::ParseError(_)) => return Err(err),
                Err(LlmError::Timeout(_)) => {
                    last_error = LlmError::Timeout(timeout_ms).to_string();
                    warn!(backend, timeout_ms, "LLM request timed out");
                }
                Err(err) => {
                    last_error = err.to_string();
                    warn!(backend, error = %last_error, "LLM request failed");
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    /// Check if the LLM client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }
}

/// Completion text from an OpenAI-style body.
///
/// Chat servers answer with `choices[0].message.content`; some completion
/// endpoints use `choices[0].text` or a top-level `text`.
#[must_use]
pub fn extract_openai_text(body: &Value) -> Option<String> {
    let choice = &body["choices"][0];
    choice["message"]["content"]
        .as_str()
        .or_else(|| choice["text"].as_str())
        .or_else(|| body["text"].as_str())
        .map(str::to_string)
}

/// Completion text from an Ollama `/api/generate` body.
#[must_use]
pub fn extract_ollama_text(body: &Value) -> Option<String> {
    body["response"].as_str().map(str::to_string)
}

/// One attempt: send, reject non-success statuses, decode the JSON body.
async fn send_json(builder: RequestBuilder) -> Result<Value, LlmError> {
    let resp = builder.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let detail = resp.text().await.unwrap_or_default();
        return Err(LlmError::RequestFailed(format!("HTTP {status}: {detail}")));
    }
    Ok(resp.json().await?)
}

fn token_count(value: &Value) -> u32 {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
