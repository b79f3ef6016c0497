//! Reply validation and the single forced retry.
//!
//! Every turn goes through the same small state machine over the model call:
//!
//! ```text
//! Initial ──sanitize──► names addressee? ──yes──────────────┐
//!                            │ no                            │
//!                            ▼                               ▼
//!                      ForcedRetry ──sanitize──► duplicate check ──► length guard ──► Reply
//! ```
//!
//! The forced retry is terminal: its output is accepted whether or not it names
//! the addressee. Model errors never escape; each one becomes the sanitizer
//! placeholder and flows through the same checks as any other text.

use chorus_core::config::DialogueConfig;
use chorus_core::prompt::{render_template, with_urgent_instruction};
use chorus_core::sanitize::{Sanitizer, PLACEHOLDER};
use chorus_core::similarity::{is_word_char, max_similarity};
use chorus_core::types::ChatTurn;
use chorus_llm::{Generate, LlmError};
use tracing::{debug, warn};

/// Substituted when a reply repeats recent context.
pub const DUPLICATE_FALLBACK: &str = "{addressee}, идея интересна, но давай копнём глубже.";

/// Substituted when a reply is too short to be useful.
pub const SHORT_FALLBACK: &str = "{addressee}, поясни мысль конкретнее.";

/// Addressee used when there is nobody to answer.
pub const NOBODY: &str = "Никто";

/// Which stage produced the accepted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// First model call.
    Initial,
    /// The one re-prompt with the urgent instruction.
    ForcedRetry,
}

/// Why the model text was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Too similar to a recent turn.
    Duplicate,
    /// At most `min_reply_chars` characters.
    TooShort,
}

/// The validated utterance of one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Final text, never empty.
    pub text: String,
    /// Stage whose output was post-processed.
    pub attempt: Attempt,
    /// Set when the text is a canned fallback.
    pub fallback: Option<Fallback>,
    /// Model calls issued (1 or 2).
    pub model_calls: u8,
    /// Model calls that returned an error.
    pub model_errors: u8,
}

impl Reply {
    /// Whether the forced retry ran.
    #[must_use]
    pub fn retried(&self) -> bool {
        self.attempt == Attempt::ForcedRetry
    }
}

/// Thresholds for the post-processing checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatorSettings {
    /// How many recent turns a reply is compared against.
    pub duplicate_window: usize,
    /// Similarity strictly above this counts as a duplicate.
    pub duplicate_threshold: f32,
    /// Replies with at most this many characters are replaced.
    pub min_reply_chars: usize,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self::from(&DialogueConfig::default())
    }
}

impl From<&DialogueConfig> for ValidatorSettings {
    fn from(config: &DialogueConfig) -> Self {
        Self {
            duplicate_window: config.duplicate_window,
            duplicate_threshold: config.duplicate_threshold,
            min_reply_chars: config.min_reply_chars,
        }
    }
}

/// Turns raw model output into a usable line of dialogue.
#[derive(Debug, Clone, Default)]
pub struct ResponseValidator {
    sanitizer: Sanitizer,
    settings: ValidatorSettings,
}

impl ResponseValidator {
    /// Create a validator.
    #[must_use]
    pub fn new(sanitizer: Sanitizer, settings: ValidatorSettings) -> Self {
        Self { sanitizer, settings }
    }

    /// The sanitizer applied to every model output.
    #[must_use]
    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Produce `speaker`'s reply to `addressee` for an already built `prompt`.
    ///
    /// `recent` is the chat history before this turn; only its tail is used
    /// for the duplicate check. Issues one model call, or two when the first
    /// output does not name the addressee.
    pub async fn produce<G: Generate>(
        &self,
        generator: &G,
        speaker: &str,
        addressee: &str,
        prompt: &str,
        recent: &[ChatTurn],
    ) -> Reply {
        let mut model_errors = 0;

        let first = generator.generate_text(prompt).await;
        model_errors += u8::from(first.is_err());
        let mut text = self.clean(first, speaker);
        let mut attempt = Attempt::Initial;
        let mut model_calls = 1;

        if !names_addressee(&text, addressee) {
            debug!(speaker, addressee, "Reply does not name addressee, forcing retry");
            let retry_prompt = with_urgent_instruction(prompt, addressee);
            let second = generator.generate_text(&retry_prompt).await;
            model_errors += u8::from(second.is_err());
            text = self.clean(second, speaker);
            attempt = Attempt::ForcedRetry;
            model_calls = 2;
        }

        let (text, fallback) = self.finalize(text, addressee, recent);
        Reply {
            text,
            attempt,
            fallback,
            model_calls,
            model_errors,
        }
    }

    /// Sanitize a model result; an error becomes the placeholder.
    #[must_use]
    pub fn clean(&self, result: Result<String, LlmError>, speaker: &str) -> String {
        match result {
            Ok(raw) => self.sanitizer.sanitize(&raw, speaker),
            Err(e) => {
                warn!(speaker, error = %e, "Model call failed, using placeholder");
                PLACEHOLDER.to_string()
            }
        }
    }

    /// Duplicate check then length guard.
    #[must_use]
    pub fn finalize(
        &self,
        text: String,
        addressee: &str,
        recent: &[ChatTurn],
    ) -> (String, Option<Fallback>) {
        let window = &recent[recent.len().saturating_sub(self.settings.duplicate_window)..];
        let score = max_similarity(&text, window.iter().map(|t| t.text.as_str()));

        let (text, mut fallback) = if score > self.settings.duplicate_threshold {
            debug!(score, addressee, "Reply repeats recent context");
            (
                render_template(DUPLICATE_FALLBACK, &[("addressee", addressee)]),
                Some(Fallback::Duplicate),
            )
        } else {
            (text, None)
        };

        if text.chars().count() <= self.settings.min_reply_chars {
            fallback = Some(Fallback::TooShort);
            return (render_template(SHORT_FALLBACK, &[("addressee", addressee)]), fallback);
        }
        (text, fallback)
    }
}

/// Whether `name` appears as a standalone word token of `text` (case-sensitive).
#[must_use]
pub fn names_addressee(text: &str, name: &str) -> bool {
    !name.is_empty() && text.split(|c: char| !is_word_char(c)).any(|token| token == name)
}
