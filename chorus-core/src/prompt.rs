//! Prompt builder for persona replies.
//!
//! A prompt is assembled in a fixed order:
//!
//! 1. persona role
//! 2. topic line with the stay-on-topic instruction
//! 3. numbered rule block (optional bluntness rule appended)
//! 4. memory digest, when the persona remembers anything
//! 5. the last `context_limit` turns as `[name]: text` lines, or `—`
//! 6. the quoted last utterance
//! 7. the reply cue naming the responding persona
//!
//! The instruction text is kept in Russian because the sanitizer only keeps
//! Cyrillic output by default.

use crate::config::DialogueConfig;
use crate::types::{ChatTurn, Persona};

/// Topic line.
pub const TOPIC_TEMPLATE: &str = "Тема: «{topic}». Не сворачивать.";

/// Four numbered behavioural rules.
pub const RULES_TEMPLATE: &str = "Правила: 1) Без markdown. 2) Не цитируй дословно. 3) Обратись к {last_speaker} по имени. 4) 1–2 предложения.";

/// Appended to the rules when mild bluntness is allowed.
pub const BLUNTNESS_RULE: &str = "Допускается мягкая грубость в адрес идеи.";

/// Memory line prefix.
pub const MEMORY_PREFIX: &str = "Память: ";

/// Context block header.
pub const CONTEXT_HEADER: &str = "Контекст:";

/// Shown in place of the context block when there is no history.
pub const EMPTY_CONTEXT: &str = "—";

/// Reply cue.
pub const REPLY_CUE_TEMPLATE: &str = "Ответ {agent}: ";

/// Appended to the original prompt on the forced retry.
pub const URGENT_TEMPLATE: &str = "СРОЧНО: Обратись к {last_speaker} по имени. Без цитат. Коротко.";

/// Simple template interpolation for prompts.
///
/// Replaces `{key}` with the corresponding value.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// Knobs that shape a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptSettings {
    /// Chat turns rendered into the context block.
    pub context_limit: usize,
    /// Memory notes in the digest.
    pub memory_summary_len: usize,
    /// Include [`BLUNTNESS_RULE`].
    pub allow_mild_profanity: bool,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self::from(&DialogueConfig::default())
    }
}

impl From<&DialogueConfig> for PromptSettings {
    fn from(config: &DialogueConfig) -> Self {
        Self {
            context_limit: config.context_limit,
            memory_summary_len: config.memory_summary_len,
            allow_mild_profanity: config.allow_mild_profanity,
        }
    }
}

/// Build the reply prompt for `persona`, answering `last_speaker`'s `last_text`.
#[must_use]
pub fn build_prompt(
    persona: &Persona,
    last_speaker: &str,
    last_text: &str,
    history: &[ChatTurn],
    topic: &str,
    settings: &PromptSettings,
) -> String {
    let mut prompt = String::with_capacity(512);

    prompt.push_str(&persona.role);
    prompt.push('\n');
    prompt.push_str(&render_template(TOPIC_TEMPLATE, &[("topic", topic)]));
    prompt.push('\n');
    prompt.push_str(&render_template(RULES_TEMPLATE, &[("last_speaker", last_speaker)]));
    prompt.push('\n');
    if settings.allow_mild_profanity {
        prompt.push_str(BLUNTNESS_RULE);
        prompt.push('\n');
    }

    let memory = persona.memory.digest(settings.memory_summary_len);
    prompt.push('\n');
    if !memory.is_empty() {
        prompt.push_str(MEMORY_PREFIX);
        prompt.push_str(&memory);
        prompt.push('\n');
    }

    prompt.push_str(CONTEXT_HEADER);
    prompt.push('\n');
    let context = render_context(history, settings.context_limit);
    if context.is_empty() {
        prompt.push_str(EMPTY_CONTEXT);
    } else {
        prompt.push_str(&context);
    }
    prompt.push_str("\n\n");

    prompt.push_str(&format!("{last_speaker}: \"{last_text}\"\n\n"));
    prompt.push_str(&render_template(
        REPLY_CUE_TEMPLATE,
        &[("agent", persona.name().trim())],
    ));
    prompt
}

/// Append the forced-retry instruction to an already built prompt.
#[must_use]
pub fn with_urgent_instruction(prompt: &str, last_speaker: &str) -> String {
    format!(
        "{prompt}\n\n{}",
        render_template(URGENT_TEMPLATE, &[("last_speaker", last_speaker)])
    )
}

/// The last `limit` turns as `[name]: text` lines.
#[must_use]
pub fn render_context(history: &[ChatTurn], limit: usize) -> String {
    let start = history.len().saturating_sub(limit);
    history[start..]
        .iter()
        .map(ChatTurn::context_line)
        .collect::<Vec<_>>()
        .join("\n")
}
