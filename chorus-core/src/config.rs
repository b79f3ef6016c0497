//! Configuration for a chorus run.
//!
//! Maps directly to `chorus.toml`. Every field has a default, so an empty
//! file (or no file at all) gives the built-in four-persona salon.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ChorusError, Result};

/// Top-level chorus configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChorusConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Turn-taking and reply-policy settings.
    #[serde(default)]
    pub dialogue: DialogueConfig,
    /// Output sanitizer limits.
    #[serde(default)]
    pub sanitizer: SanitizerConfig,
    /// Model-call settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Relationship scoring settings.
    #[serde(default)]
    pub relationships: RelationshipConfig,
    /// Persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Relationship report output.
    #[serde(default)]
    pub report: ReportConfig,
    /// The cast.
    #[serde(default = "default_personas")]
    pub personas: Vec<PersonaConfig>,
    /// The opening line of the conversation.
    #[serde(default)]
    pub starter: StarterConfig,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            dialogue: DialogueConfig::default(),
            sanitizer: SanitizerConfig::default(),
            llm: LlmConfig::default(),
            relationships: RelationshipConfig::default(),
            persistence: PersistenceConfig::default(),
            report: ReportConfig::default(),
            personas: default_personas(),
            starter: StarterConfig::default(),
        }
    }
}

impl ChorusConfig {
    /// Load configuration from a TOML string and validate it.
    ///
    /// # Errors
    /// Returns `ChorusError::Config` if the TOML is invalid or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ChorusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    /// Returns `ChorusError::Config` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.personas.len() < 2 {
            return Err(ChorusError::Config(format!(
                "at least two personas are required, got {}",
                self.personas.len()
            )));
        }

        let mut seen = HashSet::new();
        for persona in &self.personas {
            if persona.name.trim().is_empty() {
                return Err(ChorusError::Config("persona name must not be empty".into()));
            }
            if !seen.insert(persona.name.as_str()) {
                return Err(ChorusError::Config(format!(
                    "duplicate persona name: '{}'",
                    persona.name
                )));
            }
        }

        if !seen.contains(self.starter.speaker.as_str()) {
            return Err(ChorusError::Config(format!(
                "starter speaker '{}' is not a persona",
                self.starter.speaker
            )));
        }
        if self.dialogue.snapshot_interval == 0 {
            return Err(ChorusError::Config("snapshot_interval must be > 0".into()));
        }
        if self.dialogue.memory_max == 0 {
            return Err(ChorusError::Config("memory_max must be > 0".into()));
        }
        if self.dialogue.chat_history_limit == 0 {
            return Err(ChorusError::Config("chat_history_limit must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.dialogue.duplicate_threshold) {
            return Err(ChorusError::Config(
                "duplicate_threshold must be within [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.relationships.initial_score) {
            return Err(ChorusError::Config(
                "initial relationship score must be within [0, 1]".into(),
            ));
        }
        if self.sanitizer.max_chars < 4 {
            return Err(ChorusError::Config("sanitizer.max_chars must be >= 4".into()));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines.
    #[serde(default)]
    pub log_json: bool,
    /// Fixed RNG seed for speaker selection; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            seed: None,
        }
    }
}

/// Turn-taking, memory, and reply-policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Chat turns rendered into the prompt.
    #[serde(default = "default_6")]
    pub context_limit: usize,
    /// Chat turns kept before the oldest is folded into memory.
    #[serde(default = "default_400")]
    pub chat_history_limit: usize,
    /// Notes kept per persona.
    #[serde(default = "default_80")]
    pub memory_max: usize,
    /// Notes included in the prompt digest.
    #[serde(default = "default_3")]
    pub memory_summary_len: usize,
    /// Pause before each turn, in milliseconds.
    #[serde(default = "default_3000")]
    pub turn_delay_ms: u64,
    /// Record a relationship snapshot every N turns.
    #[serde(default = "default_10")]
    pub snapshot_interval: u64,
    /// Permit mild bluntness toward ideas in the prompt rules.
    #[serde(default = "default_true")]
    pub allow_mild_profanity: bool,
    /// Topic of conversation.
    #[serde(default = "default_topic")]
    pub initial_topic: String,
    /// Recent turns compared against a candidate reply.
    #[serde(default = "default_6")]
    pub duplicate_window: usize,
    /// Similarity above which a reply counts as a duplicate.
    #[serde(default = "default_0_6")]
    pub duplicate_threshold: f32,
    /// Replies at or below this many characters are replaced.
    #[serde(default = "default_5")]
    pub min_reply_chars: usize,
    /// How many of the latest speakers are skipped when picking the next one.
    #[serde(default = "default_2")]
    pub recent_speaker_exclusion: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            context_limit: 6,
            chat_history_limit: 400,
            memory_max: 80,
            memory_summary_len: 3,
            turn_delay_ms: 3000,
            snapshot_interval: 10,
            allow_mild_profanity: true,
            initial_topic: default_topic(),
            duplicate_window: 6,
            duplicate_threshold: 0.6,
            min_reply_chars: 5,
            recent_speaker_exclusion: 2,
        }
    }
}

/// Sanitizer limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizerConfig {
    /// Hard cap on reply length in characters.
    #[serde(default = "default_300")]
    pub max_chars: usize,
    /// Sentences kept from the start of a reply.
    #[serde(default = "default_2")]
    pub max_sentences: usize,
    /// Keep ASCII Latin letters (dropped by default). Long runs mixing digits,
    /// underscores or slashes are still removed as noise.
    #[serde(default)]
    pub allow_latin: bool,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_chars: 300,
            max_sentences: 2,
            allow_latin: false,
        }
    }
}

/// Model-call configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "openai", "ollama", "none".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Base URL for the LLM API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key for OpenAI-compatible servers.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_0_65")]
    pub temperature: f32,
    /// Maximum tokens to generate.
    #[serde(default = "default_160")]
    pub max_tokens: u32,
    /// Frequency penalty.
    #[serde(default = "default_0_6")]
    pub frequency_penalty: f32,
    /// Presence penalty.
    #[serde(default = "default_0_6")]
    pub presence_penalty: f32,
    /// Stop sequences.
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
    /// Hard timeout for a model call in milliseconds.
    #[serde(default = "default_30000")]
    pub request_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: 0.65,
            max_tokens: 160,
            frequency_penalty: 0.6,
            presence_penalty: 0.6,
            stop: default_stop(),
            request_timeout_ms: 30_000,
        }
    }
}

/// Relationship scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipConfig {
    /// Starting score for every pair.
    #[serde(default = "default_0_5")]
    pub initial_score: f32,
    /// Applied when a negative keyword is present.
    #[serde(default = "default_negative_delta")]
    pub negative_delta: f32,
    /// Applied when a positive keyword is present.
    #[serde(default = "default_positive_delta")]
    pub positive_delta: f32,
    /// Lower-case substrings signalling hostility.
    #[serde(default = "default_negative_keywords")]
    pub negative_keywords: Vec<String>,
    /// Lower-case substrings signalling approval.
    #[serde(default = "default_positive_keywords")]
    pub positive_keywords: Vec<String>,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            initial_score: 0.5,
            negative_delta: -0.06,
            positive_delta: 0.04,
            negative_keywords: default_negative_keywords(),
            positive_keywords: default_positive_keywords(),
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Whether turns are written to SQLite at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Database file path.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Use WAL mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_db_path(),
            wal_mode: true,
        }
    }
}

/// Relationship report output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Where the snapshot series is written; `None` disables the report.
    #[serde(default = "default_report_path")]
    pub path: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: default_report_path(),
        }
    }
}

/// One persona of the cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Display name (also the persona's identity).
    pub name: String,
    /// Role / style description.
    pub role: String,
}

impl PersonaConfig {
    /// Create a persona entry.
    #[must_use]
    pub fn new(name: &str, role: &str) -> Self {
        Self {
            name: name.to_string(),
            role: role.to_string(),
        }
    }
}

/// The line that opens the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarterConfig {
    /// Persona who speaks first.
    #[serde(default = "default_starter_speaker")]
    pub speaker: String,
    /// What they say.
    #[serde(default = "default_starter_text")]
    pub text: String,
}

impl Default for StarterConfig {
    fn default() -> Self {
        Self {
            speaker: default_starter_speaker(),
            text: default_starter_text(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_topic() -> String { "информатика и IT".to_string() }
fn default_provider() -> String { "openai".to_string() }
fn default_base_url() -> String { "http://localhost:1234".to_string() }
fn default_model() -> String { "qwen2.5-14b-instruct".to_string() }
fn default_stop() -> Vec<String> { vec!["\n\n".to_string(), "[INST".to_string()] }
fn default_db_path() -> String { "virtual_world.db".to_string() }
fn default_report_path() -> Option<String> { Some("relationships.json".to_string()) }
fn default_starter_speaker() -> String { "Даша".to_string() }
fn default_starter_text() -> String {
    "Всем привет! У меня пионы — давайте обсудим, как цветы влияют на творчество.".to_string()
}
fn default_negative_keywords() -> Vec<String> {
    ["не соглас", "туп", "идиот", "дурак"].map(String::from).to_vec()
}
fn default_positive_keywords() -> Vec<String> {
    ["прав", "соглас", "молодец", "красиво", "хорошо"].map(String::from).to_vec()
}
fn default_personas() -> Vec<PersonaConfig> {
    vec![
        PersonaConfig::new("Даша", "флористка, тёплые метафоры с цветами, 1–2 предложения."),
        PersonaConfig::new("Кирилл", "шеф-повар, сарказм, кулинарные аналогии, 1–2 предложения."),
        PersonaConfig::new("Ника", "спортсменка, энергичная, короткие фразы, эмодзи уместны."),
        PersonaConfig::new("Дмитрий", "аспирант, научные метафоры, философичность, 1–2 предложения."),
    ]
}
fn default_negative_delta() -> f32 { -0.06 }
fn default_positive_delta() -> f32 { 0.04 }
fn default_0_5() -> f32 { 0.5 }
fn default_0_6() -> f32 { 0.6 }
fn default_0_65() -> f32 { 0.65 }
fn default_2() -> usize { 2 }
fn default_3() -> usize { 3 }
fn default_5() -> usize { 5 }
fn default_6() -> usize { 6 }
fn default_10() -> u64 { 10 }
fn default_80() -> usize { 80 }
fn default_160() -> u32 { 160 }
fn default_300() -> usize { 300 }
fn default_400() -> usize { 400 }
fn default_3000() -> u64 { 3000 }
fn default_30000() -> u64 { 30_000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = ChorusConfig::from_toml("").expect("parse");
        assert_eq!(config.personas.len(), 4);
        assert_eq!(config.dialogue.context_limit, 6);
        assert_eq!(config.sanitizer.max_chars, 300);
        assert_eq!(config.starter.speaker, "Даша");
        assert_eq!(config.llm.stop, vec!["\n\n".to_string(), "[INST".to_string()]);
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config = ChorusConfig::from_toml(
            r#"
            [dialogue]
            turn_delay_ms = 0
            snapshot_interval = 2

            [llm]
            provider = "ollama"
            base_url = "http://localhost:11434"
            "#,
        )
        .expect("parse");
        assert_eq!(config.dialogue.turn_delay_ms, 0);
        assert_eq!(config.dialogue.snapshot_interval, 2);
        assert_eq!(config.dialogue.memory_max, 80);
        assert_eq!(config.llm.provider, "ollama");
    }

    #[test]
    fn custom_cast_round_trips() {
        let config = ChorusConfig::from_toml(
            r#"
            [[personas]]
            name = "Анна"
            role = "поэт"

            [[personas]]
            name = "Борис"
            role = "инженер"

            [starter]
            speaker = "Борис"
            text = "Начнём."
            "#,
        )
        .expect("parse");
        assert_eq!(config.personas.len(), 2);
        assert_eq!(config.personas[1].name, "Борис");
    }

    #[test]
    fn rejects_single_persona() {
        let err = ChorusConfig::from_toml(
            r#"
            [[personas]]
            name = "Даша"
            role = "флористка"
            "#,
        );
        assert!(matches!(err, Err(ChorusError::Config(_))));
    }

    #[test]
    fn rejects_unknown_starter_and_duplicates() {
        let mut config = ChorusConfig::default();
        config.starter.speaker = "Никто".to_string();
        assert!(config.validate().is_err());

        let mut config = ChorusConfig::default();
        config.personas.push(config.personas[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_snapshot_interval() {
        let mut config = ChorusConfig::default();
        config.dialogue.snapshot_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_toml_is_config_error() {
        assert!(matches!(
            ChorusConfig::from_toml("[dialogue\n"),
            Err(ChorusError::Config(_))
        ));
    }
}
