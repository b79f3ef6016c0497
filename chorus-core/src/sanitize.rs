//! Text sanitizer. Turns raw model output into a bounded, well-formed line.
//!
//! The pipeline is a fixed sequence of pure steps:
//!
//! ```text
//! raw ─► strip "Speaker:" echo ─► drop noise and long tokens ─► drop control chars
//!     ─► repair table ─► spacing rules ─► collapse whitespace
//!     ─► allow-list filter ─► collapse ─► strip echo again
//!     ─► keep first N sentences ─► terminal punctuation ─► length cap
//! ```
//!
//! Noise, repair and spacing rules are data tables compiled once into a
//! [`Sanitizer`]; each table can be tested on its own.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::config::SanitizerConfig;

/// Returned whenever nothing usable survives sanitization.
pub const PLACEHOLDER: &str = "...";

/// Marker appended when a line is cut to the length cap.
pub const ELLIPSIS: &str = "...";

/// Characters that may follow a speaker's own name in an echoed prefix.
const NAME_SEPARATORS: &[char] = &[',', ':', '-', '—', '–'];

/// Sentence-final punctuation.
const TERMINALS: &[char] = &['.', '!', '?'];

/// Model artifacts removed before anything else (case-insensitive).
pub const NOISE_PATTERNS: &[&str] = &[
    r"\[/?INST\]",
    r"\[INST\b",
    r"\bim_start\b",
    r"\bim_end\b",
    r"<\|endoftext\|>",
    r"(^|\s)limburg(\s|$)",
];

/// Long ASCII runs (identifiers, paths, hashes). Removed after the noise
/// patterns; a plain Latin word survives when Latin is allowed.
pub const LONG_TOKEN_PATTERN: &str = r"\b[A-Za-z0-9_/\\]{6,}\b";

/// Whole-word typo repairs (case-insensitive), applied in order.
pub const REPAIRS: &[(&str, &str)] = &[
    ("почемужу", "почему же"),
    ("почемуж", "почему же"),
    ("почемуто", "почему-то"),
    ("чёта", "что-то"),
    ("чё", "что"),
    ("че", "что"),
    ("нормалньо", "нормально"),
    ("вобщем", "в общем"),
    ("отвлечтония", "отвлечения"),
    ("творчтоство", "творчество"),
];

/// Spacing fixes for merged sentences, applied in order.
pub const SPACING_RULES: &[(&str, &str)] = &[
    // "теста?Продолжение" -> "теста? Продолжение"
    (r"([а-яёА-ЯЁ])\?([а-яёА-ЯЁ])", "${1}? ${2}"),
    // punctuation glued to the next word
    (r"([,.!?:;])([\p{L}«(])", "${1} ${2}"),
];

/// Punctuation and symbols that survive the allow-list filter.
const ALLOWED_SYMBOLS: &str = ".,!?:;—–()-\"'«»…%€$@/+";

static DEFAULT_SANITIZER: LazyLock<Sanitizer> = LazyLock::new(Sanitizer::default);

/// Sanitize with the default configuration.
///
/// See [`Sanitizer::sanitize`].
#[must_use]
pub fn sanitize(raw: &str, speaker: &str) -> String {
    DEFAULT_SANITIZER.sanitize(raw, speaker)
}

/// One compiled find/replace rule.
#[derive(Debug, Clone)]
pub struct Rule {
    regex: Regex,
    replacement: String,
}

impl Rule {
    /// Compile `pattern` (optionally case-insensitive).
    ///
    /// # Errors
    /// Returns the regex compile error for an invalid pattern.
    pub fn new(
        pattern: &str,
        replacement: impl Into<String>,
        case_insensitive: bool,
    ) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Self {
            regex,
            replacement: replacement.into(),
        })
    }

    /// Apply the rule to every match in `text`.
    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        self.regex
            .replace_all(text, self.replacement.as_str())
            .into_owned()
    }

    /// Like [`Rule::apply`], but matches for which `keep` holds are left as is.
    #[must_use]
    pub fn apply_unless(&self, text: &str, keep: impl Fn(&str) -> bool) -> String {
        self.regex
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let matched = &caps[0];
                if keep(matched) {
                    matched.to_string()
                } else {
                    self.replacement.clone()
                }
            })
            .into_owned()
    }
}

/// Compile a rule table, skipping (and logging) patterns that fail to compile.
fn compile_rules<'a>(
    table: impl IntoIterator<Item = (String, &'a str)>,
    case_insensitive: bool,
) -> Vec<Rule> {
    table
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            match Rule::new(&pattern, replacement, case_insensitive) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Invalid sanitizer pattern skipped");
                    None
                }
            }
        })
        .collect()
}

/// Compiled sanitizer pipeline.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    noise: Vec<Rule>,
    long_token: Option<Rule>,
    repairs: Vec<Rule>,
    spacing: Vec<Rule>,
    config: SanitizerConfig,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(SanitizerConfig::default())
    }
}

impl Sanitizer {
    /// Compile the built-in rule tables.
    #[must_use]
    pub fn new(config: SanitizerConfig) -> Self {
        let noise = compile_rules(NOISE_PATTERNS.iter().map(|p| ((*p).to_string(), " ")), true);
        let long_token = compile_rules([(LONG_TOKEN_PATTERN.to_string(), " ")], false)
            .into_iter()
            .next();
        let repairs = compile_rules(
            REPAIRS
                .iter()
                .map(|(bad, good)| (format!(r"\b{}\b", regex::escape(bad)), *good)),
            true,
        );
        let spacing = compile_rules(
            SPACING_RULES.iter().map(|(p, r)| ((*p).to_string(), *r)),
            false,
        );

        Self {
            noise,
            long_token,
            repairs,
            spacing,
            config,
        }
    }

    /// Settings this sanitizer was built with.
    #[must_use]
    pub fn config(&self) -> &SanitizerConfig {
        &self.config
    }

    /// Clean `raw` model output produced on behalf of `speaker`.
    ///
    /// The result is never empty, always ends in `.`, `!` or `?` (or the
    /// ellipsis marker), holds at most `max_sentences` sentences and at most
    /// `max_chars` characters.
    #[must_use]
    pub fn sanitize(&self, raw: &str, speaker: &str) -> String {
        if raw.trim().is_empty() {
            return PLACEHOLDER.to_string();
        }

        let text = strip_speaker_prefix(raw.trim(), speaker);
        let text = self.fix_common_errors(text);
        let text = normalize_spaces(&self.filter_allowed(&text));
        // noise removal can uncover another echo of the name
        let text = strip_speaker_prefix(&text, speaker);

        let sentences = split_sentences(&text);
        if sentences.is_empty() {
            return PLACEHOLDER.to_string();
        }

        let mut out = sentences
            .into_iter()
            .take(self.config.max_sentences.max(1))
            .collect::<Vec<_>>()
            .join(" ");

        if !out.ends_with(TERMINALS) {
            out.push('.');
        }

        truncate_chars(&out, self.config.max_chars)
    }

    /// Noise removal, repair table and spacing rules, followed by whitespace collapse.
    #[must_use]
    pub fn fix_common_errors(&self, text: &str) -> String {
        let mut t = text.to_string();
        for rule in &self.noise {
            t = rule.apply(&t);
        }
        if let Some(rule) = &self.long_token {
            let allow_latin = self.config.allow_latin;
            t = rule.apply_unless(&t, |token| {
                allow_latin && token.chars().all(|c| c.is_ascii_alphabetic())
            });
        }
        t = replace_control_chars(&t);
        for rule in &self.repairs {
            t = rule.apply(&t);
        }
        for rule in &self.spacing {
            t = rule.apply(&t);
        }
        normalize_spaces(&t)
    }

    /// Replace every character outside the allow-list with a space.
    #[must_use]
    pub fn filter_allowed(&self, text: &str) -> String {
        text.chars()
            .map(|c| if self.is_allowed(c) { c } else { ' ' })
            .collect()
    }

    fn is_allowed(&self, c: char) -> bool {
        is_cyrillic(c)
            || c.is_ascii_digit()
            || c.is_whitespace()
            || ALLOWED_SYMBOLS.contains(c)
            || (self.config.allow_latin && c.is_ascii_alphabetic())
    }
}

/// `А-Я`, `а-я`, `Ё`, `ё`.
fn is_cyrillic(c: char) -> bool {
    matches!(c, 'А'..='я' | 'Ё' | 'ё')
}

/// Collapse whitespace runs to single spaces and trim.
#[must_use]
pub fn normalize_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn replace_control_chars(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_control() { ' ' } else { c })
        .collect()
}

/// Remove leading echoes of the speaker's own name (`"Даша: ..."`,
/// `"даша, Даша ..."`), repeating until none is left.
///
/// The name must be followed by a separator, whitespace, or the end of text,
/// so a longer word that merely starts with the name is left alone.
#[must_use]
pub fn strip_speaker_prefix<'a>(text: &'a str, speaker: &str) -> &'a str {
    if speaker.is_empty() {
        return text;
    }

    let mut text = text;
    loop {
        let rest = strip_name_once(text, speaker);
        if rest.len() == text.len() {
            return text;
        }
        text = rest;
    }
}

fn strip_name_once<'a>(text: &'a str, speaker: &str) -> &'a str {
    let mut chars = text.char_indices();
    let mut end = 0;
    for expected in speaker.chars() {
        match chars.next() {
            Some((i, actual)) if eq_ignore_case(actual, expected) => end = i + actual.len_utf8(),
            _ => return text,
        }
    }

    let tail = &text[end..];
    let rest = tail.trim_start_matches(|c: char| c.is_whitespace() || NAME_SEPARATORS.contains(&c));
    if !tail.is_empty() && rest.len() == tail.len() {
        return text;
    }
    rest
}

fn eq_ignore_case(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

/// Split single-spaced text into sentences at whitespace following `.`, `!` or `?`.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for word in text.split_whitespace() {
        current.push(word);
        if word.ends_with(TERMINALS) {
            sentences.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        sentences.push(current.join(" "));
    }

    sentences.retain(|s| !s.trim().is_empty());
    sentences
}

/// Cut `text` to at most `max_chars` characters, ending with [`ELLIPSIS`].
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.chars().count());
    let head: String = text.chars().take(keep).collect();
    format!("{}{ELLIPSIS}", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_placeholder() {
        assert_eq!(sanitize("", "Даша"), PLACEHOLDER);
        assert_eq!(sanitize("   \n\t", "Даша"), PLACEHOLDER);
    }

    #[test]
    fn only_disallowed_chars_yield_placeholder() {
        assert_eq!(sanitize("hello world 🌸", "Даша"), PLACEHOLDER);
    }

    #[test]
    fn end_to_end_example() {
        let out = sanitize("ПРИВЕТ, im_start это тест    теста?Продолжение", "ПРИВЕТ");
        assert_eq!(out, "это тест теста? Продолжение.");
    }

    #[test]
    fn strips_echoed_speaker_name() {
        assert_eq!(strip_speaker_prefix("Кирилл: соус готов", "Кирилл"), "соус готов");
        assert_eq!(strip_speaker_prefix("кирилл — соус", "Кирилл"), "соус");
        assert_eq!(strip_speaker_prefix("Кириллица тут", "Кирилл"), "Кириллица тут");
        assert_eq!(strip_speaker_prefix("Ника, привет", "Кирилл"), "Ника, привет");
        assert_eq!(strip_speaker_prefix("Кирилл", "Кирилл"), "");
        assert_eq!(strip_speaker_prefix("Кирилл: кирилл, соус", "Кирилл"), "соус");
    }

    #[test]
    fn repeated_self_address_is_fully_removed() {
        let once = sanitize("Ника, Ника тоже бегает.", "Ника");
        assert_eq!(once, "тоже бегает.");
        assert_eq!(sanitize(&once, "Ника"), once);

        let behind_noise = sanitize("[INST] Ника: привет всем", "Ника");
        assert_eq!(behind_noise, "привет всем.");
    }

    #[test]
    fn removes_model_control_tokens() {
        let s = Sanitizer::default();
        let out = s.fix_common_errors("[INST] привет <|endoftext|> мир im_end");
        assert_eq!(out, "привет мир");
    }

    #[test]
    fn removes_long_path_like_tokens() {
        let s = Sanitizer::default();
        assert_eq!(s.fix_common_errors("смотри src/main_rs тут"), "смотри тут");
    }

    #[test]
    fn repairs_are_whole_word_and_case_insensitive() {
        let s = Sanitizer::default();
        assert_eq!(s.fix_common_errors("Вобщем чё делать"), "в общем что делать");
        assert_eq!(s.fix_common_errors("человек"), "человек");
        assert_eq!(s.fix_common_errors("почемуто грустно"), "почему-то грустно");
    }

    #[test]
    fn spacing_after_punctuation() {
        let s = Sanitizer::default();
        assert_eq!(s.fix_common_errors("да,конечно.Идём"), "да, конечно. Идём");
        assert_eq!(s.fix_common_errors("ну...ладно"), "ну... ладно");
        assert_eq!(s.fix_common_errors("число 3.14"), "число 3.14");
    }

    #[test]
    fn keeps_at_most_two_sentences() {
        let out = sanitize("Раз. Два! Три? Четыре.", "Ника");
        assert_eq!(out, "Раз. Два!");
    }

    #[test]
    fn appends_terminal_period() {
        assert_eq!(sanitize("без точки", "Ника"), "без точки.");
        assert_eq!(sanitize("вопрос?", "Ника"), "вопрос?");
    }

    #[test]
    fn latin_is_dropped_unless_allowed() {
        assert_eq!(sanitize("Привет hi там", "Ника"), "Привет там.");
        let s = Sanitizer::new(SanitizerConfig {
            allow_latin: true,
            ..SanitizerConfig::default()
        });
        assert_eq!(s.sanitize("Привет hi там", "Ника"), "Привет hi там.");
    }

    #[test]
    fn allowed_latin_keeps_long_words_but_not_paths() {
        let s = Sanitizer::new(SanitizerConfig {
            allow_latin: true,
            ..SanitizerConfig::default()
        });
        assert_eq!(s.sanitize("Привет computer там", "Ника"), "Привет computer там.");
        assert_eq!(s.sanitize("смотри src/main_rs тут", "Ника"), "смотри тут.");
        assert_eq!(s.sanitize("ключ abc123def тут", "Ника"), "ключ тут.");
        assert_eq!(sanitize("Привет computer там", "Ника"), "Привет там.");
    }

    #[test]
    fn long_output_is_truncated() {
        let long = "слово ".repeat(100);
        let out = sanitize(&long, "Дмитрий");
        assert!(out.chars().count() <= 300);
        assert!(out.ends_with(ELLIPSIS));
    }

    #[test]
    fn truncate_chars_counts_characters_not_bytes() {
        let text = "я".repeat(10);
        let out = truncate_chars(&text, 8);
        assert_eq!(out, format!("{}...", "я".repeat(5)));
    }

    #[test]
    fn idempotent_on_clean_input() {
        for raw in [
            "Даша, цветы тут ни при чём. Главное код!",
            "Кирилл, поясни мысль конкретнее.",
            "это тест теста? Продолжение.",
            "Ника, Ника тоже бегает.",
            "Ника: [INST] Ника, ты как?",
            &"длинная фраза ".repeat(40),
        ] {
            let once = sanitize(raw, "Ника");
            assert_eq!(sanitize(&once, "Ника"), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn split_sentences_on_terminal_whitespace() {
        assert_eq!(
            split_sentences("один. два! три"),
            vec!["один.".to_string(), "два!".to_string(), "три".to_string()]
        );
        assert!(split_sentences("").is_empty());
    }
}
