//! Lexical similarity between two utterances.
//!
//! Jaccard ratio over the sets of lower-cased word tokens. Two empty inputs
//! score 0.0 so that blank text never counts as a duplicate.

use std::collections::HashSet;

/// Split `text` into lower-cased runs of word characters (letters, digits, `_`).
pub fn word_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !is_word_char(c))
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Whether `c` counts as part of a word token.
#[must_use]
pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Jaccard overlap of the word sets of `a` and `b`, in [0, 1].
#[must_use]
pub fn similarity(a: &str, b: &str) -> f32 {
    let wa: HashSet<String> = word_tokens(a).collect();
    let wb: HashSet<String> = word_tokens(b).collect();

    if wa.is_empty() && wb.is_empty() {
        return 0.0;
    }

    let intersection = wa.intersection(&wb).count();
    let union = wa.union(&wb).count().max(1);
    intersection as f32 / union as f32
}

/// Highest similarity of `candidate` against any of `others`, or 0.0 if none.
#[must_use]
pub fn max_similarity<'a>(candidate: &str, others: impl IntoIterator<Item = &'a str>) -> f32 {
    others
        .into_iter()
        .map(|other| similarity(candidate, other))
        .fold(0.0, f32::max)
}
