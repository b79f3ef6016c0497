//! Pairwise affinity between personas.
//!
//! Every ordered pair `(a, b)` with `a != b` holds a score in [0, 1], starting
//! at the configured initial score. Updates are symmetric: writing `(a, b)`
//! writes the same clamped value to `(b, a)`.
//!
//! Sentiment is a keyword heuristic over the speaker's own line:
//!   - any negative keyword present → `negative_delta`
//!   - any positive keyword present → `positive_delta`
//!
//! Both checks are independent, so "не согласен" fires both.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RelationshipConfig;
use crate::types::PersonaId;

/// Full score table: `scores[a][b]` is how `a` and `b` get along.
pub type ScoreTable = BTreeMap<PersonaId, BTreeMap<PersonaId, f32>>;

/// Keyword lists and deltas used to score an utterance.
#[derive(Debug, Clone)]
pub struct SentimentLexicon {
    negative: Vec<String>,
    positive: Vec<String>,
    negative_delta: f32,
    positive_delta: f32,
}

impl SentimentLexicon {
    /// Build from configuration. Keywords are lower-cased.
    #[must_use]
    pub fn new(config: &RelationshipConfig) -> Self {
        Self {
            negative: config.negative_keywords.iter().map(|k| k.to_lowercase()).collect(),
            positive: config.positive_keywords.iter().map(|k| k.to_lowercase()).collect(),
            negative_delta: config.negative_delta,
            positive_delta: config.positive_delta,
        }
    }

    /// Net sentiment delta of `text`.
    #[must_use]
    pub fn score(&self, text: &str) -> f32 {
        let t = text.to_lowercase();
        let mut delta = 0.0;
        if self.negative.iter().any(|k| t.contains(k.as_str())) {
            delta += self.negative_delta;
        }
        if self.positive.iter().any(|k| t.contains(k.as_str())) {
            delta += self.positive_delta;
        }
        delta
    }
}

impl Default for SentimentLexicon {
    fn default() -> Self {
        Self::new(&RelationshipConfig::default())
    }
}

/// An immutable copy of the score table at one point in the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSnapshot {
    /// Turn count when the snapshot was taken.
    pub turn: u64,
    /// Wall-clock time of the snapshot.
    pub taken_at: DateTime<Utc>,
    /// The scores.
    pub scores: ScoreTable,
}

impl RelationshipSnapshot {
    /// Score of `(a, b)` in this snapshot, if present.
    #[must_use]
    pub fn get(&self, a: &PersonaId, b: &PersonaId) -> Option<f32> {
        self.scores.get(a).and_then(|row| row.get(b)).copied()
    }
}

/// Result of one relationship update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelationshipChange {
    /// Score before the update.
    pub before: f32,
    /// Score after the update (written to both directions).
    pub after: f32,
    /// Sentiment delta that was applied.
    pub delta: f32,
}

/// Symmetric bounded affinity table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipTable {
    scores: ScoreTable,
}

impl RelationshipTable {
    /// Initialise every ordered pair of `personas` to `initial`.
    #[must_use]
    pub fn new<'a>(personas: impl IntoIterator<Item = &'a PersonaId> + Clone, initial: f32) -> Self {
        let initial = initial.clamp(0.0, 1.0);
        let mut scores = ScoreTable::new();
        for a in personas.clone() {
            let row = scores.entry(a.clone()).or_default();
            for b in personas.clone() {
                if a != b {
                    row.insert(b.clone(), initial);
                }
            }
        }
        Self { scores }
    }

    /// Rebuild from a stored table.
    #[must_use]
    pub fn from_scores(scores: ScoreTable) -> Self {
        Self { scores }
    }

    /// Current score of `(a, b)`.
    #[must_use]
    pub fn get(&self, a: &PersonaId, b: &PersonaId) -> Option<f32> {
        self.scores.get(a).and_then(|row| row.get(b)).copied()
    }

    /// Nudge `(speaker, target)` by the sentiment of `text`.
    ///
    /// Returns `None` when the pair is unknown or `speaker == target`.
    pub fn update(
        &mut self,
        speaker: &PersonaId,
        target: &PersonaId,
        text: &str,
        lexicon: &SentimentLexicon,
    ) -> Option<RelationshipChange> {
        let delta = lexicon.score(text);
        self.apply_delta(speaker, target, delta)
    }

    /// Add `delta` to `(a, b)`, clamp, and mirror the result to `(b, a)`.
    pub fn apply_delta(
        &mut self,
        a: &PersonaId,
        b: &PersonaId,
        delta: f32,
    ) -> Option<RelationshipChange> {
        if a == b {
            return None;
        }
        let before = self.get(a, b)?;
        self.get(b, a)?;

        let after = (before + delta).clamp(0.0, 1.0);
        if let Some(v) = self.scores.get_mut(a).and_then(|row| row.get_mut(b)) {
            *v = after;
        }
        if let Some(v) = self.scores.get_mut(b).and_then(|row| row.get_mut(a)) {
            *v = after;
        }

        if delta.abs() > f32::EPSILON {
            debug!(a = %a, b = %b, before, after, delta, "Relationship updated");
        }
        Some(RelationshipChange { before, after, delta })
    }

    /// Deep copy of the score table, stamped with `turn`.
    #[must_use]
    pub fn snapshot(&self, turn: u64) -> RelationshipSnapshot {
        RelationshipSnapshot {
            turn,
            taken_at: Utc::now(),
            scores: self.scores.clone(),
        }
    }

    /// Unordered pairs `(a, b)` with `a < b`, sorted.
    #[must_use]
    pub fn pairs(&self) -> Vec<(PersonaId, PersonaId)> {
        self.scores
            .iter()
            .flat_map(|(a, row)| {
                row.keys()
                    .filter(move |b| a < *b)
                    .map(move |b| (a.clone(), b.clone()))
            })
            .collect()
    }

    /// Borrow the raw table.
    #[must_use]
    pub fn scores(&self) -> &ScoreTable {
        &self.scores
    }
}
