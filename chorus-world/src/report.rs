//! Relationship reports.
//!
//! The turn loop hands the snapshot list to a [`ReportSink`] after every
//! periodic snapshot and once more on shutdown. The JSON sink writes one
//! series per unordered pair so an external tool can chart it:
//!
//! ```json
//! { "pairs": [["Даша", "Кирилл"], ...],
//!   "series": { "Даша-Кирилл": [0.5, 0.54, ...] },
//!   "snapshots": 2 }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chorus_core::error::{ChorusError, Result};
use chorus_core::relationship::RelationshipSnapshot;
use chorus_core::types::PersonaId;
use serde::Serialize;
use tracing::debug;

/// Receives the time-ordered snapshot list.
pub trait ReportSink {
    /// Write out `history`, oldest snapshot first.
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be written.
    fn flush(&self, history: &[RelationshipSnapshot]) -> Result<()>;
}

/// Per-pair score series across snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipReport {
    /// Unordered pairs, `a < b`, sorted.
    pub pairs: Vec<(PersonaId, PersonaId)>,
    /// `"A-B"` → one score per snapshot.
    pub series: BTreeMap<String, Vec<f32>>,
    /// Number of snapshots.
    pub snapshots: usize,
}

impl RelationshipReport {
    /// Build from `history`; pairs missing from a snapshot read as `default`.
    #[must_use]
    pub fn build(history: &[RelationshipSnapshot], default: f32) -> Self {
        let pairs: Vec<(PersonaId, PersonaId)> = history
            .iter()
            .flat_map(|snap| {
                snap.scores.iter().flat_map(|(a, row)| {
                    row.keys()
                        .filter(move |b| a < *b)
                        .map(move |b| (a.clone(), b.clone()))
                })
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let series = pairs
            .iter()
            .map(|(a, b)| {
                let values = history
                    .iter()
                    .map(|snap| snap.get(a, b).unwrap_or(default))
                    .collect();
                (format!("{a}-{b}"), values)
            })
            .collect();

        Self {
            pairs,
            series,
            snapshots: history.len(),
        }
    }
}

/// Writes a [`RelationshipReport`] as pretty JSON, replacing the file each flush.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    path: PathBuf,
    default_score: f32,
}

impl JsonReportSink {
    /// Sink writing to `path`; missing scores read as `default_score`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, default_score: f32) -> Self {
        Self {
            path: path.into(),
            default_score,
        }
    }

    /// Output path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonReportSink {
    fn flush(&self, history: &[RelationshipSnapshot]) -> Result<()> {
        let report = RelationshipReport::build(history, self.default_score);
        let json = serde_json::to_vec_pretty(&report)
            .map_err(|e| ChorusError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        debug!(
            path = %self.path.display(),
            snapshots = report.snapshots,
            pairs = report.pairs.len(),
            "Relationship report written"
        );
        Ok(())
    }
}
