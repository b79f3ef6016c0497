//! # Chorus Core Library
//!
//! Synchronous dialogue core for a room of scripted chat personas.
//!
//! A turn flows through a fixed pipeline:
//!
//! - **Prompt**: role, topic, rules, memory digest, recent context, reply cue
//! - **Sanitize**: strip model artifacts, repair typos, bound the length
//! - **Similarity**: word-set overlap used to reject repeated replies
//! - **Memory**: bounded per-persona note log with adjacent dedup
//! - **Relationships**: symmetric keyword-driven affinity in [0, 1]
//! - **Mood**: per-persona valence in [-1, 1]
//!
//! Between turns an operator can inject [`event::WorldEvent`]s: weather that
//! moves every mood, the time of day, announcements, and emotion pulls.
//!
//! Nothing in this crate performs I/O except [`persistence`], which owns the
//! SQLite file. Model calls and the turn loop live in `chorus-world`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod mood;
pub mod persistence;
pub mod prompt;
pub mod relationship;
pub mod sanitize;
pub mod similarity;
pub mod types;

pub use config::ChorusConfig;
pub use error::ChorusError;
pub use event::{Weather, WorldEvent};
pub use memory::MemoryLog;
pub use mood::{Emotion, Mood, MoodLabel};
pub use relationship::{RelationshipSnapshot, RelationshipTable, SentimentLexicon};
pub use sanitize::Sanitizer;
pub use types::*;
