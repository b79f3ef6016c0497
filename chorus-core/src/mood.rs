//! Persona mood: a single valence value in [-1, 1] with a coarse label.
//!
//! Mood moves two ways:
//!   - `apply_delta` for small nudges (keyword sentiment of the persona's own
//!     lines, weather changes)
//!   - `blend_toward` for an explicit emotion, which only moves 20% of the way

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Weight kept from the current value when blending toward an emotion.
const BLEND_KEEP: f32 = 0.8;

/// Coarse mood label derived from a mood value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodLabel {
    /// value > 0.6
    Excited,
    /// value > 0.3
    Happy,
    /// value > 0.1
    Content,
    /// value > -0.1
    Neutral,
    /// value > -0.4
    Sad,
    /// value > -0.7
    Angry,
    /// Everything below.
    Miserable,
}

impl MoodLabel {
    /// Classify a mood value.
    #[must_use]
    pub fn from_value(value: f32) -> Self {
        if value > 0.6 {
            Self::Excited
        } else if value > 0.3 {
            Self::Happy
        } else if value > 0.1 {
            Self::Content
        } else if value > -0.1 {
            Self::Neutral
        } else if value > -0.4 {
            Self::Sad
        } else if value > -0.7 {
            Self::Angry
        } else {
            Self::Miserable
        }
    }

    /// Lower-case name used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excited => "excited",
            Self::Happy => "happy",
            Self::Content => "content",
            Self::Neutral => "neutral",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Miserable => "miserable",
        }
    }
}

impl fmt::Display for MoodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discrete emotion that can pull a mood toward it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    /// Mildly positive.
    Happy,
    /// Strongly positive.
    Excited,
    /// Slightly positive.
    Content,
    /// No pull.
    Neutral,
    /// Negative.
    Sad,
    /// Strongly negative.
    Angry,
    /// Negative.
    Scared,
    /// Slightly positive.
    Surprised,
    /// Slightly negative.
    Disgusted,
}

impl Emotion {
    /// Base valence of this emotion at full intensity.
    #[must_use]
    pub fn base_value(self) -> f32 {
        match self {
            Self::Happy => 0.5,
            Self::Excited => 0.8,
            Self::Content => 0.3,
            Self::Neutral => 0.0,
            Self::Sad => -0.4,
            Self::Angry => -0.6,
            Self::Scared => -0.5,
            Self::Surprised => 0.2,
            Self::Disgusted => -0.3,
        }
    }

    /// Valence scaled by `intensity` (clamped to [0, 1]), result in [-1, 1].
    #[must_use]
    pub fn value(self, intensity: f32) -> f32 {
        (self.base_value() * intensity.clamp(0.0, 1.0)).clamp(-1.0, 1.0)
    }

    /// Lower-case name used in commands and mood history.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Excited => "excited",
            Self::Content => "content",
            Self::Neutral => "neutral",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Scared => "scared",
            Self::Surprised => "surprised",
            Self::Disgusted => "disgusted",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "happy" => Ok(Self::Happy),
            "excited" => Ok(Self::Excited),
            "content" => Ok(Self::Content),
            "neutral" => Ok(Self::Neutral),
            "sad" => Ok(Self::Sad),
            "angry" => Ok(Self::Angry),
            "scared" => Ok(Self::Scared),
            "surprised" => Ok(Self::Surprised),
            "disgusted" => Ok(Self::Disgusted),
            _ => Err(format!("unknown emotion: '{s}'")),
        }
    }
}

/// Mood value of one persona.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Mood {
    value: f32,
}

impl Mood {
    /// Create a mood, clamping `value` to [-1, 1].
    #[must_use]
    pub fn new(value: f32) -> Self {
        Self {
            value: value.clamp(-1.0, 1.0),
        }
    }

    /// Current value in [-1, 1].
    #[must_use]
    pub fn value(self) -> f32 {
        self.value
    }

    /// Current label.
    #[must_use]
    pub fn label(self) -> MoodLabel {
        MoodLabel::from_value(self.value)
    }

    /// Add `delta` and clamp. Returns the new value.
    pub fn apply_delta(&mut self, delta: f32) -> f32 {
        self.value = (self.value + delta).clamp(-1.0, 1.0);
        self.value
    }

    /// Move 20% of the way toward `emotion` at `intensity`. Returns the new value.
    pub fn blend_toward(&mut self, emotion: Emotion, intensity: f32) -> f32 {
        let target = emotion.value(intensity);
        self.value = (self.value * BLEND_KEEP + target * (1.0 - BLEND_KEEP)).clamp(-1.0, 1.0);
        self.value
    }
}
