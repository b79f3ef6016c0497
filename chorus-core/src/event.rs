//! World events injected from outside the conversation.
//!
//! An operator can change the weather, set the time of day, post an
//! announcement, or pull one persona toward an emotion. Commands use the
//! `command=value` form:
//!
//! ```text
//! change_weather=sunny
//! set_time=вечер
//! announcement=Через час закрываемся
//! emotion=Ника:excited:0.8
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChorusError, Result};
use crate::mood::Emotion;
use crate::types::PersonaId;

/// Intensity used when an emotion command gives none.
pub const DEFAULT_INTENSITY: f32 = 0.5;

/// Commands accepted by [`WorldEvent::from_command`].
pub const COMMANDS: &[&str] = &["change_weather", "set_time", "announcement", "emotion"];

/// A mood change applied to every persona, with the reason logged alongside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodEffect {
    /// Added to each mood before clamping.
    pub delta: f32,
    /// Human-readable cause, stored in mood history.
    pub reason: &'static str,
}

/// Weather the world can be set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    /// +0.2
    Sunny,
    /// -0.1
    Rainy,
    /// -0.3
    Storm,
    /// +0.1
    Snow,
}

impl Weather {
    /// How this weather moves every persona's mood.
    #[must_use]
    pub fn effect(self) -> MoodEffect {
        match self {
            Self::Sunny => MoodEffect { delta: 0.2, reason: "солнечная погода" },
            Self::Rainy => MoodEffect { delta: -0.1, reason: "идёт дождь" },
            Self::Storm => MoodEffect { delta: -0.3, reason: "гроза" },
            Self::Snow => MoodEffect { delta: 0.1, reason: "снегопад" },
        }
    }

    /// Lower-case name used in commands and storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sunny => "sunny",
            Self::Rainy => "rainy",
            Self::Storm => "storm",
            Self::Snow => "snow",
        }
    }
}

impl fmt::Display for Weather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Weather {
    type Err = ChorusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sunny" => Ok(Self::Sunny),
            "rainy" => Ok(Self::Rainy),
            "storm" => Ok(Self::Storm),
            "snow" => Ok(Self::Snow),
            other => Err(ChorusError::Config(format!(
                "unknown weather '{other}', expected sunny, rainy, storm or snow"
            ))),
        }
    }
}

/// Something that happens to the world between turns.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    /// Every persona's mood moves by the weather's effect.
    Weather(Weather),
    /// Stored in world state; no mood effect.
    TimeOfDay(String),
    /// A system message every persona hears and remembers.
    Announcement(String),
    /// One persona's mood blends toward an emotion.
    Feeling {
        /// Who feels it.
        persona: PersonaId,
        /// What they feel.
        emotion: Emotion,
        /// Strength in [0, 1].
        intensity: f32,
    },
}

impl WorldEvent {
    /// Build an event from a command name and its argument.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Config`] for an unknown command, an empty value,
    /// an unknown weather or emotion, or an unparsable intensity.
    pub fn from_command(command: &str, value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ChorusError::Config(format!("'{command}' needs a value")));
        }

        match command.trim() {
            "change_weather" => value.parse().map(Self::Weather),
            "set_time" => Ok(Self::TimeOfDay(value.to_string())),
            "announcement" => Ok(Self::Announcement(value.to_string())),
            "emotion" => parse_feeling(value),
            other => Err(ChorusError::Config(format!(
                "unknown command '{other}', available: {}",
                COMMANDS.join(", ")
            ))),
        }
    }

    /// Command name of this event.
    #[must_use]
    pub fn command(&self) -> &'static str {
        match self {
            Self::Weather(_) => "change_weather",
            Self::TimeOfDay(_) => "set_time",
            Self::Announcement(_) => "announcement",
            Self::Feeling { .. } => "emotion",
        }
    }
}

/// `persona:emotion[:intensity]`
fn parse_feeling(value: &str) -> Result<WorldEvent> {
    let mut parts = value.split(':').map(str::trim);
    let (Some(persona), Some(emotion)) = (parts.next(), parts.next()) else {
        return Err(ChorusError::Config(format!(
            "emotion expects persona:emotion[:intensity], got '{value}'"
        )));
    };
    if persona.is_empty() {
        return Err(ChorusError::Config("emotion needs a persona name".into()));
    }

    let emotion: Emotion = emotion.parse().map_err(ChorusError::Config)?;
    let intensity = match parts.next() {
        Some(raw) => raw
            .parse::<f32>()
            .map_err(|e| ChorusError::Config(format!("bad intensity '{raw}': {e}")))?,
        None => DEFAULT_INTENSITY,
    };

    Ok(WorldEvent::Feeling {
        persona: PersonaId::new(persona),
        emotion,
        intensity: intensity.clamp(0.0, 1.0),
    })
}

impl FromStr for WorldEvent {
    type Err = ChorusError;

    /// Parse `command=value`.
    fn from_str(s: &str) -> Result<Self> {
        let (command, value) = s.split_once('=').ok_or_else(|| {
            ChorusError::Config(format!("expected command=value, got '{}'", s.trim()))
        })?;
        Self::from_command(command, value)
    }
}

impl fmt::Display for WorldEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weather(w) => write!(f, "change_weather={w}"),
            Self::TimeOfDay(t) => write!(f, "set_time={t}"),
            Self::Announcement(text) => write!(f, "announcement={text}"),
            Self::Feeling {
                persona,
                emotion,
                intensity,
            } => write!(f, "emotion={persona}:{emotion}:{intensity}"),
        }
    }
}
