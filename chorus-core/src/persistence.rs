//! SQLite persistence for the virtual world.
//!
//! One database file holds everything a run produces:
//!
//! ```sql
//! personas       (name PK, role, memory JSON, mood, mood_label, updated_at)
//! messages       (id UUID PK, speaker, content, emotion JSON, is_user,
//!                 is_system, room_id, related, created_at)
//! relationships  (persona, related, strength, last_interaction, UNIQUE pair)
//! mood_history   (id, persona, mood, delta, reason, created_at)
//! world_state    (key PK, value, updated_at)
//! ```
//!
//! - WAL mode so a viewer can read while the loop writes.
//! - Memory logs are stored as JSON text, which keeps the schema stable when
//!   the note format changes.
//! - Timestamps are RFC 3339 strings in UTC.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PersistenceConfig;
use crate::error::{ChorusError, Result};
use crate::memory::MemoryLog;
use crate::mood::{Mood, MoodLabel};
use crate::relationship::ScoreTable;
use crate::types::{ChatTurn, Persona, PersonaId};

/// Room every persona message is posted to.
pub const MAIN_ROOM: &str = "main-hall";

/// World-state key holding the conversation topic.
pub const TOPIC_KEY: &str = "topic";

/// World-state key holding the current weather.
pub const WEATHER_KEY: &str = "weather";

/// World-state key holding the time of day.
pub const TIME_OF_DAY_KEY: &str = "time_of_day";

/// Speaker recorded on announcements, which no persona posts.
pub const SYSTEM_SPEAKER: &str = "Система";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS personas (
        name        TEXT PRIMARY KEY,
        role        TEXT NOT NULL,
        memory      TEXT NOT NULL,
        mood        REAL NOT NULL DEFAULT 0,
        mood_label  TEXT NOT NULL DEFAULT 'neutral',
        updated_at  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS messages (
        id          TEXT PRIMARY KEY,
        speaker     TEXT NOT NULL,
        content     TEXT NOT NULL,
        emotion     TEXT,
        is_user     INTEGER NOT NULL DEFAULT 0,
        is_system   INTEGER NOT NULL DEFAULT 0,
        room_id     TEXT NOT NULL DEFAULT 'main-hall',
        related     TEXT,
        created_at  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS relationships (
        persona           TEXT NOT NULL,
        related           TEXT NOT NULL,
        strength          REAL NOT NULL,
        last_interaction  TEXT NOT NULL,
        UNIQUE(persona, related)
    );
    CREATE TABLE IF NOT EXISTS mood_history (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        persona     TEXT NOT NULL,
        mood        REAL NOT NULL,
        delta       REAL NOT NULL,
        reason      TEXT,
        created_at  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS world_state (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_speaker ON messages(speaker);
    CREATE INDEX IF NOT EXISTS idx_mood_persona ON mood_history(persona, id DESC);
    CREATE INDEX IF NOT EXISTS idx_relationships_persona ON relationships(persona);
";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Speaker mood attached to a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MessageEmotion {
    /// Mood value at the time of the message.
    pub mood: f32,
    /// Label of that value.
    pub label: MoodLabel,
}

impl From<Mood> for MessageEmotion {
    fn from(mood: Mood) -> Self {
        Self {
            mood: mood.value(),
            label: mood.label(),
        }
    }
}

/// A message as written to and read from the `messages` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Unique message ID.
    pub id: Uuid,
    /// Who said it.
    pub speaker: PersonaId,
    /// Sanitized text.
    pub content: String,
    /// Speaker mood snapshot.
    pub emotion: Option<MessageEmotion>,
    /// Posted by a human rather than a persona.
    pub is_user: bool,
    /// Posted by the system (e.g. the opening line).
    pub is_system: bool,
    /// Room the message belongs to.
    pub room_id: String,
    /// The persona being addressed, if any.
    pub related: Option<PersonaId>,
    /// When it was stored.
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// A persona message in the main room, stamped now.
    #[must_use]
    pub fn from_turn(turn: &ChatTurn, related: Option<&PersonaId>, mood: Option<Mood>) -> Self {
        Self {
            id: Uuid::new_v4(),
            speaker: turn.speaker.clone(),
            content: turn.text.clone(),
            emotion: mood.map(MessageEmotion::from),
            is_user: false,
            is_system: false,
            room_id: MAIN_ROOM.to_string(),
            related: related.cloned(),
            created_at: Utc::now(),
        }
    }

    /// An operator announcement in the main room, stamped now.
    #[must_use]
    pub fn announcement(text: &str) -> Self {
        Self::from_turn(&ChatTurn::new(SYSTEM_SPEAKER, text), None, None).system()
    }

    /// Mark as a system message.
    #[must_use]
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    /// Back to a plain chat turn.
    #[must_use]
    pub fn to_turn(&self) -> ChatTurn {
        ChatTurn::new(self.speaker.clone(), self.content.clone())
    }
}

/// One row of the `mood_history` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    /// Whose mood.
    pub persona: PersonaId,
    /// Value after the change.
    pub mood: f32,
    /// Size of the change.
    pub delta: f32,
    /// Why it changed.
    pub reason: Option<String>,
    /// When it changed.
    pub created_at: DateTime<Utc>,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ChorusError::Serialization(format!("bad timestamp '{raw}': {e}")))
}

// ---------------------------------------------------------------------------
// WorldStore
// ---------------------------------------------------------------------------

/// Handle to an open SQLite database holding personas, messages,
/// relationships, mood history and world state.
///
/// ```no_run
/// # use chorus_core::persistence::WorldStore;
/// # use chorus_core::config::PersistenceConfig;
/// # use chorus_core::types::Persona;
/// let store = WorldStore::open("virtual_world.db", &PersistenceConfig::default())?;
/// store.upsert_persona(&Persona::new("Даша", "художница", 80))?;
/// let loaded = store.load_persona("Даша")?;
/// # Ok::<(), chorus_core::error::ChorusError>(())
/// ```
pub struct WorldStore {
    conn: Connection,
    db_path: PathBuf,
}

impl std::fmt::Debug for WorldStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl WorldStore {
    /// Open (or create) a database at `path` and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "World store opened"
        );

        Ok(Self { conn, db_path })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the database file (or `:memory:`).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ------------------------------------------------------------------
    // Personas
    // ------------------------------------------------------------------

    /// Insert or replace a persona, including its memory log and mood.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Serialization`] if the memory log cannot be
    /// encoded, or [`ChorusError::Database`] on SQLite failures.
    pub fn upsert_persona(&self, persona: &Persona) -> Result<()> {
        let start = Instant::now();
        let memory = serde_json::to_string(&persona.memory)
            .map_err(|e| ChorusError::Serialization(e.to_string()))?;

        self.conn.execute(
            "INSERT INTO personas (name, role, memory, mood, mood_label, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                role = excluded.role,
                memory = excluded.memory,
                mood = excluded.mood,
                mood_label = excluded.mood_label,
                updated_at = excluded.updated_at",
            params![
                persona.name(),
                persona.role,
                memory,
                f64::from(persona.mood.value()),
                persona.mood.label().as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        debug!(
            persona = %persona.id,
            notes = persona.memory.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved persona"
        );
        Ok(())
    }

    /// Load a persona by name. Returns `None` if it was never stored.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Serialization`] if the stored memory log is
    /// malformed, or [`ChorusError::Database`] on SQLite failures.
    pub fn load_persona(&self, name: &str) -> Result<Option<Persona>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT role, memory, mood FROM personas WHERE name = ?1")?;

        let row: Option<(String, String, f64)> = stmt
            .query_row(params![name], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .optional()?;

        let Some((role, memory, mood)) = row else {
            return Ok(None);
        };

        let memory: MemoryLog =
            serde_json::from_str(&memory).map_err(|e| ChorusError::Serialization(e.to_string()))?;

        #[allow(clippy::cast_possible_truncation)]
        let mood = Mood::new(mood as f32);

        Ok(Some(Persona {
            id: PersonaId::new(name),
            role,
            memory,
            mood,
        }))
    }

    /// Names of all stored personas, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn list_personas(&self) -> Result<Vec<PersonaId>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name FROM personas ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(PersonaId::new(row?));
        }
        Ok(names)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append a message.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Serialization`] if the emotion cannot be
    /// encoded, or [`ChorusError::Database`] on SQLite failures.
    pub fn append_message(&self, message: &StoredMessage) -> Result<()> {
        let emotion = message
            .emotion
            .map(|e| serde_json::to_string(&e))
            .transpose()
            .map_err(|e| ChorusError::Serialization(e.to_string()))?;

        self.conn.execute(
            "INSERT INTO messages
                (id, speaker, content, emotion, is_user, is_system, room_id, related, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                message.speaker.as_str(),
                message.content,
                emotion,
                message.is_user,
                message.is_system,
                message.room_id,
                message.related.as_ref().map(PersonaId::as_str),
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// The latest `limit` messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Serialization`] on malformed rows, or
    /// [`ChorusError::Database`] on SQLite failures.
    pub fn recent_messages(&self, limit: usize) -> Result<Vec<StoredMessage>> {
        type RawMessage = (
            String,
            String,
            String,
            Option<String>,
            bool,
            bool,
            String,
            Option<String>,
            String,
        );

        let mut stmt = self.conn.prepare_cached(
            "SELECT id, speaker, content, emotion, is_user, is_system, room_id, related, created_at
             FROM messages ORDER BY rowid DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            Ok::<RawMessage, rusqlite::Error>((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, speaker, content, emotion, is_user, is_system, room_id, related, created_at) =
                row?;
            let id = Uuid::parse_str(&id)
                .map_err(|e| ChorusError::Serialization(format!("bad message id '{id}': {e}")))?;
            let emotion = match emotion {
                Some(raw) => match serde_json::from_str(&raw) {
                    Ok(e) => Some(e),
                    Err(e) => {
                        warn!(message = %id, error = %e, "Ignoring malformed emotion");
                        None
                    }
                },
                None => None,
            };
            messages.push(StoredMessage {
                id,
                speaker: PersonaId::new(speaker),
                content,
                emotion,
                is_user,
                is_system,
                room_id,
                related: related.map(PersonaId::new),
                created_at: parse_timestamp(&created_at)?,
            });
        }
        messages.reverse();
        Ok(messages)
    }

    /// Total number of stored messages.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn message_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    /// Insert or update the strength of `(persona, related)`.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn upsert_relationship(
        &self,
        persona: &PersonaId,
        related: &PersonaId,
        strength: f32,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO relationships (persona, related, strength, last_interaction)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(persona, related) DO UPDATE SET
                strength = excluded.strength,
                last_interaction = excluded.last_interaction",
            params![
                persona.as_str(),
                related.as_str(),
                f64::from(strength),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Every stored relationship as a score table.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn load_relationships(&self) -> Result<ScoreTable> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT persona, related, strength FROM relationships")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;

        let mut table = ScoreTable::new();
        for row in rows {
            let (persona, related, strength) = row?;
            #[allow(clippy::cast_possible_truncation)]
            let strength = strength as f32;
            table
                .entry(PersonaId::new(persona))
                .or_default()
                .insert(PersonaId::new(related), strength);
        }
        Ok(table)
    }

    // ------------------------------------------------------------------
    // Mood history
    // ------------------------------------------------------------------

    /// Record a mood change.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn append_mood(&self, entry: &MoodEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO mood_history (persona, mood, delta, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.persona.as_str(),
                f64::from(entry.mood),
                f64::from(entry.delta),
                entry.reason,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// The latest `limit` mood changes of `persona`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Serialization`] on malformed timestamps, or
    /// [`ChorusError::Database`] on SQLite failures.
    pub fn mood_history(&self, persona: &PersonaId, limit: usize) -> Result<Vec<MoodEntry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT mood, delta, reason, created_at FROM mood_history
             WHERE persona = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![persona.as_str(), limit], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (mood, delta, reason, created_at) = row?;
            #[allow(clippy::cast_possible_truncation)]
            entries.push(MoodEntry {
                persona: persona.clone(),
                mood: mood as f32,
                delta: delta as f32,
                reason,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // World state
    // ------------------------------------------------------------------

    /// Set a world-state value.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn set_world_state(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO world_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Read a world-state value.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn get_world_state(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM world_state WHERE key = ?1")?;
        let value = stmt
            .query_row(params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }
}

/// Extension trait that adds an `.optional()` combinator to `rusqlite::Result`.
///
/// Converts `Err(QueryReturnedNoRows)` into `Ok(None)`.
trait OptionalExt<T> {
    /// Convert `QueryReturnedNoRows` into `Ok(None)`.
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
