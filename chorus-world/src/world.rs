//! The world a conversation happens in.
//!
//! [`WorldState`] owns everything the turn loop mutates: the cast, the bounded
//! chat history, the relationship table, the last-speaker ring and the
//! snapshot list. No component keeps its own copy; the loop lends the state
//! out by reference.
//!
//! Outside events (weather, time of day, announcements, emotion pulls) enter
//! through [`WorldState::apply_event`] between turns.

use std::collections::VecDeque;

use chorus_core::config::ChorusConfig;
use chorus_core::error::{ChorusError, Result};
use chorus_core::event::{Weather, WorldEvent};
use chorus_core::relationship::{
    RelationshipChange, RelationshipSnapshot, RelationshipTable, SentimentLexicon,
};
use chorus_core::types::{ChatTurn, Persona, PersonaId};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::dialogue::NOBODY;

/// Minimum number of recent speakers remembered for turn-taking. The ring
/// grows to `recent_speaker_exclusion` when that is larger.
pub const LAST_SPEAKERS_KEPT: usize = 3;

/// Prefix of the note every persona gets when a turn leaves the history.
pub const EARLIER_PREFIX: &str = "Ранее: ";

/// Prefix of the note every persona gets when an announcement is made.
pub const ANNOUNCEMENT_PREFIX: &str = "Объявление: ";

/// Limits the world enforces on itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldSettings {
    /// Max turns kept in the chat history.
    pub chat_history_limit: usize,
    /// A snapshot is taken every this many turns.
    pub snapshot_interval: u64,
    /// The last this many speakers may not speak next.
    pub recent_speaker_exclusion: usize,
}

impl From<&ChorusConfig> for WorldSettings {
    fn from(config: &ChorusConfig) -> Self {
        Self {
            chat_history_limit: config.dialogue.chat_history_limit,
            snapshot_interval: config.dialogue.snapshot_interval,
            recent_speaker_exclusion: config.dialogue.recent_speaker_exclusion,
        }
    }
}

/// Mood movement of the speaker on one turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodChange {
    /// Value before.
    pub before: f32,
    /// Value after.
    pub after: f32,
    /// Sentiment delta applied.
    pub delta: f32,
}

/// Mood movement of one persona caused by a world event.
#[derive(Debug, Clone, PartialEq)]
pub struct MoodShift {
    /// Whose mood moved.
    pub persona: PersonaId,
    /// Value before.
    pub before: f32,
    /// Value after.
    pub after: f32,
    /// Why, as stored in mood history.
    pub reason: String,
}

impl MoodShift {
    /// Actual change after clamping.
    #[must_use]
    pub fn delta(&self) -> f32 {
        self.after - self.before
    }
}

/// What [`WorldState::apply_event`] changed.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// The event applied.
    pub event: WorldEvent,
    /// Moods it moved, in cast order.
    pub shifts: Vec<MoodShift>,
    /// Whether every persona's memory got a note.
    pub memories_changed: bool,
}

/// What [`WorldState::record_turn`] changed.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRecord {
    /// Turn number, starting at 1.
    pub turn: u64,
    /// Who the relationship update was attributed to.
    pub target: Option<PersonaId>,
    /// Relationship update toward `target`.
    pub relationship: Option<RelationshipChange>,
    /// Speaker mood nudge, if the line carried sentiment.
    pub mood: Option<MoodChange>,
    /// Turn that fell out of the history.
    pub evicted: Option<ChatTurn>,
    /// Whether a periodic snapshot was appended.
    pub snapshot_taken: bool,
}

/// All mutable state of one conversation.
#[derive(Debug, Clone)]
pub struct WorldState {
    personas: Vec<Persona>,
    history: Vec<ChatTurn>,
    relationships: RelationshipTable,
    snapshots: Vec<RelationshipSnapshot>,
    last_speakers: VecDeque<PersonaId>,
    lexicon: SentimentLexicon,
    settings: WorldSettings,
    topic: String,
    weather: Option<Weather>,
    time_of_day: Option<String>,
    turn: u64,
}

impl WorldState {
    /// Build the cast and tables from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Config`] if the configuration is invalid.
    pub fn from_config(config: &ChorusConfig) -> Result<Self> {
        config.validate()?;

        let personas: Vec<Persona> = config
            .personas
            .iter()
            .map(|p| Persona::new(p.name.as_str(), p.role.as_str(), config.dialogue.memory_max))
            .collect();
        let ids: Vec<PersonaId> = personas.iter().map(|p| p.id.clone()).collect();

        info!(
            personas = personas.len(),
            topic = %config.dialogue.initial_topic,
            "World created"
        );

        Ok(Self {
            relationships: RelationshipTable::new(&ids, config.relationships.initial_score),
            personas,
            history: Vec::new(),
            snapshots: Vec::new(),
            last_speakers: VecDeque::with_capacity(
                LAST_SPEAKERS_KEPT.max(config.dialogue.recent_speaker_exclusion) + 1,
            ),
            lexicon: SentimentLexicon::new(&config.relationships),
            settings: WorldSettings::from(config),
            topic: config.dialogue.initial_topic.clone(),
            weather: None,
            time_of_day: None,
            turn: 0,
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The cast, in configuration order.
    #[must_use]
    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    /// Look up a persona.
    #[must_use]
    pub fn persona(&self, id: &PersonaId) -> Option<&Persona> {
        self.personas.iter().find(|p| &p.id == id)
    }

    fn persona_mut(&mut self, id: &PersonaId) -> Result<&mut Persona> {
        self.personas
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| ChorusError::UnknownPersona(id.to_string()))
    }

    /// Chat history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Speaker and text of the latest turn, or ("Никто", "") before any turn.
    #[must_use]
    pub fn last_turn(&self) -> (&str, &str) {
        self.history
            .last()
            .map_or((NOBODY, ""), |t| (t.speaker.as_str(), t.text.as_str()))
    }

    /// Current relationship table.
    #[must_use]
    pub fn relationships(&self) -> &RelationshipTable {
        &self.relationships
    }

    /// Snapshots taken so far, oldest first.
    #[must_use]
    pub fn snapshots(&self) -> &[RelationshipSnapshot] {
        &self.snapshots
    }

    /// Most recent speakers, oldest first.
    pub fn last_speakers(&self) -> impl Iterator<Item = &PersonaId> {
        self.last_speakers.iter()
    }

    /// Conversation topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Change the conversation topic.
    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.topic = topic.into();
        info!(topic = %self.topic, "Topic changed");
    }

    /// Current weather, if it was ever set.
    #[must_use]
    pub fn weather(&self) -> Option<Weather> {
        self.weather
    }

    /// Current time of day, if it was ever set.
    #[must_use]
    pub fn time_of_day(&self) -> Option<&str> {
        self.time_of_day.as_deref()
    }

    /// Turns recorded so far (the opening line does not count).
    #[must_use]
    pub fn turn(&self) -> u64 {
        self.turn
    }

    // ------------------------------------------------------------------
    // Turn-taking
    // ------------------------------------------------------------------

    /// Pick the next speaker at random, excluding the most recent speakers.
    ///
    /// Falls back to excluding only the very last speaker when the exclusion
    /// would leave nobody.
    pub fn choose_speaker<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<PersonaId> {
        let excluded = self
            .last_speakers
            .len()
            .saturating_sub(self.settings.recent_speaker_exclusion);
        let recent: Vec<&PersonaId> = self.last_speakers.iter().skip(excluded).collect();

        let mut available: Vec<&PersonaId> = self
            .personas
            .iter()
            .map(|p| &p.id)
            .filter(|id| !recent.contains(id))
            .collect();

        if available.is_empty() {
            let last = self.last_speakers.back();
            available = self
                .personas
                .iter()
                .map(|p| &p.id)
                .filter(|id| Some(*id) != last)
                .collect();
        }

        available.choose(rng).map(|id| (*id).clone())
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    /// Post the opening line. The speaker remembers it verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::UnknownPersona`] if the speaker is not in the cast.
    pub fn seed(&mut self, opening: ChatTurn) -> Result<()> {
        self.persona_mut(&opening.speaker)?.memory.remember(&opening.text);
        self.push_speaker(opening.speaker.clone());
        self.history.push(opening);
        Ok(())
    }

    /// Apply every side effect of a finished turn.
    ///
    /// In order: speaker memory note, history append with eviction folded
    /// into every persona's memory, relationship update toward the previous
    /// speaker, speaker mood nudge, last-speaker ring, periodic snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::UnknownPersona`] if the speaker is not in the cast.
    pub fn record_turn(&mut self, turn: ChatTurn) -> Result<TurnRecord> {
        let speaker = turn.speaker.clone();
        let note = format!("{speaker}: {}", turn.text);
        self.persona_mut(&speaker)?.memory.remember(&note);

        let text = turn.text.clone();
        self.history.push(turn);
        let evicted = if self.history.len() > self.settings.chat_history_limit {
            let removed = self.history.remove(0);
            let earlier = format!("{EARLIER_PREFIX}{}: {}", removed.speaker, removed.text);
            for persona in &mut self.personas {
                persona.memory.remember(&earlier);
            }
            Some(removed)
        } else {
            None
        };

        let target = self.last_speakers.back().cloned();
        let relationship = target
            .as_ref()
            .and_then(|t| self.relationships.update(&speaker, t, &text, &self.lexicon));

        let delta = self.lexicon.score(&text);
        let mood = if delta.abs() > f32::EPSILON {
            let persona = self.persona_mut(&speaker)?;
            let before = persona.mood.value();
            let after = persona.mood.apply_delta(delta);
            Some(MoodChange { before, after, delta })
        } else {
            None
        };

        self.push_speaker(speaker.clone());
        self.turn += 1;

        let snapshot_taken = self.turn % self.settings.snapshot_interval == 0;
        if snapshot_taken {
            self.take_snapshot();
        }

        debug!(
            turn = self.turn,
            speaker = %speaker,
            target = ?target,
            evicted = evicted.is_some(),
            "Turn recorded"
        );

        Ok(TurnRecord {
            turn: self.turn,
            target,
            relationship,
            mood,
            evicted,
            snapshot_taken,
        })
    }

    /// Apply an outside event.
    ///
    /// - weather moves every persona's mood by its fixed effect
    /// - the time of day is only stored
    /// - an announcement becomes a memory note for every persona
    /// - an emotion blends one persona's mood 20% of the way toward it
    ///
    /// Events never touch the chat history, relationships or turn counter.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::UnknownPersona`] if an emotion names someone
    /// outside the cast.
    pub fn apply_event(&mut self, event: &WorldEvent) -> Result<EventRecord> {
        let mut shifts = Vec::new();
        let mut memories_changed = false;

        match event {
            WorldEvent::Weather(weather) => {
                let effect = weather.effect();
                for persona in &mut self.personas {
                    let before = persona.mood.value();
                    let after = persona.mood.apply_delta(effect.delta);
                    shifts.push(MoodShift {
                        persona: persona.id.clone(),
                        before,
                        after,
                        reason: effect.reason.to_string(),
                    });
                }
                self.weather = Some(*weather);
            }
            WorldEvent::TimeOfDay(time) => {
                self.time_of_day = Some(time.clone());
            }
            WorldEvent::Announcement(text) => {
                let note = format!("{ANNOUNCEMENT_PREFIX}{text}");
                for persona in &mut self.personas {
                    persona.memory.remember(&note);
                }
                memories_changed = true;
            }
            WorldEvent::Feeling {
                persona,
                emotion,
                intensity,
            } => {
                let target = self.persona_mut(persona)?;
                let before = target.mood.value();
                let after = target.mood.blend_toward(*emotion, *intensity);
                shifts.push(MoodShift {
                    persona: persona.clone(),
                    before,
                    after,
                    reason: format!("эмоция: {emotion}"),
                });
            }
        }

        debug!(event = %event, shifts = shifts.len(), "World event applied");
        Ok(EventRecord {
            event: event.clone(),
            shifts,
            memories_changed,
        })
    }

    /// Append a snapshot of the relationship table stamped with the current turn.
    pub fn take_snapshot(&mut self) -> &RelationshipSnapshot {
        let snapshot = self.relationships.snapshot(self.turn);
        self.snapshots.push(snapshot);
        debug!(turn = self.turn, total = self.snapshots.len(), "Relationship snapshot");
        &self.snapshots[self.snapshots.len() - 1]
    }

    fn push_speaker(&mut self, speaker: PersonaId) {
        let keep = LAST_SPEAKERS_KEPT.max(self.settings.recent_speaker_exclusion);
        self.last_speakers.push_back(speaker);
        while self.last_speakers.len() > keep {
            self.last_speakers.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::config::PersonaConfig;
    use chorus_core::mood::Emotion;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn world() -> WorldState {
        WorldState::from_config(&ChorusConfig::default()).expect("world")
    }

    fn seeded(world: &mut WorldState) {
        world
            .seed(ChatTurn::new("Даша", "Всем привет! Обсудим цветы."))
            .expect("seed");
    }

    #[test]
    fn seed_posts_opening_line() {
        let mut w = world();
        seeded(&mut w);
        assert_eq!(w.history().len(), 1);
        assert_eq!(w.last_turn(), ("Даша", "Всем привет! Обсудим цветы."));
        let dasha = w.persona(&PersonaId::new("Даша")).expect("Даша");
        assert_eq!(dasha.memory.last(), Some("Всем привет! Обсудим цветы."));
        assert_eq!(w.turn(), 0);
    }

    #[test]
    fn last_turn_defaults_to_nobody() {
        assert_eq!(world().last_turn(), (NOBODY, ""));
    }

    #[test]
    fn chosen_speaker_is_never_a_recent_one() {
        let mut w = world();
        seeded(&mut w);
        w.record_turn(ChatTurn::new("Кирилл", "Даша, соус.")).expect("turn");

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let next = w.choose_speaker(&mut rng).expect("speaker");
            assert_ne!(next.as_str(), "Даша");
            assert_ne!(next.as_str(), "Кирилл");
        }
    }

    #[test]
    fn two_persona_cast_only_excludes_last_speaker() {
        let mut config = ChorusConfig::default();
        config.personas = vec![PersonaConfig::new("Даша", "a"), PersonaConfig::new("Кирилл", "b")];
        let mut w = WorldState::from_config(&config).expect("world");
        seeded(&mut w);
        w.record_turn(ChatTurn::new("Кирилл", "Даша, привет.")).expect("turn");

        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(w.choose_speaker(&mut rng), Some(PersonaId::new("Даша")));
    }

    #[test]
    fn relationship_targets_previous_speaker() {
        let mut w = world();
        seeded(&mut w);
        let record = w
            .record_turn(ChatTurn::new("Кирилл", "Даша, ты права."))
            .expect("turn");

        assert_eq!(record.target, Some(PersonaId::new("Даша")));
        let change = record.relationship.expect("change");
        assert!((change.after - 0.54).abs() < 1e-6);
        let (d, k) = (PersonaId::new("Даша"), PersonaId::new("Кирилл"));
        assert_eq!(w.relationships().get(&d, &k), w.relationships().get(&k, &d));

        let mood = record.mood.expect("mood nudge");
        assert!((mood.after - 0.04).abs() < 1e-6);
    }

    #[test]
    fn neutral_line_leaves_mood_alone() {
        let mut w = world();
        seeded(&mut w);
        let record = w.record_turn(ChatTurn::new("Ника", "Даша, побежали.")).expect("turn");
        assert!(record.mood.is_none());
        assert_eq!(record.relationship.map(|c| c.delta), Some(0.0));
    }

    #[test]
    fn speaker_remembers_own_line() {
        let mut w = world();
        seeded(&mut w);
        w.record_turn(ChatTurn::new("Ника", "Даша, погнали!")).expect("turn");
        let nika = w.persona(&PersonaId::new("Ника")).expect("Ника");
        assert_eq!(nika.memory.last(), Some("Ника: Даша, погнали!"));
    }

    #[test]
    fn evicted_turns_are_folded_into_every_memory() {
        let mut config = ChorusConfig::default();
        config.dialogue.chat_history_limit = 2;
        let mut w = WorldState::from_config(&config).expect("world");
        seeded(&mut w);
        w.record_turn(ChatTurn::new("Кирилл", "Даша, соус.")).expect("turn");
        let record = w.record_turn(ChatTurn::new("Ника", "Кирилл, бег.")).expect("turn");

        assert_eq!(w.history().len(), 2);
        assert_eq!(record.evicted.map(|t| t.text), Some("Всем привет! Обсудим цветы.".into()));
        for persona in w.personas() {
            assert_eq!(
                persona.memory.last(),
                Some("Ранее: Даша: Всем привет! Обсудим цветы.")
            );
        }
    }

    #[test]
    fn last_speaker_ring_holds_three() {
        let mut w = world();
        seeded(&mut w);
        for name in ["Кирилл", "Ника", "Дмитрий", "Даша"] {
            w.record_turn(ChatTurn::new(name, "реплика без эмоций")).expect("turn");
        }
        let ring: Vec<&str> = w.last_speakers().map(PersonaId::as_str).collect();
        assert_eq!(ring, ["Ника", "Дмитрий", "Даша"]);
    }

    #[test]
    fn wide_exclusion_grows_the_ring() {
        let mut config = ChorusConfig::default();
        config.personas.push(PersonaConfig::new("Лев", "музыкант"));
        config.dialogue.recent_speaker_exclusion = 4;
        let mut w = WorldState::from_config(&config).expect("world");
        seeded(&mut w);
        for name in ["Кирилл", "Ника", "Дмитрий"] {
            w.record_turn(ChatTurn::new(name, "реплика без эмоций")).expect("turn");
        }

        assert_eq!(w.last_speakers().count(), 4);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(w.choose_speaker(&mut rng), Some(PersonaId::new("Лев")));
        }
    }

    #[test]
    fn snapshots_follow_interval() {
        let mut config = ChorusConfig::default();
        config.dialogue.snapshot_interval = 2;
        let mut w = WorldState::from_config(&config).expect("world");
        seeded(&mut w);

        let taken: Vec<bool> = ["Кирилл", "Ника", "Дмитрий", "Даша", "Кирилл"]
            .into_iter()
            .map(|name| {
                w.record_turn(ChatTurn::new(name, "Хорошо сказано."))
                    .expect("turn")
                    .snapshot_taken
            })
            .collect();

        assert_eq!(taken, [false, true, false, true, false]);
        assert_eq!(w.snapshots().len(), 2);
        assert_eq!(w.snapshots()[1].turn, 4);
    }

    #[test]
    fn weather_moves_every_mood() {
        let mut w = world();
        let record = w.apply_event(&WorldEvent::Weather(Weather::Storm)).expect("event");

        assert_eq!(record.shifts.len(), 4);
        for shift in &record.shifts {
            assert!((shift.after + 0.3).abs() < 1e-6);
            assert_eq!(shift.reason, "гроза");
        }
        for persona in w.personas() {
            assert!((persona.mood.value() + 0.3).abs() < 1e-6);
        }
        assert_eq!(w.weather(), Some(Weather::Storm));
    }

    #[test]
    fn weather_effect_is_clamped() {
        let mut w = world();
        for _ in 0..6 {
            w.apply_event(&WorldEvent::Weather(Weather::Sunny)).expect("event");
        }
        let record = w.apply_event(&WorldEvent::Weather(Weather::Sunny)).expect("event");
        assert!((record.shifts[0].after - 1.0).abs() < f32::EPSILON);
        assert!(record.shifts[0].delta().abs() < f32::EPSILON);
    }

    #[test]
    fn feeling_blends_one_persona() {
        let mut w = world();
        let nika = PersonaId::new("Ника");
        let record = w
            .apply_event(&WorldEvent::Feeling {
                persona: nika.clone(),
                emotion: Emotion::Excited,
                intensity: 1.0,
            })
            .expect("event");

        assert_eq!(record.shifts.len(), 1);
        assert!((record.shifts[0].after - 0.16).abs() < 1e-6);
        assert_eq!(record.shifts[0].reason, "эмоция: excited");
        let dasha = w.persona(&PersonaId::new("Даша")).expect("Даша");
        assert!(dasha.mood.value().abs() < f32::EPSILON);
    }

    #[test]
    fn feeling_for_stranger_is_rejected() {
        let mut w = world();
        let err = w
            .apply_event(&WorldEvent::Feeling {
                persona: PersonaId::new("Незнакомец"),
                emotion: Emotion::Sad,
                intensity: 0.5,
            })
            .unwrap_err();
        assert!(matches!(err, ChorusError::UnknownPersona(_)));
    }

    #[test]
    fn announcement_is_remembered_not_spoken() {
        let mut w = world();
        seeded(&mut w);
        let record = w
            .apply_event(&WorldEvent::Announcement("Через час закрываемся".into()))
            .expect("event");

        assert!(record.memories_changed);
        assert!(record.shifts.is_empty());
        assert_eq!(w.history().len(), 1);
        assert_eq!(w.turn(), 0);
        for persona in w.personas() {
            assert_eq!(persona.memory.last(), Some("Объявление: Через час закрываемся"));
        }
    }

    #[test]
    fn time_of_day_is_stored() {
        let mut w = world();
        assert_eq!(w.time_of_day(), None);
        w.apply_event(&WorldEvent::TimeOfDay("вечер".into())).expect("event");
        assert_eq!(w.time_of_day(), Some("вечер"));
    }

    #[test]
    fn unknown_speaker_is_rejected() {
        let mut w = world();
        let err = w.record_turn(ChatTurn::new("Незнакомец", "привет")).unwrap_err();
        assert!(matches!(err, ChorusError::UnknownPersona(_)));
    }
}
