//! Integration Tests: full conversations against scripted models
//!
//! Runs the turn loop end to end with an in-memory or file-backed store and a
//! JSON report sink, checking what ends up in each.

use std::cell::Cell;

use chorus_core::config::ChorusConfig;
use chorus_core::event::{Weather, WorldEvent};
use chorus_core::persistence::{WorldStore, SYSTEM_SPEAKER, TIME_OF_DAY_KEY, TOPIC_KEY, WEATHER_KEY};
use chorus_core::types::PersonaId;
use chorus_core::sanitize::PLACEHOLDER;
use chorus_llm::{Generate, LlmError};
use chorus_world::simulation::TURN_KEY;
use chorus_world::{JsonReportSink, Simulation};
use tokio_util::sync::CancellationToken;

/// Answers whoever the prompt says to address, and cancels after `stop_after` calls.
struct Courteous {
    calls: Cell<u32>,
    stop_after: Option<(u32, CancellationToken)>,
}

impl Courteous {
    fn new() -> Self {
        Self {
            calls: Cell::new(0),
            stop_after: None,
        }
    }

    fn stopping_after(n: u32, token: CancellationToken) -> Self {
        Self {
            calls: Cell::new(0),
            stop_after: Some((n, token)),
        }
    }
}

fn addressee_of(prompt: &str) -> String {
    prompt
        .split("Обратись к ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or("Никто")
        .to_string()
}

const PHRASES: &[&str] = &[
    "ты прав, пионы вдохновляют",
    "это тупо, но забавно",
    "соус решает всё",
    "бег очищает голову",
    "квантовая механика объясняет цветы",
    "не согласен насчёт десерта",
    "молодец, красиво сказано",
];

impl Generate for Courteous {
    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        let n = self.calls.get() + 1;
        self.calls.set(n);
        if let Some((stop, token)) = &self.stop_after {
            if n >= *stop {
                token.cancel();
            }
        }
        let phrase = PHRASES[n as usize % PHRASES.len()];
        Ok(format!("{}, {phrase} {n}.", addressee_of(prompt)))
    }
}

/// Fails every other call and never names anyone.
struct Flaky {
    calls: Cell<u32>,
}

impl Generate for Flaky {
    async fn generate_text(&self, _prompt: &str) -> Result<String, LlmError> {
        let n = self.calls.get() + 1;
        self.calls.set(n);
        if n % 2 == 0 {
            Err(LlmError::Timeout(30_000))
        } else {
            Ok(format!("реплика без обращения номер {n}"))
        }
    }
}

fn config() -> ChorusConfig {
    let mut config = ChorusConfig::default();
    config.dialogue.turn_delay_ms = 0;
    config.dialogue.snapshot_interval = 5;
    config.general.seed = Some(2024);
    config
}

// ---------------------------------------------------------------------------
// Turn loop with persistence and reporting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_persists_every_turn_and_writes_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let report_path = dir.path().join("relationships.json");
    let db_path = dir.path().join("world.db");
    let config = config();

    let store = WorldStore::open(&db_path, &config.persistence).expect("open");
    let mut sim = Simulation::new(&config, Courteous::new())
        .expect("sim")
        .with_store(store)
        .with_sink(JsonReportSink::new(&report_path, 0.5));

    let summary = sim.run(CancellationToken::new(), Some(11)).await.expect("run");
    assert_eq!(summary.turns, 11);
    assert_eq!(summary.retries, 0);
    // turns 5 and 10, plus the final one
    assert_eq!(summary.snapshots, 3);

    let store = sim.store().expect("store");
    assert_eq!(store.message_count().expect("count"), 12);
    assert_eq!(store.list_personas().expect("personas").len(), 4);
    assert_eq!(
        store.get_world_state(TOPIC_KEY).expect("topic").as_deref(),
        Some("информатика и IT")
    );
    assert_eq!(store.get_world_state(TURN_KEY).expect("turn").as_deref(), Some("11"));

    let messages = store.recent_messages(12).expect("messages");
    assert!(messages[0].is_system);
    assert!(messages[1..].iter().all(|m| !m.is_system && m.related.is_some()));

    // stored relationships mirror the in-memory table
    let stored = store.load_relationships().expect("relationships");
    for (a, row) in sim.world().relationships().scores() {
        for (b, score) in row {
            assert!((stored[a][b] - score).abs() < 1e-6, "{a}-{b}");
        }
    }

    let report: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&report_path).expect("read")).expect("parse");
    assert_eq!(report["snapshots"], 3);
    assert_eq!(report["pairs"].as_array().map(Vec::len), Some(6));
}

#[tokio::test]
async fn every_reply_addresses_the_previous_speaker() {
    let mut sim = Simulation::new(&config(), Courteous::new()).expect("sim");
    sim.run(CancellationToken::new(), Some(20)).await.expect("run");

    let history = sim.world().history();
    for pair in history.windows(2) {
        let (prev, turn) = (&pair[0], &pair[1]);
        assert_ne!(prev.speaker, turn.speaker);
        assert!(
            turn.text.starts_with(prev.speaker.as_str()),
            "{} did not address {}",
            turn,
            prev.speaker
        );
    }
}

#[tokio::test]
async fn no_speaker_repeats_within_exclusion_window() {
    let mut sim = Simulation::new(&config(), Courteous::new()).expect("sim");
    sim.run(CancellationToken::new(), Some(30)).await.expect("run");

    let speakers: Vec<_> = sim.world().history().iter().map(|t| t.speaker.clone()).collect();
    for w in speakers.windows(3) {
        assert_ne!(w[0], w[2]);
        assert_ne!(w[1], w[2]);
    }
}

// ---------------------------------------------------------------------------
// Degraded models
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_model_still_produces_usable_lines() {
    let mut sim = Simulation::new(&config(), Flaky { calls: Cell::new(0) }).expect("sim");
    let summary = sim.run(CancellationToken::new(), Some(6)).await.expect("run");

    assert_eq!(summary.turns, 6);
    // every first attempt lacks a name, so every turn retries
    assert_eq!(summary.retries, 6);
    for turn in &sim.world().history()[1..] {
        assert_ne!(turn.text, PLACEHOLDER);
        assert!(turn.text.chars().count() > 5, "{turn}");
    }
}

// ---------------------------------------------------------------------------
// World events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queued_events_are_applied_and_persisted() {
    let config = config();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let mut sim = Simulation::new(&config, Courteous::new())
        .expect("sim")
        .with_store(WorldStore::open_in_memory().expect("store"))
        .with_events(rx);

    for command in [
        "change_weather=sunny",
        "set_time=вечер",
        "announcement=Через час закрываемся",
        "emotion=Незнакомец:happy",
    ] {
        tx.send(command.parse::<WorldEvent>().expect("command")).expect("send");
    }

    let summary = sim.run(CancellationToken::new(), Some(2)).await.expect("run");
    // the stranger's emotion is rejected and skipped
    assert_eq!(summary.events, 3);
    assert_eq!(summary.turns, 2);
    assert_eq!(sim.world().weather(), Some(Weather::Sunny));

    let store = sim.store().expect("store");
    assert_eq!(store.get_world_state(WEATHER_KEY).expect("weather").as_deref(), Some("sunny"));
    assert_eq!(store.get_world_state(TIME_OF_DAY_KEY).expect("time").as_deref(), Some("вечер"));

    // opening, announcement, two turns
    let messages = store.recent_messages(10).expect("messages");
    assert_eq!(messages.len(), 4);
    let announcement = &messages[1];
    assert!(announcement.is_system);
    assert_eq!(announcement.speaker.as_str(), SYSTEM_SPEAKER);
    assert_eq!(announcement.content, "Через час закрываемся");

    for persona in sim.world().personas() {
        let history = store.mood_history(&persona.id, 10).expect("mood history");
        let sunny = history
            .iter()
            .find(|e| e.reason.as_deref() == Some("солнечная погода"))
            .expect("weather entry");
        assert!((sunny.delta - 0.2).abs() < 1e-6);
        assert!(persona.memory.iter().any(|n| n == "Объявление: Через час закрываемся"));
    }
}

#[tokio::test]
async fn direct_emotion_blends_and_logs() {
    let mut sim = Simulation::new(&config(), Courteous::new())
        .expect("sim")
        .with_store(WorldStore::open_in_memory().expect("store"));

    let kirill = PersonaId::new("Кирилл");
    let record = sim
        .apply_event(&WorldEvent::Feeling {
            persona: kirill.clone(),
            emotion: chorus_core::mood::Emotion::Angry,
            intensity: 1.0,
        })
        .expect("event");
    assert!((record.shifts[0].after + 0.12).abs() < 1e-6);

    let store = sim.store().expect("store");
    let history = store.mood_history(&kirill, 1).expect("history");
    assert_eq!(history[0].reason.as_deref(), Some("эмоция: angry"));
    let stored = store.load_persona("Кирилл").expect("load").expect("persona");
    assert!((stored.mood.value() + 0.12).abs() < 1e-6);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_finishes_the_in_flight_turn() {
    let cancel = CancellationToken::new();
    let model = Courteous::stopping_after(3, cancel.clone());
    let mut sim = Simulation::new(&config(), model).expect("sim");

    let summary = sim.run(cancel, None).await.expect("run");

    // the third call cancels mid-turn; that turn is still recorded
    assert_eq!(summary.turns, 3);
    assert_eq!(sim.world().history().len(), 4);
    assert_eq!(summary.snapshots, 1);
}
