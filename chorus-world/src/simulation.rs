//! The turn loop.
//!
//! One [`Simulation`] drives one conversation: pick a speaker, build the
//! prompt, call the model, validate, print, record, persist. Turns run strictly
//! one after another; the only await points are the model calls and the
//! inter-turn delay.
//!
//! Cancellation is checked only between turns, so a turn that has started
//! always finishes and is recorded before the loop exits. World events sent
//! through the channel from [`Simulation::with_events`] are applied between
//! turns too.

use std::time::Duration;

use chorus_core::config::{ChorusConfig, LlmConfig};
use chorus_core::error::{ChorusError, Result};
use chorus_core::event::WorldEvent;
use chorus_core::persistence::{
    MoodEntry, StoredMessage, WorldStore, SYSTEM_SPEAKER, TIME_OF_DAY_KEY, TOPIC_KEY, WEATHER_KEY,
};
use chorus_core::prompt::{build_prompt, PromptSettings};
use chorus_core::sanitize::Sanitizer;
use chorus_core::types::ChatTurn;
use chorus_llm::{GenerationOptions, Generate, LlmClient, LlmError, LlmProvider};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dialogue::{Reply, ResponseValidator, ValidatorSettings};
use crate::report::ReportSink;
use crate::world::{EventRecord, TurnRecord, WorldState};

/// World-state key holding the number of recorded turns.
pub const TURN_KEY: &str = "turn";

/// Transport-level retries per model call; the validator owns the reply retry.
const TRANSPORT_RETRIES: u32 = 0;

/// Build the HTTP model client described by `config`.
///
/// # Errors
///
/// Returns [`LlmError::ConfigError`] for an unknown provider.
pub fn build_llm_client(config: &LlmConfig) -> std::result::Result<LlmClient, LlmError> {
    let provider = LlmProvider::from_name(&config.provider, &config.base_url, config.api_key.clone())?;
    let options = GenerationOptions {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        stop: config.stop.clone(),
        frequency_penalty: config.frequency_penalty,
        presence_penalty: config.presence_penalty,
        timeout_ms: config.request_timeout_ms,
    };
    Ok(LlmClient::new(provider, &config.model, options, TRANSPORT_RETRIES))
}

/// Everything one turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The recorded utterance.
    pub turn: ChatTurn,
    /// Validator details (retry, fallback).
    pub reply: Reply,
    /// Bookkeeping applied to the world.
    pub record: TurnRecord,
}

/// Totals of one [`Simulation::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Turns completed in this run.
    pub turns: u64,
    /// Snapshots held at exit, including the final one.
    pub snapshots: usize,
    /// Turns that needed the forced retry.
    pub retries: u64,
    /// Turns whose text was replaced by a fallback.
    pub fallbacks: u64,
    /// World events applied during the run.
    pub events: u64,
}

/// A running conversation.
pub struct Simulation<G> {
    world: WorldState,
    generator: G,
    validator: ResponseValidator,
    prompt_settings: PromptSettings,
    starter: ChatTurn,
    store: Option<WorldStore>,
    sink: Option<Box<dyn ReportSink>>,
    events: Option<mpsc::UnboundedReceiver<WorldEvent>>,
    rng: StdRng,
    turn_delay: Duration,
}

impl<G> std::fmt::Debug for Simulation<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("turn", &self.world.turn())
            .field("store", &self.store)
            .field("turn_delay", &self.turn_delay)
            .finish_non_exhaustive()
    }
}

impl<G: Generate> Simulation<G> {
    /// Set up a conversation from `config`, generating replies with `generator`.
    ///
    /// The RNG is seeded from `general.seed` when given, otherwise from entropy.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Config`] if the configuration is invalid.
    pub fn new(config: &ChorusConfig, generator: G) -> Result<Self> {
        let world = WorldState::from_config(config)?;
        let rng = match config.general.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            world,
            generator,
            validator: ResponseValidator::new(
                Sanitizer::new(config.sanitizer.clone()),
                ValidatorSettings::from(&config.dialogue),
            ),
            prompt_settings: PromptSettings::from(&config.dialogue),
            starter: ChatTurn::new(config.starter.speaker.as_str(), config.starter.text.as_str()),
            store: None,
            sink: None,
            events: None,
            rng,
            turn_delay: Duration::from_millis(config.dialogue.turn_delay_ms),
        })
    }

    /// Persist every turn to `store`.
    #[must_use]
    pub fn with_store(mut self, store: WorldStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Flush snapshots to `sink` periodically and on exit.
    #[must_use]
    pub fn with_sink(mut self, sink: impl ReportSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Apply world events from `events` between turns.
    #[must_use]
    pub fn with_events(mut self, events: mpsc::UnboundedReceiver<WorldEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The conversation state.
    #[must_use]
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// The attached store, if any.
    #[must_use]
    pub fn store(&self) -> Option<&WorldStore> {
        self.store.as_ref()
    }

    /// Post the configured opening line and persist the initial world.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::UnknownPersona`] if the starter is not in the cast.
    pub fn seed_conversation(&mut self) -> Result<ChatTurn> {
        let opening = self.starter.clone();
        self.world.seed(opening.clone())?;
        println!("{opening}");
        info!(speaker = %opening.speaker, "Conversation opened");

        if let Some(store) = &self.store {
            let result = persist_opening(store, &self.world, &opening);
            if let Err(e) = result {
                warn!(error = %e, "Failed to persist opening state");
            }
        }
        Ok(opening)
    }

    /// Run exactly one turn.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Config`] if no speaker can be chosen, or
    /// [`ChorusError::UnknownPersona`] if the world is inconsistent.
    pub async fn step(&mut self) -> Result<TurnOutcome> {
        let speaker = self
            .world
            .choose_speaker(&mut self.rng)
            .ok_or_else(|| ChorusError::Config("no eligible speaker".into()))?;
        let persona = self
            .world
            .persona(&speaker)
            .ok_or_else(|| ChorusError::UnknownPersona(speaker.to_string()))?;

        let (addressee, last_text) = self.world.last_turn();
        let prompt = build_prompt(
            persona,
            addressee,
            last_text,
            self.world.history(),
            self.world.topic(),
            &self.prompt_settings,
        );
        let addressee = addressee.to_string();

        let reply = self
            .validator
            .produce(
                &self.generator,
                speaker.as_str(),
                &addressee,
                &prompt,
                self.world.history(),
            )
            .await;

        let turn = ChatTurn::new(speaker, reply.text.clone());
        println!("{turn}");
        let record = self.world.record_turn(turn.clone())?;

        info!(
            turn = record.turn,
            speaker = %turn.speaker,
            addressee = %addressee,
            retried = reply.retried(),
            fallback = ?reply.fallback,
            "Turn complete"
        );

        if let Some(store) = &self.store {
            if let Err(e) = persist_turn(store, &self.world, &turn, &record) {
                warn!(turn = record.turn, error = %e, "Failed to persist turn");
            }
        }
        if record.snapshot_taken {
            self.flush_report();
        }

        Ok(TurnOutcome { turn, reply, record })
    }

    /// Apply one outside event now, print announcements, and persist the result.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::UnknownPersona`] if an emotion names someone
    /// outside the cast.
    pub fn apply_event(&mut self, event: &WorldEvent) -> Result<EventRecord> {
        let record = self.world.apply_event(event)?;
        if let WorldEvent::Announcement(text) = event {
            println!("[{SYSTEM_SPEAKER}]: {text}");
        }
        info!(
            command = event.command(),
            event = %event,
            moods = record.shifts.len(),
            "World event"
        );

        if let Some(store) = &self.store {
            if let Err(e) = persist_event(store, &self.world, &record) {
                warn!(event = %event, error = %e, "Failed to persist world event");
            }
        }
        Ok(record)
    }

    /// Apply every event waiting in the channel. Bad events are logged and skipped.
    fn drain_events(&mut self) -> u64 {
        let mut pending = Vec::new();
        if let Some(rx) = &mut self.events {
            while let Ok(event) = rx.try_recv() {
                pending.push(event);
            }
        }

        let mut applied = 0;
        for event in pending {
            match self.apply_event(&event) {
                Ok(_) => applied += 1,
                Err(e) => warn!(event = %event, error = %e, "World event rejected"),
            }
        }
        applied
    }

    /// Run turns until `cancel` fires or `max_turns` turns have completed.
    ///
    /// Seeds the conversation first if nothing has been said yet. On exit a
    /// final snapshot is recorded and flushed to the sink.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::seed_conversation`] and [`Self::step`].
    pub async fn run(
        &mut self,
        cancel: CancellationToken,
        max_turns: Option<u64>,
    ) -> Result<RunSummary> {
        if self.world.history().is_empty() {
            self.seed_conversation()?;
        }

        let mut summary = RunSummary::default();
        loop {
            if max_turns.is_some_and(|max| summary.turns >= max) {
                debug!(turns = summary.turns, "Turn limit reached");
                break;
            }
            if cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("Stop requested");
                    break;
                }
                () = tokio::time::sleep(self.turn_delay) => {}
            }

            summary.events += self.drain_events();
            let outcome = self.step().await?;
            summary.turns += 1;
            summary.retries += u64::from(outcome.reply.retried());
            summary.fallbacks += u64::from(outcome.reply.fallback.is_some());
        }

        self.world.take_snapshot();
        self.flush_report();
        summary.snapshots = self.world.snapshots().len();

        info!(
            turns = summary.turns,
            snapshots = summary.snapshots,
            retries = summary.retries,
            fallbacks = summary.fallbacks,
            events = summary.events,
            "Simulation stopped"
        );
        Ok(summary)
    }

    fn flush_report(&self) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.flush(self.world.snapshots()) {
                warn!(error = %e, "Failed to write relationship report");
            }
        }
    }
}

fn persist_opening(store: &WorldStore, world: &WorldState, opening: &ChatTurn) -> Result<()> {
    for persona in world.personas() {
        store.upsert_persona(persona)?;
    }
    for (a, row) in world.relationships().scores() {
        for (b, score) in row {
            store.upsert_relationship(a, b, *score)?;
        }
    }
    store.append_message(&StoredMessage::from_turn(opening, None, None).system())?;
    store.set_world_state(TOPIC_KEY, world.topic())?;
    store.set_world_state(TURN_KEY, &world.turn().to_string())?;
    Ok(())
}

fn persist_event(store: &WorldStore, world: &WorldState, record: &EventRecord) -> Result<()> {
    match &record.event {
        WorldEvent::Weather(weather) => store.set_world_state(WEATHER_KEY, weather.as_str())?,
        WorldEvent::TimeOfDay(time) => store.set_world_state(TIME_OF_DAY_KEY, time)?,
        WorldEvent::Announcement(text) => store.append_message(&StoredMessage::announcement(text))?,
        WorldEvent::Feeling { .. } => {}
    }

    let now = Utc::now();
    for shift in &record.shifts {
        store.append_mood(&MoodEntry {
            persona: shift.persona.clone(),
            mood: shift.after,
            delta: shift.delta(),
            reason: Some(shift.reason.clone()),
            created_at: now,
        })?;
    }

    if record.memories_changed {
        for persona in world.personas() {
            store.upsert_persona(persona)?;
        }
    } else {
        for shift in &record.shifts {
            if let Some(persona) = world.persona(&shift.persona) {
                store.upsert_persona(persona)?;
            }
        }
    }
    Ok(())
}

fn persist_turn(
    store: &WorldStore,
    world: &WorldState,
    turn: &ChatTurn,
    record: &TurnRecord,
) -> Result<()> {
    let speaker = world
        .persona(&turn.speaker)
        .ok_or_else(|| ChorusError::UnknownPersona(turn.speaker.to_string()))?;

    store.append_message(&StoredMessage::from_turn(
        turn,
        record.target.as_ref(),
        Some(speaker.mood),
    ))?;

    if record.evicted.is_some() {
        for persona in world.personas() {
            store.upsert_persona(persona)?;
        }
    } else {
        store.upsert_persona(speaker)?;
    }

    if let (Some(target), Some(change)) = (&record.target, &record.relationship) {
        store.upsert_relationship(&turn.speaker, target, change.after)?;
        store.upsert_relationship(target, &turn.speaker, change.after)?;
    }

    if let Some(mood) = &record.mood {
        store.append_mood(&MoodEntry {
            persona: turn.speaker.clone(),
            mood: mood.after,
            delta: mood.delta,
            reason: Some(format!("turn {}", record.turn)),
            created_at: Utc::now(),
        })?;
    }

    store.set_world_state(TURN_KEY, &record.turn.to_string())?;
    Ok(())
}
