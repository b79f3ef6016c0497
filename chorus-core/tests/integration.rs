//! Integration Tests: dialogue core flows
//!
//! Config → sanitize → prompt → memory → relationships → persist → restore,
//! exercised through the public API only.

use chorus_core::config::{ChorusConfig, PersistenceConfig};
use chorus_core::persistence::{MoodEntry, StoredMessage, WorldStore, TOPIC_KEY};
use chorus_core::prompt::{build_prompt, with_urgent_instruction, PromptSettings};
use chorus_core::relationship::{RelationshipTable, SentimentLexicon};
use chorus_core::sanitize::Sanitizer;
use chorus_core::similarity::max_similarity;
use chorus_core::types::{ChatTurn, Persona, PersonaId};

fn personas(config: &ChorusConfig) -> Vec<Persona> {
    config
        .personas
        .iter()
        .map(|p| Persona::new(p.name.as_str(), p.role.as_str(), config.dialogue.memory_max))
        .collect()
}

// ---------------------------------------------------------------------------
// Raw model output to a stored, remembered, scored turn
// ---------------------------------------------------------------------------

#[test]
fn raw_reply_to_persisted_turn() {
    let config = ChorusConfig::default();
    let sanitizer = Sanitizer::new(config.sanitizer.clone());
    let lexicon = SentimentLexicon::new(&config.relationships);
    let mut cast = personas(&config);
    let ids: Vec<PersonaId> = cast.iter().map(|p| p.id.clone()).collect();
    let mut table = RelationshipTable::new(&ids, config.relationships.initial_score);
    let mut history = vec![ChatTurn::new(
        config.starter.speaker.as_str(),
        config.starter.text.as_str(),
    )];

    // Кирилл answers Даша
    let prompt = build_prompt(
        &cast[1],
        "Даша",
        &history[0].text,
        &history,
        &config.dialogue.initial_topic,
        &PromptSettings::from(&config.dialogue),
    );
    assert!(prompt.ends_with("Ответ Кирилл: "));

    let raw = "Кирилл: [INST] Даша,ты права   чё там пионы?Но соус важнее. И ещё фраза. Лишняя фраза.";
    let text = sanitizer.sanitize(raw, "Кирилл");
    assert_eq!(text, "Даша, ты права что там пионы? Но соус важнее.");

    let turn = ChatTurn::new("Кирилл", text.clone());
    assert!(max_similarity(&turn.text, history.iter().map(|t| t.text.as_str())) < 0.6);
    history.push(turn.clone());
    cast[1].memory.remember(&format!("Кирилл: {text}"));

    let change = table
        .update(&ids[1], &ids[0], &text, &lexicon)
        .expect("known pair");
    assert!(change.after > config.relationships.initial_score);
    cast[1].mood.apply_delta(change.delta);

    // persist and restore
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("world.db");
    {
        let store = WorldStore::open(&path, &PersistenceConfig::default()).expect("open");
        for persona in &cast {
            store.upsert_persona(persona).expect("persona");
        }
        store
            .append_message(&StoredMessage::from_turn(&turn, Some(&ids[0]), Some(cast[1].mood)))
            .expect("message");
        store
            .upsert_relationship(&ids[1], &ids[0], change.after)
            .expect("relationship");
        store
            .upsert_relationship(&ids[0], &ids[1], change.after)
            .expect("relationship");
        store
            .append_mood(&MoodEntry {
                persona: ids[1].clone(),
                mood: cast[1].mood.value(),
                delta: change.delta,
                reason: Some("turn 1".into()),
                created_at: chrono::Utc::now(),
            })
            .expect("mood");
        store
            .set_world_state(TOPIC_KEY, &config.dialogue.initial_topic)
            .expect("topic");
    }

    let store = WorldStore::open(&path, &PersistenceConfig::default()).expect("reopen");
    let kirill = store.load_persona("Кирилл").expect("load").expect("Some");
    assert_eq!(kirill.memory.last(), Some(format!("Кирилл: {text}").as_str()));
    assert_eq!(store.list_personas().expect("list").len(), 4);
    assert_eq!(store.recent_messages(10).expect("messages")[0].to_turn(), turn);

    let restored = RelationshipTable::from_scores(store.load_relationships().expect("rels"));
    assert_eq!(restored.get(&ids[0], &ids[1]), table.get(&ids[0], &ids[1]));
    assert_eq!(store.mood_history(&ids[1], 5).expect("moods").len(), 1);
    assert_eq!(
        store.get_world_state(TOPIC_KEY).expect("topic").as_deref(),
        Some("информатика и IT")
    );
}

// ---------------------------------------------------------------------------
// TOML config drives sanitizer and prompt settings
// ---------------------------------------------------------------------------

#[test]
fn toml_config_flows_into_pipeline() {
    let config = ChorusConfig::from_toml(
        r#"
        [dialogue]
        context_limit = 2
        allow_mild_profanity = false
        initial_topic = "кулинария"

        [sanitizer]
        max_sentences = 1

        [[personas]]
        name = "Аня"
        role = "повар"

        [[personas]]
        name = "Борис"
        role = "критик"

        [starter]
        speaker = "Аня"
        text = "Сегодня борщ."
        "#,
    )
    .expect("parse");

    let cast = personas(&config);
    let history: Vec<ChatTurn> = (0..5)
        .map(|i| ChatTurn::new("Аня", format!("реплика {i}")))
        .collect();
    let prompt = build_prompt(
        &cast[1],
        "Аня",
        "реплика 4",
        &history,
        &config.dialogue.initial_topic,
        &PromptSettings::from(&config.dialogue),
    );
    assert!(prompt.contains("Тема: «кулинария»"));
    assert!(!prompt.contains("[Аня]: реплика 2"));
    assert!(prompt.contains("[Аня]: реплика 3\n[Аня]: реплика 4"));

    let retry = with_urgent_instruction(&prompt, "Аня");
    assert!(retry.starts_with(&prompt));
    assert!(retry.ends_with("Коротко."));

    let sanitizer = Sanitizer::new(config.sanitizer.clone());
    assert_eq!(sanitizer.sanitize("Аня, вкусно! Но пересолено.", "Борис"), "Аня, вкусно!");
}
