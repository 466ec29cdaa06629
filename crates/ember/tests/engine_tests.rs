//! Integration tests for the engine facade: sessions, turns, queries, core
//! memories and lifecycle

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use ember::MemoryEngine;
use ember::config::{Config, StorageConfig};
use ember::extraction::RawExtraction;
use ember::memory::{CoreCategory, Memory, MemoryKind, Role, SessionId, Track};
use ember::storage::SqliteStore;
use ember::testing::{FixedEmbedder, HashEmbedder, ScriptedExtractor};

async fn engine() -> (MemoryEngine, SqliteStore) {
    let store = SqliteStore::in_memory().await.unwrap();
    let engine = MemoryEngine::new(
        Config::default(),
        store.clone(),
        Arc::new(HashEmbedder::new()),
        Arc::new(ScriptedExtractor::always(RawExtraction::default())),
    );
    (engine, store)
}

#[tokio::test]
async fn test_append_turn_opens_session_and_counts() {
    let (engine, store) = engine().await;
    let session = SessionId::try_from("chat-1").unwrap();

    engine.append_turn(&session, Role::User, "hello").await.unwrap();
    engine
        .append_turn(&session, Role::Assistant, "hi there")
        .await
        .unwrap();

    let open = engine.session(&session).unwrap();
    assert_eq!(open.turn_count(), 2);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.turns, 2);
    assert_eq!(stats.unprocessed_turns, 2);
}

#[tokio::test]
async fn test_core_memories_round_trip() {
    let (engine, _store) = engine().await;
    engine
        .add_core_memory(CoreCategory::Identity, "The user is called Sam")
        .await
        .unwrap();
    engine
        .add_core_memory(CoreCategory::Relationship, "Sam and I have talked for a year")
        .await
        .unwrap();

    let cores = engine.list_core_memories().await.unwrap();
    assert_eq!(cores.len(), 2);
    assert!(cores.iter().all(|c| c.promoted_from.is_none()));
}

#[tokio::test]
async fn test_query_includes_core_and_renders_block() {
    let (engine, store) = engine().await;
    let session = SessionId::try_from("chat-1").unwrap();
    engine
        .add_core_memory(CoreCategory::Identity, "The user is called Sam")
        .await
        .unwrap();

    // same text, same hash embedding: semantic 1.0
    let text = "Sam keeps bees";
    let memory = Memory::new(
        Track::Factual,
        MemoryKind::Fact,
        text.to_string(),
        HashEmbedder::new().vector(text),
        0.3,
    );
    store.insert_memory(&memory).await.unwrap();

    let result = engine.query(text, &session, Utc::now()).await.unwrap();
    assert_eq!(result.factual.len(), 1);
    assert_eq!(result.core.len(), 1);

    let block = result.to_prompt_block(Utc::now()).unwrap();
    assert!(block.starts_with("<relevant_memories>"));
    assert!(block.contains("What I know:\n- Sam keeps bees"));
    assert!(block.contains("- The user is called Sam"));
    assert!(block.ends_with("</relevant_memories>"));
}

#[tokio::test]
async fn test_turns_decay_warmth() {
    let store = SqliteStore::in_memory().await.unwrap();
    let embedder = FixedEmbedder::new(vec![0.0, 1.0]).with("bees", vec![1.0, 0.0]);
    let engine = MemoryEngine::new(
        Config::default(),
        store.clone(),
        Arc::new(embedder),
        Arc::new(ScriptedExtractor::always(RawExtraction::default())),
    );
    let session = SessionId::try_from("chat-1").unwrap();
    let memory = Memory::new(
        Track::Factual,
        MemoryKind::Fact,
        "Sam keeps bees".to_string(),
        vec![1.0, 0.0],
        0.3,
    );
    store.insert_memory(&memory).await.unwrap();

    engine.query("bees", &session, Utc::now()).await.unwrap();
    engine.append_turn(&session, Role::User, "anyway").await.unwrap();

    let result = engine.query("bees", &session, Utc::now()).await.unwrap();
    // 0.15 decayed once by 0.6
    assert!((result.factual[0].score.warmth - 0.09).abs() < 1e-6);
}

#[tokio::test]
async fn test_end_session_discards_warmth() {
    let (engine, store) = engine().await;
    let session = SessionId::try_from("chat-1").unwrap();
    let text = "Sam keeps bees";
    let memory = Memory::new(
        Track::Factual,
        MemoryKind::Fact,
        text.to_string(),
        HashEmbedder::new().vector(text),
        0.3,
    );
    store.insert_memory(&memory).await.unwrap();

    engine.query(text, &session, Utc::now()).await.unwrap();
    let before = engine.stats().await.unwrap();
    assert_eq!(before.sessions[0].warmth_entries, 1);

    engine.end_session(&session).await.unwrap();
    assert!(engine.session(&session).is_none());
    assert_eq!(engine.stats().await.unwrap().open_sessions, 0);

    // reopening starts cold
    let again = engine.query(text, &session, Utc::now()).await.unwrap();
    assert_eq!(again.factual[0].score.warmth, 0.0);
}

#[tokio::test]
async fn test_on_disk_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        storage: StorageConfig {
            database_path: dir.path().join("nested").join("ember.db"),
            ..StorageConfig::default()
        },
        ..Config::default()
    };

    let store = SqliteStore::open(&config.storage).await.unwrap();
    let engine = MemoryEngine::new(
        config.clone(),
        store,
        Arc::new(HashEmbedder::new()),
        Arc::new(ScriptedExtractor::always(RawExtraction::default())),
    );
    engine
        .add_core_memory(CoreCategory::Fact, "Sam is allergic to peanuts")
        .await
        .unwrap();
    engine.shutdown().await;

    let reopened = SqliteStore::open(&config.storage).await.unwrap();
    let cores = reopened.list_core_memories().await.unwrap();
    assert_eq!(cores.len(), 1);
    assert_eq!(cores[0].content, "Sam is allergic to peanuts");
    reopened.close().await;
}
