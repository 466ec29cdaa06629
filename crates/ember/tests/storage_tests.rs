//! Integration tests for the on-disk SQLite store
//!
//! Covers WAL-mode pools, concurrent writers across sessions and embedding
//! persistence.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use ember::config::StorageConfig;
use ember::memory::{Memory, MemoryKind, Role, SessionId, Track};
use ember::storage::SqliteStore;

fn storage_config(dir: &TempDir) -> StorageConfig {
    StorageConfig {
        database_path: dir.path().join("ember.db"),
        ..StorageConfig::default()
    }
}

#[tokio::test]
async fn test_concurrent_sessions_write_without_conflict() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(&storage_config(&dir)).await.unwrap());

    let mut handles = Vec::new();
    for s in 0..4 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let session = SessionId::try_from(format!("session-{s}")).unwrap();
            for i in 0..25 {
                store
                    .insert_turn(&session, Role::User, &format!("turn {i}"), Utc::now())
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.sessions, 4);
    assert_eq!(stats.turns, 100);
    assert_eq!(stats.unprocessed_turns, 100);
    store.close().await;
}

#[tokio::test]
async fn test_embeddings_persist_bit_exact() {
    let dir = TempDir::new().unwrap();
    let config = storage_config(&dir);
    let embedding: Vec<f32> = (0..384).map(|i| (i as f32 * 0.37).sin()).collect();
    let memory = Memory::new(
        Track::Episodic,
        MemoryKind::Reflection,
        "I noticed Sam lights up talking about bees".to_string(),
        embedding.clone(),
        0.7,
    );

    let store = SqliteStore::open(&config).await.unwrap();
    store.insert_memory(&memory).await.unwrap();
    store.close().await;

    let reopened = SqliteStore::open(&config).await.unwrap();
    let loaded = reopened.get_memory(&memory.id).await.unwrap().unwrap();
    assert_eq!(loaded.embedding, embedding);
    assert_eq!(loaded.kind, MemoryKind::Reflection);
    assert_eq!(loaded.decay_category, memory.decay_category);
    assert_eq!(loaded.created_at, memory.created_at);
    reopened.close().await;
}

#[tokio::test]
async fn test_list_memories_filters_by_track() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&storage_config(&dir)).await.unwrap();
    for i in 0..3 {
        store
            .insert_memory(&Memory::new(
                Track::Factual,
                MemoryKind::Fact,
                format!("fact number {i}"),
                vec![1.0, 0.0],
                0.5,
            ))
            .await
            .unwrap();
    }
    store
        .insert_memory(&Memory::new(
            Track::Episodic,
            MemoryKind::Event,
            "we went over the plan together".to_string(),
            vec![0.0, 1.0],
            0.5,
        ))
        .await
        .unwrap();

    assert_eq!(store.list_memories(None, 10).await.unwrap().len(), 4);
    assert_eq!(store.list_memories(Some(Track::Factual), 10).await.unwrap().len(), 3);
    assert_eq!(store.list_memories(Some(Track::Factual), 2).await.unwrap().len(), 2);
    assert_eq!(store.list_memories(Some(Track::Episodic), 10).await.unwrap().len(), 1);
    store.close().await;
}
