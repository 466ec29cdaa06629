//! Integration tests for the extraction pipeline
//!
//! Drives the pipeline through the engine with a scripted collaborator and
//! the hash embedder, against an in-memory store.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ember::config::{Config, ExtractionConfig};
use ember::extraction::{CycleOutcome, RawCandidate, RawExtraction};
use ember::memory::{Role, SessionId, Track};
use ember::storage::SqliteStore;
use ember::testing::{HashEmbedder, ScriptedExtractor};
use ember::{EmberError, MemoryEngine};

fn extraction() -> RawExtraction {
    RawExtraction {
        episodic: vec![RawCandidate::new(
            "Sam walked me through their Lisbon move",
            "6",
            "event",
        )],
        factual: vec![
            RawCandidate::new("Sam is moving to Lisbon", "8", "fact"),
            RawCandidate::new("Sam prefers window seats", "5", "preference"),
            // below the importance floor
            RawCandidate::new("Sam said hi", "1", "fact"),
            // episodic-only kind on the factual track
            RawCandidate::new("Sam seemed tired today", "5", "observation"),
        ],
    }
}

fn config() -> Config {
    Config {
        extraction: ExtractionConfig {
            initial_backoff_ms: 1,
            watch_interval_secs: 1,
            ..ExtractionConfig::default()
        },
        ..Config::default()
    }
}

async fn engine_with(extractor: ScriptedExtractor) -> (MemoryEngine, SqliteStore) {
    let store = SqliteStore::in_memory().await.unwrap();
    let engine = MemoryEngine::new(
        config(),
        store.clone(),
        Arc::new(HashEmbedder::new()),
        Arc::new(extractor),
    );
    (engine, store)
}

async fn append(engine: &MemoryEngine, session: &SessionId, n: usize) {
    for i in 0..n {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        engine
            .append_turn(session, role, &format!("turn {i}"))
            .await
            .unwrap();
    }
}

// =============================================================================
// Overflow Cycle
// =============================================================================

#[tokio::test]
async fn test_forty_turns_extract_oldest_ten() {
    let extractor = ScriptedExtractor::always(extraction());
    let calls = extractor.calls();
    let (engine, store) = engine_with(extractor).await;
    let session = SessionId::try_from("sam-chat").unwrap();
    append(&engine, &session, 40).await;

    let outcome = engine.run_extraction(&session, false).await.unwrap();
    let CycleOutcome::Committed(summary) = outcome else {
        panic!("expected a commit, got {outcome:?}");
    };

    assert_eq!(summary.turns_processed, 10);
    assert_eq!(summary.episodic, 1);
    assert_eq!(summary.factual, 2);
    assert_eq!(summary.below_floor, 1);
    assert_eq!(summary.malformed, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.unprocessed_count(&session).await.unwrap(), 30);

    let window = engine.context_window(&session).await.unwrap();
    assert_eq!(window.len(), 30);
    assert_eq!(window[0].content, "turn 10");
    assert_eq!(window[29].content, "turn 39");

    let facts = store.memories_for_track(Track::Factual).await.unwrap();
    assert_eq!(facts.len(), 2);
    assert!(facts.iter().all(|m| m.embedding.len() == 384));
}

#[tokio::test]
async fn test_second_cycle_waits_for_next_overflow() {
    let (engine, _store) = engine_with(ScriptedExtractor::always(extraction())).await;
    let session = SessionId::try_from("sam-chat").unwrap();
    append(&engine, &session, 40).await;

    assert!(matches!(
        engine.run_extraction(&session, false).await.unwrap(),
        CycleOutcome::Committed(_)
    ));
    assert_eq!(
        engine.run_extraction(&session, false).await.unwrap(),
        CycleOutcome::BelowTrigger { unprocessed: 30 }
    );
}

#[tokio::test]
async fn test_recommitting_a_batch_is_stale() {
    let (engine, store) = engine_with(ScriptedExtractor::always(extraction())).await;
    let session = SessionId::try_from("sam-chat").unwrap();
    append(&engine, &session, 40).await;
    engine.run_extraction(&session, false).await.unwrap();

    let before = store.stats().await.unwrap();
    let first_ten: Vec<i64> = (1..=10).collect();
    let turn = store.get_turn(1).await.unwrap().unwrap();
    assert!(turn.processed);

    let memories = store.memories_for_track(Track::Factual).await.unwrap();
    let result = store
        .commit_extraction(&first_ten, &memories[..1], chrono::Utc::now())
        .await;
    assert!(matches!(result, Err(EmberError::StaleBatch(_))));

    let after = store.stats().await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_concurrent_cycles_take_one_batch() {
    let (engine, store) = engine_with(ScriptedExtractor::always(extraction())).await;
    let session = SessionId::try_from("sam-chat").unwrap();
    append(&engine, &session, 40).await;

    let (a, b) = tokio::join!(
        engine.run_extraction(&session, false),
        engine.run_extraction(&session, false)
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let committed = outcomes
        .iter()
        .filter(|o| matches!(o, CycleOutcome::Committed(_)))
        .count();
    assert_eq!(committed, 1);
    assert_eq!(store.unprocessed_count(&session).await.unwrap(), 30);
}

#[tokio::test]
async fn test_failing_collaborator_defers() {
    let (engine, store) = engine_with(ScriptedExtractor::failing()).await;
    let session = SessionId::try_from("sam-chat").unwrap();
    append(&engine, &session, 40).await;

    let outcome = engine.run_extraction(&session, false).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Deferred { .. }));
    assert_eq!(store.unprocessed_count(&session).await.unwrap(), 40);
}

// =============================================================================
// Forced Extraction
// =============================================================================

#[tokio::test]
async fn test_force_extracts_only_beyond_window() {
    let (engine, store) = engine_with(ScriptedExtractor::always(extraction())).await;
    let session = SessionId::try_from("sam-chat").unwrap();
    append(&engine, &session, 37).await;

    let outcome = engine.run_extraction(&session, true).await.unwrap();
    let CycleOutcome::Committed(summary) = outcome else {
        panic!("expected a commit, got {outcome:?}");
    };
    assert_eq!(summary.turns_processed, 7);
    assert_eq!(store.unprocessed_count(&session).await.unwrap(), 30);
}

#[tokio::test]
async fn test_force_within_window_does_nothing() {
    let (engine, _store) = engine_with(ScriptedExtractor::always(extraction())).await;
    let session = SessionId::try_from("sam-chat").unwrap();
    append(&engine, &session, 12).await;

    assert_eq!(
        engine.run_extraction(&session, true).await.unwrap(),
        CycleOutcome::BelowTrigger { unprocessed: 12 }
    );
}

// =============================================================================
// Background Watcher
// =============================================================================

#[tokio::test]
async fn test_watcher_extracts_on_overflow() {
    let extractor = ScriptedExtractor::always(extraction());
    let calls = extractor.calls();
    let (engine, store) = engine_with(extractor).await;
    let session = SessionId::try_from("sam-chat").unwrap();

    engine.start_watcher(&session).await.unwrap();
    assert!(engine.is_watching(&session));
    append(&engine, &session, 45).await;

    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if store.unprocessed_count(&session).await.unwrap() == 35 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(settled.is_ok(), "watcher never extracted");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    engine.end_session(&session).await.unwrap();
    assert!(!engine.is_watching(&session));
}

#[tokio::test]
async fn test_start_watcher_is_idempotent() {
    let (engine, _store) = engine_with(ScriptedExtractor::always(extraction())).await;
    let session = SessionId::try_from("sam-chat").unwrap();

    engine.start_watcher(&session).await.unwrap();
    engine.start_watcher(&session).await.unwrap();

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.open_sessions, 1);
    assert!(stats.sessions[0].watching);

    engine.shutdown().await;
}
