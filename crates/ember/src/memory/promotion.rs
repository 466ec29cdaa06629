//! Promotion of high-scoring memories to core status

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::Result;
use crate::memory::types::{CoreCategory, CoreMemory, Memory};
use crate::storage::SqliteStore;

/// Whether a pre-warmth base score earns promotion
pub fn qualifies(base_score: f32, threshold: f32) -> bool {
    base_score > threshold
}

/// Promote each memory, skipping ones that are already core
///
/// Each promotion is its own transaction: the memory flips to core and
/// permanent decay, and a core memory row pointing back at it is inserted.
/// Returns the core memories that were created.
pub async fn promote(
    store: &SqliteStore,
    memories: &[Memory],
    now: DateTime<Utc>,
) -> Result<Vec<CoreMemory>> {
    let mut created = Vec::new();
    for memory in memories.iter().filter(|m| !m.is_core()) {
        let category = CoreCategory::for_promoted(memory.kind);
        if let Some(core) = store.promote_memory(memory, category, now).await? {
            info!(memory_id = %memory.id, %category, "Promoted memory to core");
            created.push(core);
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MemoryKind, Track};

    #[test]
    fn test_threshold_is_strict() {
        assert!(qualifies(0.90, 0.85));
        assert!(!qualifies(0.85, 0.85));
        assert!(!qualifies(0.5, 0.85));
    }

    #[tokio::test]
    async fn test_promote_twice_creates_one_core() {
        let store = SqliteStore::in_memory().await.unwrap();
        let memory = Memory::new(
            Track::Episodic,
            MemoryKind::Reflection,
            "I realized Sam values honesty above all".into(),
            vec![1.0, 0.0],
            0.6,
        );
        store.insert_memory(&memory).await.unwrap();

        let now = Utc::now();
        let first = promote(&store, std::slice::from_ref(&memory), now).await.unwrap();
        let second = promote(&store, std::slice::from_ref(&memory), now).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].category, CoreCategory::Narrative);
        assert!(second.is_empty());
        assert_eq!(store.list_core_memories().await.unwrap().len(), 1);
    }
}
