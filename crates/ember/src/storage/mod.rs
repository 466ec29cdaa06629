//! Persistent storage for turns and memories

pub mod pool;
pub mod retry;
pub mod sqlite;

pub use pool::DatabasePool;
pub use sqlite::{SqliteStore, StoreStats};
