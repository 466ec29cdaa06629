pub mod core;
pub mod memory;
pub mod query;
pub mod stats;

pub use self::core::CoreCommand;
pub use memory::MemoryCommand;
pub use query::QueryCommand;
pub use stats::StatsCommand;
