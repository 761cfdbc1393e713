mod memory;
mod sqlite;
mod store;

pub use memory::*;
pub use sqlite::*;
pub use store::*;

/// SQL migration for the operations ledger
pub const MIGRATION_001_OPERATIONS: &str = include_str!("migrations/001_operations.sql");
