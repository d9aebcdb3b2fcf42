// Test utilities for chaingraph unit and integration tests

pub use tempfile::TempDir;

pub mod chain_builder;
pub mod config_builder;
pub mod memory_store;
pub mod mock_node;

// Re-export commonly used items
pub use chain_builder::ChainBuilder;
pub use config_builder::TestConfigBuilder;
pub use memory_store::MemoryGraphStore;
pub use mock_node::{CallCounts, MockBitcoinNode};
