// Common utilities for integration tests

mod test_harness;

// Re-export test utilities for convenience in integration tests
#[allow(unused_imports)]
pub use chaingraph::test_utils::{ChainBuilder, MockBitcoinNode, TestConfigBuilder};

pub use test_harness::{ImportHarness, ImportSession};
