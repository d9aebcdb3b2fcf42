pub mod bitcoind;
pub mod config;
pub mod consts;
pub mod core;
pub mod error;
pub mod graph;
pub mod runtime;
pub mod schemas;
pub mod utils;

// Test utilities available for unit tests and the integration tests under tests/
pub mod test_utils;
