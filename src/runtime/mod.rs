pub mod mdb;
pub mod server;
pub mod status;

pub use status::{ImportPhase, ImportProgress, ImportStatus, StatusSink};
