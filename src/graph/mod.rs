pub mod mapper;
pub mod schemas;
pub mod store;

pub use mapper::map_block;
pub use schemas::BlockGraph;
pub use store::{GraphStore, RocksGraphStore};
