pub mod aggregator;
pub mod importer;
pub mod prefetch;
pub mod throttle;

pub use aggregator::{BlockAggregate, BlockAggregator};
pub use importer::{ImportPacing, Importer, StepOutcome, run_importer_loop};
pub use prefetch::{PrefetchCache, WarmReport, run_prefetch_loop};
pub use throttle::BlockCountThrottle;
