// importer.rs
use crate::bitcoind::NodeRpc;
use crate::core::prefetch::PrefetchCache;
use crate::core::throttle::BlockCountThrottle;
use crate::graph::mapper::map_block;
use crate::graph::store::GraphStore;
use crate::runtime::status::{ImportPhase, StatusSink};
use crate::utils::{fmt_duration, fmt_height};
use anyhow::{Context, anyhow};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Result of one importer tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Imported { height: u64, elapsed: Duration },
    /// The block was already in the store; nothing was written.
    AlreadyImported { height: u64 },
    /// Caught up with the node.
    NotYetAvailable { target: u64, tip: u64 },
    /// Nothing advanced; the same height is tried again next tick.
    Failed { height: Option<u64>, reason: String },
}

/// Pauses between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportPacing {
    /// After `NotYetAvailable`.
    pub idle_pause: Duration,
    /// After a failed or panicked step.
    pub error_pause: Duration,
    /// After a block was handled.
    pub block_delay: Duration,
}

impl ImportPacing {
    pub fn pause_after(&self, outcome: &StepOutcome) -> Duration {
        match outcome {
            StepOutcome::Imported { .. } | StepOutcome::AlreadyImported { .. } => self.block_delay,
            StepOutcome::NotYetAvailable { .. } => self.idle_pause,
            StepOutcome::Failed { .. } => self.error_pause,
        }
    }
}

impl Default for ImportPacing {
    fn default() -> Self {
        Self {
            idle_pause: Duration::from_secs(1),
            error_pause: Duration::from_secs(1),
            block_delay: Duration::ZERO,
        }
    }
}

/// Sequential importer: one height at a time, strictly increasing, never skipping.
pub struct Importer<R, S> {
    chain: Arc<BlockCountThrottle<R>>,
    cache: Arc<PrefetchCache<R>>,
    store: Arc<S>,
    status: Arc<dyn StatusSink>,
    first_height: u64,
}

impl<R, S> Importer<R, S>
where
    R: NodeRpc + 'static,
    S: GraphStore + 'static,
{
    pub fn new(
        chain: Arc<BlockCountThrottle<R>>,
        cache: Arc<PrefetchCache<R>>,
        store: Arc<S>,
        status: Arc<dyn StatusSink>,
        first_height: u64,
    ) -> Self {
        Self { chain, cache, store, status, first_height }
    }

    pub fn cache(&self) -> &Arc<PrefetchCache<R>> {
        &self.cache
    }

    pub fn status(&self) -> &Arc<dyn StatusSink> {
        &self.status
    }

    /// `first_height + persisted block count`.
    pub fn next_height(&self) -> anyhow::Result<u64> {
        let count = self.store.count_persisted_blocks()?;
        Ok(self.first_height + count)
    }

    /// Run one full cycle: determine target, fetch, check, map, persist.
    pub fn step(&self) -> StepOutcome {
        let t0 = Instant::now();
        self.status.set_phase(ImportPhase::DetermineTarget, None);

        let target = match self.next_height() {
            Ok(h) => h,
            Err(e) => return self.fail(None, "Error reading the number of saved blocks".into(), e),
        };
        // known from the store alone, so a restart reports it before any new block
        if target > self.first_height {
            self.status.set_imported_block_count(target - 1);
        }

        let tip = match self.chain.get_block_count() {
            Ok(tip) => tip,
            Err(e) => {
                return self.fail(Some(target), "Error getting the number of blocks".into(), e.into());
            }
        };
        if target > tip {
            self.status.add_log("No block to process");
            self.status.set_phase(ImportPhase::Idle, None);
            return StepOutcome::NotYetAvailable { target, tip };
        }

        let label = fmt_height(target);
        self.status.add_log(&format!("Starting to process block n°{label}"));
        self.status.set_phase(ImportPhase::Fetch, Some(target));

        let block = match self.cache.get(target) {
            Ok(b) => b,
            Err(e) => {
                return self.fail(
                    Some(target),
                    format!("Error getting block n°{label} informations"),
                    e.into(),
                );
            }
        };

        let hash = block.hash.to_string();
        match self.store.find_block_by_hash(&hash) {
            Ok(Some(_)) => {
                self.status.add_log(&format!("Block n°{label} already saved"));
                self.status.set_imported_block_count(target);
                self.cache.evict_through(target);
                self.status.set_phase(ImportPhase::Idle, None);
                return StepOutcome::AlreadyImported { height: target };
            }
            Ok(None) => {}
            Err(e) => {
                return self.fail(Some(target), format!("Error looking up block n°{label}"), e);
            }
        }

        self.status.set_phase(ImportPhase::Map, Some(target));
        let graph = match map_block(&block).with_context(|| format!("block {hash}")) {
            Ok(g) => g,
            Err(e) => return self.fail(Some(target), format!("Error mapping block n°{label}"), e),
        };

        self.status.set_phase(ImportPhase::Persist, Some(target));
        if let Err(e) = self.store.save(&graph) {
            return self.fail(Some(target), format!("Error saving block n°{label}"), e);
        }

        let elapsed = t0.elapsed();
        self.status.record_import_duration(elapsed);
        self.status.set_imported_block_count(target);
        self.cache.evict_through(target);
        self.status.add_log(&format!(
            "Block n°{label} saved in {:.3} secs ({} txs)",
            elapsed.as_secs_f64(),
            block.tx_count()
        ));

        let remaining = tip - target;
        let eta = self.status.estimate_remaining(remaining);
        tracing::info!(height = target, tip, remaining, eta = %fmt_duration(eta), "import progress");

        self.status.set_phase(ImportPhase::Idle, None);
        StepOutcome::Imported { height: target, elapsed }
    }

    fn fail(&self, height: Option<u64>, message: String, err: anyhow::Error) -> StepOutcome {
        self.status.add_error(&message, Some(&err));
        self.status.set_phase(ImportPhase::Idle, None);
        StepOutcome::Failed { height, reason: format!("{message}: {err:#}") }
    }
}

/// Drive [`Importer::step`] on the blocking pool until `shutdown` turns true.
///
/// A step in flight is always allowed to finish. A panicking step is reported and the
/// loop keeps going.
pub async fn run_importer_loop<R, S>(
    importer: Arc<Importer<R, S>>,
    pacing: ImportPacing,
    mut shutdown: watch::Receiver<bool>,
) where
    R: NodeRpc + 'static,
    S: GraphStore + 'static,
{
    tracing::info!("importer loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let worker = Arc::clone(&importer);
        let pause = match tokio::task::spawn_blocking(move || worker.step()).await {
            Ok(outcome) => pacing.pause_after(&outcome),
            Err(join_err) => {
                let err = anyhow!(join_err.to_string());
                importer.status().add_error("Import step aborted", Some(&err));
                importer.status().set_phase(ImportPhase::Idle, None);
                pacing.error_pause
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("importer loop stopped");
}
