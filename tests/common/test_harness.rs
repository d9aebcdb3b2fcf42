//! Integration harness for the import pipeline.
//!
//! Combines a simulated chain (ChainBuilder + MockBitcoinNode) with a RocksDB graph store
//! living in a temporary directory. Sessions can be dropped and reopened against the same
//! directory to simulate a process restart.
#![allow(dead_code)]

use anyhow::Result;
use bitcoin::{Block, Txid};
use chaingraph::config::{AppConfig, prepare_db_path};
use chaingraph::core::{BlockAggregator, BlockCountThrottle, Importer, PrefetchCache, StepOutcome};
use chaingraph::graph::RocksGraphStore;
use chaingraph::runtime::ImportStatus;
use chaingraph::test_utils::{ChainBuilder, MockBitcoinNode, TestConfigBuilder};
use std::sync::Arc;
use tempfile::TempDir;

pub struct ImportHarness {
    pub node: Arc<MockBitcoinNode>,
    pub config: AppConfig,
    blocks: Vec<Block>,

    // Resource cleanup
    _temp_dirs: Vec<TempDir>,
}

/// One "process lifetime": a store handle plus the importer wired on top of it.
pub struct ImportSession {
    pub importer: Arc<Importer<MockBitcoinNode, RocksGraphStore>>,
    pub store: Arc<RocksGraphStore>,
    pub status: Arc<ImportStatus>,
    pub cache: Arc<PrefetchCache<MockBitcoinNode>>,
}

impl ImportHarness {
    /// Chain of `blocks` blocks on top of genesis, with one payment per block from height 2.
    pub fn new(blocks: u32, builder: TestConfigBuilder) -> Self {
        let (config, temp_dirs) = builder.build();
        let chain = ChainBuilder::new().add_blocks(blocks).with_payments().build();
        let node = Arc::new(MockBitcoinNode::from_chain(&chain));
        Self { node, config, blocks: chain, _temp_dirs: temp_dirs }
    }

    pub fn chain(&self) -> &[Block] {
        &self.blocks
    }

    pub fn tip_height(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    pub fn txids_at(&self, height: u64) -> Vec<Txid> {
        self.node.txids_at(height)
    }

    /// Extend the chain and hand the new blocks to the node, one at a time.
    pub fn mine_blocks(&mut self, count: u32) -> Vec<Block> {
        let tip = self.tip_height() as u32;
        let extended = ChainBuilder::new().add_blocks(tip + count).with_payments().build();
        let fresh: Vec<Block> = extended[self.blocks.len()..].to_vec();
        for block in &fresh {
            self.node.push_block(block.clone());
        }
        self.blocks = extended;
        fresh
    }

    /// Open the store and wire a fresh importer, as the binary does on startup.
    pub fn start(&self) -> Result<ImportSession> {
        prepare_db_path(&self.config)?;
        let store = Arc::new(RocksGraphStore::open(self.config.graph_db_path())?);
        let throttle = Arc::new(BlockCountThrottle::new(self.node.clone(), self.config.block_count_ttl));
        let aggregator = Arc::new(BlockAggregator::new(
            self.node.clone(),
            self.config.excluded_txids.iter().copied(),
        ));
        let cache = Arc::new(PrefetchCache::new(
            aggregator,
            self.config.prefetch_window,
            self.config.prefetch_concurrency,
        ));
        let status = Arc::new(ImportStatus::new());
        let importer = Arc::new(Importer::new(
            throttle,
            cache.clone(),
            store.clone(),
            status.clone(),
            self.config.first_height,
        ));
        Ok(ImportSession { importer, store, status, cache })
    }
}

impl ImportSession {
    /// Step until the importer reports it is caught up, or `max_steps` is reached.
    pub fn run_until_idle(&self, max_steps: usize) -> Vec<StepOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..max_steps {
            let outcome = self.importer.step();
            let idle = matches!(outcome, StepOutcome::NotYetAvailable { .. });
            outcomes.push(outcome);
            if idle {
                break;
            }
        }
        outcomes
    }

    /// Heights of the `Imported` outcomes, in order.
    pub fn imported_heights(outcomes: &[StepOutcome]) -> Vec<u64> {
        outcomes
            .iter()
            .filter_map(|o| match o {
                StepOutcome::Imported { height, .. } => Some(*height),
                _ => None,
            })
            .collect()
    }
}
