// aggregator.rs
use crate::bitcoind::NodeRpc;
use crate::error::FetchError;
use crate::schemas::{BlockHeaderInfo, RawTransaction};
use bitcoin::{BlockHash, Txid};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// One block with every transaction body resolved. Built once, then only shared.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockAggregate {
    pub height: u64,
    pub hash: BlockHash,
    pub header: BlockHeaderInfo,
    /// All txids of the block in block order, excluded ones included.
    pub txids: Vec<Txid>,
    /// Bodies for every txid not in the exclusion set, in block order.
    pub transactions: Vec<RawTransaction>,
}

impl BlockAggregate {
    pub fn tx_count(&self) -> usize {
        self.txids.len()
    }
}

/// Resolves height -> hash -> block -> transactions into a [`BlockAggregate`].
pub struct BlockAggregator<R> {
    rpc: Arc<R>,
    /// Txids never asked for via getrawtransaction (the genesis coinbase on mainnet).
    excluded_txids: HashSet<Txid>,
}

impl<R: NodeRpc> BlockAggregator<R> {
    pub fn new(rpc: Arc<R>, excluded_txids: impl IntoIterator<Item = Txid>) -> Self {
        Self { rpc, excluded_txids: excluded_txids.into_iter().collect() }
    }

    pub fn rpc(&self) -> &Arc<R> {
        &self.rpc
    }

    pub fn is_excluded(&self, txid: &Txid) -> bool {
        self.excluded_txids.contains(txid)
    }

    /// All-or-nothing: the first failing call aborts the whole block.
    pub fn fetch_block(&self, height: u64) -> Result<BlockAggregate, FetchError> {
        let t0 = Instant::now();

        let hash = self
            .rpc
            .get_block_hash(height)
            .map_err(|source| FetchError::BlockHash { height, source })?;

        let block =
            self.rpc.get_block(&hash).map_err(|source| FetchError::Block { hash, source })?;
        if block.header.height != height {
            return Err(FetchError::HeightMismatch { expected: height, actual: block.header.height });
        }

        let mut transactions = Vec::with_capacity(block.tx.len());
        for txid in block.tx.iter().filter(|t| !self.is_excluded(t)) {
            let tx = self
                .rpc
                .get_raw_transaction(txid)
                .map_err(|source| FetchError::Transaction { txid: *txid, source })?;
            transactions.push(tx);
        }

        tracing::debug!(
            height,
            %hash,
            txs = block.tx.len(),
            resolved = transactions.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "block aggregated"
        );

        Ok(BlockAggregate {
            height,
            hash,
            header: block.header,
            txids: block.tx,
            transactions,
        })
    }
}
