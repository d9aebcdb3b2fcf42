use crate::bitcoind::NodeRpc;
use crate::error::RpcError;
use crate::schemas::{RawTransaction, RpcBlock};
use bitcoin::{BlockHash, Txid};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct CachedCount {
    value: u64,
    fetched_at: Instant,
}

/// Wraps a node and memoizes `getblockcount` for `ttl`.
///
/// The tip moves roughly once per block interval, so asking on every importer tick only
/// burns RPC budget. When a refresh fails and an older value exists, the older value is
/// served; without one the error goes to the caller. Every other call passes through.
pub struct BlockCountThrottle<R> {
    inner: Arc<R>,
    ttl: Duration,
    last: Mutex<Option<CachedCount>>,
}

impl<R: NodeRpc> BlockCountThrottle<R> {
    pub fn new(inner: Arc<R>, ttl: Duration) -> Self {
        Self { inner, ttl, last: Mutex::new(None) }
    }

    pub fn inner(&self) -> &Arc<R> {
        &self.inner
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Last successfully fetched count, fresh or not.
    pub fn last_value(&self) -> Option<u64> {
        let cached = *self.last.lock().unwrap_or_else(PoisonError::into_inner);
        cached.map(|c| c.value)
    }

    fn fresh_value(&self, now: Instant) -> Option<u64> {
        let cached = *self.last.lock().unwrap_or_else(PoisonError::into_inner);
        cached.filter(|c| now.duration_since(c.fetched_at) < self.ttl).map(|c| c.value)
    }
}

impl<R: NodeRpc> NodeRpc for BlockCountThrottle<R> {
    fn get_block_count(&self) -> Result<u64, RpcError> {
        if let Some(value) = self.fresh_value(Instant::now()) {
            return Ok(value);
        }

        // not holding the lock across the upstream call
        match self.inner.get_block_count() {
            Ok(value) => {
                *self.last.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(CachedCount { value, fetched_at: Instant::now() });
                tracing::debug!(count = value, "block count refreshed");
                Ok(value)
            }
            Err(e) => match self.last_value() {
                Some(stale) => {
                    tracing::warn!(error = %e, stale, "block count refresh failed, serving stale value");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        self.inner.get_block_hash(height)
    }

    fn get_block(&self, hash: &BlockHash) -> Result<RpcBlock, RpcError> {
        self.inner.get_block(hash)
    }

    fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, RpcError> {
        self.inner.get_raw_transaction(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ChainBuilder, MockBitcoinNode};

    fn node(blocks: u32) -> Arc<MockBitcoinNode> {
        Arc::new(MockBitcoinNode::from_chain(&ChainBuilder::new().add_blocks(blocks).build()))
    }

    #[test]
    fn test_within_ttl_upstream_called_once() {
        let node = node(5);
        let throttle = BlockCountThrottle::new(node.clone(), Duration::from_secs(600));

        assert_eq!(throttle.get_block_count().unwrap(), 5);
        node.set_block_count(9);
        assert_eq!(throttle.get_block_count().unwrap(), 5);
        assert_eq!(node.calls().get_block_count, 1);
    }

    #[test]
    fn test_expired_value_is_refreshed() {
        let node = node(5);
        let throttle = BlockCountThrottle::new(node.clone(), Duration::ZERO);

        assert_eq!(throttle.get_block_count().unwrap(), 5);
        node.set_block_count(6);
        assert_eq!(throttle.get_block_count().unwrap(), 6);
        assert_eq!(node.calls().get_block_count, 2);
    }

    #[test]
    fn test_failed_refresh_serves_stale_value() {
        let node = node(5);
        let throttle = BlockCountThrottle::new(node.clone(), Duration::ZERO);

        assert_eq!(throttle.get_block_count().unwrap(), 5);
        node.fail_block_count(Some(RpcError::transport("connection refused")));
        assert_eq!(throttle.get_block_count().unwrap(), 5);

        // failed calls keep retrying upstream
        assert_eq!(throttle.get_block_count().unwrap(), 5);
        assert_eq!(node.calls().get_block_count, 3);

        node.fail_block_count(None);
        node.set_block_count(8);
        assert_eq!(throttle.get_block_count().unwrap(), 8);
    }

    #[test]
    fn test_failure_without_prior_value_propagates() {
        let node = node(2);
        node.fail_block_count(Some(RpcError::transport("connection refused")));
        let throttle = BlockCountThrottle::new(node.clone(), Duration::from_secs(600));

        assert!(matches!(throttle.get_block_count(), Err(RpcError::Transport(_))));
        assert_eq!(throttle.last_value(), None);
    }

    #[test]
    fn test_other_calls_delegate() {
        let node = node(3);
        let throttle = BlockCountThrottle::new(node.clone(), Duration::from_secs(600));

        let hash = throttle.get_block_hash(2).unwrap();
        assert_eq!(Some(hash), node.block_hash_at(2));
        let block = throttle.get_block(&hash).unwrap();
        assert_eq!(block.header.height, 2);
        assert_eq!(node.calls().get_block_hash, 1);
        assert_eq!(node.calls().get_block, 1);
    }
}
