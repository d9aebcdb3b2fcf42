use crate::bitcoind::NodeRpc;
use crate::core::aggregator::{BlockAggregate, BlockAggregator};
use crate::error::FetchError;
use futures::{StreamExt, stream};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Default, Clone, Copy)]
struct WindowMarks {
    highest_requested: Option<u64>,
    highest_warmed: Option<u64>,
}

/// What one background pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WarmReport {
    /// Heights attempted in this pass, `None` when the pass was skipped.
    pub range: Option<(u64, u64)>,
    pub fetched: usize,
    pub failed: usize,
}

/// Height-keyed memo of block aggregates with a lookahead warmer.
///
/// Only successes are stored and an entry is never replaced once written. The importer
/// reads through [`PrefetchCache::get`]; the background pass keeps the next `window`
/// heights past the highest requested one warm.
pub struct PrefetchCache<R> {
    aggregator: Arc<BlockAggregator<R>>,
    entries: RwLock<HashMap<u64, Arc<BlockAggregate>>>,
    marks: Mutex<WindowMarks>,
    window: u64,
    concurrency: usize,
}

impl<R: NodeRpc + 'static> PrefetchCache<R> {
    pub fn new(aggregator: Arc<BlockAggregator<R>>, window: u64, concurrency: usize) -> Self {
        Self {
            aggregator,
            entries: RwLock::new(HashMap::new()),
            marks: Mutex::new(WindowMarks::default()),
            window: window.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub fn aggregator(&self) -> &Arc<BlockAggregator<R>> {
        &self.aggregator
    }

    /// Cached aggregate for `height`, fetching synchronously on a miss.
    pub fn get(&self, height: u64) -> Result<Arc<BlockAggregate>, FetchError> {
        {
            let mut marks = self.marks.lock().unwrap_or_else(PoisonError::into_inner);
            marks.highest_requested =
                Some(marks.highest_requested.map_or(height, |h| h.max(height)));
        }

        if let Some(hit) = self.cached(height) {
            return Ok(hit);
        }

        let block = self.aggregator.fetch_block(height)?;
        Ok(self.insert(block))
    }

    pub fn cached(&self, height: u64) -> Option<Arc<BlockAggregate>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).get(&height).cloned()
    }

    pub fn contains(&self, height: u64) -> bool {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).contains_key(&height)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn highest_requested(&self) -> Option<u64> {
        self.marks.lock().unwrap_or_else(PoisonError::into_inner).highest_requested
    }

    pub fn highest_warmed(&self) -> Option<u64> {
        self.marks.lock().unwrap_or_else(PoisonError::into_inner).highest_warmed
    }

    /// Drop every entry at or below `height`.
    pub fn evict_through(&self, height: u64) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|h, _| *h > height);
        before - entries.len()
    }

    // first writer wins
    fn insert(&self, block: BlockAggregate) -> Arc<BlockAggregate> {
        let height = block.height;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(height).or_insert_with(|| Arc::new(block)).clone()
    }

    /// Heights the next pass would attempt, `[start, end)`.
    fn next_window(&self) -> Option<(u64, u64)> {
        let marks = *self.marks.lock().unwrap_or_else(PoisonError::into_inner);
        let requested = marks.highest_requested?;
        let start = marks.highest_warmed.map_or(requested + 1, |w| (w + 1).max(requested + 1));
        let end = requested + self.window;
        Some((start, end))
    }

    /// One lookahead pass. Fetches run on the blocking pool, at most `concurrency` at once.
    pub async fn warm_window(self: &Arc<Self>) -> WarmReport {
        let Some((start, end)) = self.next_window() else {
            return WarmReport::default();
        };
        let mut report = WarmReport { range: Some((start, end)), ..WarmReport::default() };
        let t0 = Instant::now();

        let heights: Vec<u64> = (start..end).filter(|h| !self.contains(*h)).collect();
        let mut results = stream::iter(heights)
            .map(|height| {
                let cache = Arc::clone(self);
                async move {
                    let res =
                        tokio::task::spawn_blocking(move || cache.aggregator.fetch_block(height))
                            .await;
                    (height, res)
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some((height, res)) = results.next().await {
            match res {
                Ok(Ok(block)) => {
                    self.insert(block);
                    report.fetched += 1;
                }
                Ok(Err(e)) => {
                    tracing::debug!(height, error = %e, "prefetch failed");
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::debug!(height, error = %e, "prefetch task aborted");
                    report.failed += 1;
                }
            }
        }

        if end > 0 {
            let mut marks = self.marks.lock().unwrap_or_else(PoisonError::into_inner);
            let warmed = end - 1;
            marks.highest_warmed = Some(marks.highest_warmed.map_or(warmed, |w| w.max(warmed)));
        }

        if report.fetched + report.failed > 0 {
            tracing::debug!(
                start,
                end,
                fetched = report.fetched,
                failed = report.failed,
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "prefetch pass done"
            );
        }
        report
    }
}

/// Runs [`PrefetchCache::warm_window`] every `period` until `shutdown` turns true.
pub async fn run_prefetch_loop<R: NodeRpc + 'static>(
    cache: Arc<PrefetchCache<R>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(period_ms = period.as_millis() as u64, "prefetch loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        cache.warm_window().await;
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("prefetch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::test_utils::{ChainBuilder, MockBitcoinNode};

    fn cache_over(blocks: u32, window: u64) -> (Arc<MockBitcoinNode>, Arc<PrefetchCache<MockBitcoinNode>>) {
        let chain = ChainBuilder::new().add_blocks(blocks).build();
        let node = Arc::new(MockBitcoinNode::from_chain(&chain));
        let aggregator = Arc::new(BlockAggregator::new(node.clone(), []));
        (node, Arc::new(PrefetchCache::new(aggregator, window, 4)))
    }

    #[test]
    fn test_get_miss_then_hit() {
        let (node, cache) = cache_over(3, 10);

        let first = cache.get(2).unwrap();
        let second = cache.get(2).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(node.calls().get_block, 1);
        assert_eq!(cache.highest_requested(), Some(2));
    }

    #[test]
    fn test_failed_fetch_is_not_cached() {
        let (node, cache) = cache_over(3, 10);
        let txid = node.txids_at(3)[0];
        node.fail_transaction(txid);

        assert!(cache.get(3).is_err());
        assert!(!cache.contains(3));
        assert_eq!(cache.highest_requested(), Some(3));

        node.clear_failures();
        assert_eq!(cache.get(3).unwrap().height, 3);
        assert!(cache.contains(3));
    }

    #[test]
    fn test_highest_requested_never_decreases() {
        let (_node, cache) = cache_over(5, 10);
        cache.get(4).unwrap();
        cache.get(1).unwrap();
        assert_eq!(cache.highest_requested(), Some(4));
    }

    #[test]
    fn test_evict_through_drops_consumed_heights() {
        let (_node, cache) = cache_over(5, 10);
        for h in 1..=4 {
            cache.get(h).unwrap();
        }
        assert_eq!(cache.evict_through(2), 2);
        assert!(!cache.contains(2));
        assert!(cache.contains(3));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_warm_window_skipped_before_any_request() {
        let (node, cache) = cache_over(5, 10);
        let report = cache.warm_window().await;
        assert_eq!(report, WarmReport::default());
        assert!(cache.is_empty());
        assert_eq!(node.calls().get_block_hash, 0);
    }

    #[tokio::test]
    async fn test_warm_window_fills_successful_subset() {
        let (node, cache) = cache_over(10, 5);
        node.fail_block_hash(4, RpcError::transport("timed out"));
        cache.get(1).unwrap();

        let report = cache.warm_window().await;
        assert_eq!(report.range, Some((2, 6)));
        assert_eq!(report.fetched, 3);
        assert_eq!(report.failed, 1);
        for h in [2, 3, 5] {
            assert!(cache.contains(h), "height {h} should be warm");
        }
        assert!(!cache.contains(4));
        assert!(!cache.contains(6));
        assert_eq!(cache.highest_warmed(), Some(5));
    }

    #[tokio::test]
    async fn test_second_pass_starts_after_warmed_mark() {
        let (node, cache) = cache_over(20, 5);
        cache.get(1).unwrap();
        cache.warm_window().await;
        let calls_after_first = node.calls().get_block_hash;

        // nothing new was requested, so the next pass has an empty range
        let report = cache.warm_window().await;
        assert_eq!(report.range, Some((6, 6)));
        assert_eq!(node.calls().get_block_hash, calls_after_first);

        cache.get(3).unwrap();
        let report = cache.warm_window().await;
        assert_eq!(report.range, Some((6, 8)));
        assert!(cache.contains(6) && cache.contains(7));
    }

    #[tokio::test]
    async fn test_prefetch_beyond_tip_fails_quietly() {
        let (_node, cache) = cache_over(2, 5);
        cache.get(1).unwrap();
        let report = cache.warm_window().await;
        assert_eq!(report.fetched, 1);
        assert_eq!(report.failed, 3);
        assert!(cache.contains(2));
    }

    #[tokio::test]
    async fn test_prefetch_loop_stops_on_shutdown() {
        let (_node, cache) = cache_over(3, 3);
        cache.get(1).unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_prefetch_loop(cache.clone(), Duration::from_millis(5), rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(cache.contains(2) && cache.contains(3));
    }
}
