use crate::graph::schemas::{BlockGraph, BlockNode, OutputNode, SpendEdge, TransactionNode};
use crate::graph::store::{GraphStore, ensure_appendable};
use anyhow::{Result, bail};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct GraphState {
    blocks: HashMap<String, BlockNode>,
    heights: BTreeMap<u64, String>,
    transactions: HashMap<String, TransactionNode>,
    outputs: BTreeMap<(String, u32), OutputNode>,
    spends: HashMap<(String, u32), SpendEdge>,
    addresses: HashMap<String, BTreeSet<(String, u32)>>,
}

/// [`GraphStore`] kept in memory, with hooks to script save failures.
#[derive(Default)]
pub struct MemoryGraphStore {
    state: Mutex<GraphState>,
    pinned_count: Mutex<Option<u64>>,
    saves: AtomicU64,
    failing_saves: AtomicU32,
    panic_on_save: AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call to `save`, successful or not.
    pub fn save_calls(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make `count_persisted_blocks` report `count`; `None` restores the real count.
    pub fn pin_count(&self, count: Option<u64>) {
        *self.pinned_count.lock().unwrap_or_else(PoisonError::into_inner) = count;
    }

    pub fn fail_next_saves(&self, n: u32) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// The next `save` panics before touching any state.
    pub fn panic_next_save(&self) {
        self.panic_on_save.store(true, Ordering::SeqCst);
    }
}

impl GraphStore for MemoryGraphStore {
    fn count_persisted_blocks(&self) -> Result<u64> {
        if let Some(pinned) = *self.pinned_count.lock().unwrap_or_else(PoisonError::into_inner) {
            return Ok(pinned);
        }
        Ok(self.lock().blocks.len() as u64)
    }

    fn find_block_by_hash(&self, hash: &str) -> Result<Option<BlockNode>> {
        Ok(self.lock().blocks.get(hash).cloned())
    }

    fn find_block_by_height(&self, height: u64) -> Result<Option<BlockNode>> {
        let st = self.lock();
        Ok(st.heights.get(&height).and_then(|hash| st.blocks.get(hash)).cloned())
    }

    fn find_transaction(&self, txid: &str) -> Result<Option<TransactionNode>> {
        Ok(self.lock().transactions.get(txid).cloned())
    }

    fn find_output(&self, txid: &str, n: u32) -> Result<Option<OutputNode>> {
        Ok(self.lock().outputs.get(&(txid.to_string(), n)).cloned())
    }

    fn find_address_outputs(&self, address: &str) -> Result<Vec<OutputNode>> {
        let st = self.lock();
        let Some(refs) = st.addresses.get(address) else {
            return Ok(Vec::new());
        };
        Ok(refs.iter().filter_map(|key| st.outputs.get(key).cloned()).collect())
    }

    fn find_spender(&self, txid: &str, n: u32) -> Result<Option<SpendEdge>> {
        Ok(self.lock().spends.get(&(txid.to_string(), n)).cloned())
    }

    fn save(&self, graph: &BlockGraph) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_save.swap(false, Ordering::SeqCst) {
            panic!("injected panic while saving block {}", graph.height());
        }
        let failing = self.failing_saves.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_saves.store(failing - 1, Ordering::SeqCst);
            bail!("injected failure while saving block {}", graph.height());
        }
        ensure_appendable(self, graph)?;

        let mut st = self.lock();
        let hash = graph.hash().to_string();
        st.heights.insert(graph.height(), hash.clone());
        st.blocks.insert(hash, graph.block.clone());
        for tx in &graph.transactions {
            st.transactions.insert(tx.txid.clone(), tx.clone());
        }
        for out in &graph.outputs {
            st.outputs.insert((out.txid.clone(), out.n), out.clone());
        }
        for spend in &graph.spends {
            st.spends.insert((spend.prev_txid.clone(), spend.vout), spend.clone());
        }
        for link in &graph.address_links {
            st.addresses
                .entry(link.address.clone())
                .or_default()
                .insert((link.outpoint.txid.clone(), link.outpoint.n));
        }
        Ok(())
    }
}
