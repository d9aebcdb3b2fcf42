use crate::graph::schemas::{BlockGraph, BlockNode, OutPointRef, OutputNode, SpendEdge, TransactionNode};
use crate::runtime::mdb::Mdb;
use anyhow::{Context, Result, anyhow, bail};
use borsh::{BorshDeserialize, BorshSerialize};
use std::path::Path;

/// Persistence boundary of the importer.
///
/// `save` is all-or-nothing per block and only accepts the block directly after the
/// current tip; the importer relies on that to keep heights contiguous.
pub trait GraphStore: Send + Sync {
    fn count_persisted_blocks(&self) -> Result<u64>;
    fn find_block_by_hash(&self, hash: &str) -> Result<Option<BlockNode>>;
    fn find_block_by_height(&self, height: u64) -> Result<Option<BlockNode>>;
    fn find_transaction(&self, txid: &str) -> Result<Option<TransactionNode>>;
    fn find_output(&self, txid: &str, n: u32) -> Result<Option<OutputNode>>;
    /// Outputs paying `address`, in `(txid, n)` order.
    fn find_address_outputs(&self, address: &str) -> Result<Vec<OutputNode>>;
    /// The input that consumed `(txid, n)`, if any block seen so far spends it.
    fn find_spender(&self, txid: &str, n: u32) -> Result<Option<SpendEdge>>;
    fn save(&self, graph: &BlockGraph) -> Result<()>;
}

/// Rejects a block that is already stored or that would leave a gap below it.
pub fn ensure_appendable<S: GraphStore + ?Sized>(store: &S, graph: &BlockGraph) -> Result<()> {
    let height = graph.height();
    if store.find_block_by_hash(graph.hash())?.is_some() {
        bail!("block {} is already stored", graph.hash());
    }
    if let Some(existing) = store.find_block_by_height(height)? {
        bail!("height {} is already taken by block {}", height, existing.hash);
    }
    if store.count_persisted_blocks()? > 0 {
        let below = height.checked_sub(1).ok_or_else(|| anyhow!("height 0 on a non-empty store"))?;
        if store.find_block_by_height(below)?.is_none() {
            bail!("cannot store block {height}: block {below} is missing");
        }
    }
    Ok(())
}

/// RocksDB-backed graph. Keys, relative to the namespace:
///
/// - `meta/count` → u64 LE
/// - `b/{hash}` → BlockNode
/// - `h/{height BE8}` → hash
/// - `t/{txid}` → TransactionNode
/// - `o/{txid}:{n BE4}` → OutputNode
/// - `s/{txid}:{n BE4}` → SpendEdge
/// - `a/{address}/{txid}:{n BE4}` → OutPointRef
pub struct RocksGraphStore {
    mdb: Mdb,
}

impl RocksGraphStore {
    pub const NAMESPACE: &'static [u8] = b"graph/";
    const COUNT_KEY: &'static [u8] = b"meta/count";

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mdb = Mdb::open(path, Self::NAMESPACE)
            .with_context(|| format!("opening graph db at {}", path.display()))?;
        Ok(Self { mdb })
    }

    fn block_key(hash: &str) -> Vec<u8> {
        let mut k = b"b/".to_vec();
        k.extend_from_slice(hash.as_bytes());
        k
    }

    fn height_key(height: u64) -> Vec<u8> {
        let mut k = b"h/".to_vec();
        k.extend_from_slice(&height.to_be_bytes());
        k
    }

    fn tx_key(txid: &str) -> Vec<u8> {
        let mut k = b"t/".to_vec();
        k.extend_from_slice(txid.as_bytes());
        k
    }

    fn outpoint_suffix(txid: &str, n: u32) -> Vec<u8> {
        let mut k = txid.as_bytes().to_vec();
        k.push(b':');
        k.extend_from_slice(&n.to_be_bytes());
        k
    }

    fn output_key(txid: &str, n: u32) -> Vec<u8> {
        let mut k = b"o/".to_vec();
        k.extend(Self::outpoint_suffix(txid, n));
        k
    }

    fn spend_key(txid: &str, n: u32) -> Vec<u8> {
        let mut k = b"s/".to_vec();
        k.extend(Self::outpoint_suffix(txid, n));
        k
    }

    fn address_prefix(address: &str) -> Vec<u8> {
        let mut k = b"a/".to_vec();
        k.extend_from_slice(address.as_bytes());
        k.push(b'/');
        k
    }

    fn get_decoded<T: BorshDeserialize>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.mdb.get(key)? {
            Some(bytes) => Ok(Some(T::try_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn encode<T: BorshSerialize>(key: Vec<u8>, value: &T) -> Result<(Vec<u8>, Vec<u8>)> {
    Ok((key, borsh::to_vec(value)?))
}

impl GraphStore for RocksGraphStore {
    fn count_persisted_blocks(&self) -> Result<u64> {
        match self.mdb.get(Self::COUNT_KEY)? {
            Some(bytes) => {
                let arr: [u8; 8] =
                    bytes.as_slice().try_into().map_err(|_| anyhow!("invalid block count value"))?;
                Ok(u64::from_le_bytes(arr))
            }
            None => Ok(0),
        }
    }

    fn find_block_by_hash(&self, hash: &str) -> Result<Option<BlockNode>> {
        self.get_decoded(&Self::block_key(hash))
    }

    fn find_block_by_height(&self, height: u64) -> Result<Option<BlockNode>> {
        let Some(hash) = self.mdb.get(&Self::height_key(height))? else {
            return Ok(None);
        };
        let hash = String::from_utf8(hash).map_err(|e| anyhow!("invalid block hash UTF-8: {}", e))?;
        let block = self
            .find_block_by_hash(&hash)?
            .ok_or_else(|| anyhow!("height {height} points at missing block {hash}"))?;
        Ok(Some(block))
    }

    fn find_transaction(&self, txid: &str) -> Result<Option<TransactionNode>> {
        self.get_decoded(&Self::tx_key(txid))
    }

    fn find_output(&self, txid: &str, n: u32) -> Result<Option<OutputNode>> {
        self.get_decoded(&Self::output_key(txid, n))
    }

    fn find_address_outputs(&self, address: &str) -> Result<Vec<OutputNode>> {
        let links = self.mdb.scan_prefix(&Self::address_prefix(address))?;
        let keys = links
            .iter()
            .map(|(_, v)| -> Result<Vec<u8>> {
                let op = OutPointRef::try_from_slice(v)?;
                Ok(Self::output_key(&op.txid, op.n))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(keys.len());
        for (key, found) in keys.iter().zip(self.mdb.multi_get(&keys)?) {
            let bytes = found.ok_or_else(|| {
                anyhow!("address link points at missing output {}", String::from_utf8_lossy(key))
            })?;
            out.push(OutputNode::try_from_slice(&bytes)?);
        }
        Ok(out)
    }

    fn find_spender(&self, txid: &str, n: u32) -> Result<Option<SpendEdge>> {
        self.get_decoded(&Self::spend_key(txid, n))
    }

    fn save(&self, graph: &BlockGraph) -> Result<()> {
        ensure_appendable(self, graph)?;
        let count = self.count_persisted_blocks()?;

        // encode everything first so a serialization failure writes nothing
        let block = borsh::to_vec(&graph.block)?;
        let txs = graph
            .transactions
            .iter()
            .map(|t| encode(Self::tx_key(&t.txid), t))
            .collect::<Result<Vec<_>>>()?;
        let outputs = graph
            .outputs
            .iter()
            .map(|o| encode(Self::output_key(&o.txid, o.n), o))
            .collect::<Result<Vec<_>>>()?;
        let spends = graph
            .spends
            .iter()
            .map(|s| encode(Self::spend_key(&s.prev_txid, s.vout), s))
            .collect::<Result<Vec<_>>>()?;
        let links = graph
            .address_links
            .iter()
            .map(|l| {
                let mut key = Self::address_prefix(&l.address);
                key.extend(Self::outpoint_suffix(&l.outpoint.txid, l.outpoint.n));
                encode(key, &l.outpoint)
            })
            .collect::<Result<Vec<_>>>()?;

        // A txid seen again (the duplicated coinbases at mainnet heights 91842 and 91880)
        // replaces the earlier `t/` and `o/` rows, as bitcoind replaced those outputs.
        // Both blocks keep the txid in their `txids` list.
        self.mdb
            .bulk_write(|wb| {
                wb.put(&Self::block_key(graph.hash()), &block);
                wb.put(&Self::height_key(graph.height()), graph.hash().as_bytes());
                for (k, v) in txs.iter().chain(&outputs).chain(&spends).chain(&links) {
                    wb.put(k, v);
                }
                wb.put(Self::COUNT_KEY, &(count + 1).to_le_bytes());
            })
            .with_context(|| format!("writing block {} at height {}", graph.hash(), graph.height()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregator::BlockAggregator;
    use crate::graph::mapper::map_block;
    use crate::test_utils::{ChainBuilder, MockBitcoinNode};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn graphs(blocks: u32) -> Vec<BlockGraph> {
        let chain = ChainBuilder::new().add_blocks(blocks).with_payments().build();
        let node = Arc::new(MockBitcoinNode::from_chain(&chain));
        let agg = BlockAggregator::new(node, []);
        (1..=blocks as u64).map(|h| map_block(&agg.fetch_block(h).unwrap()).unwrap()).collect()
    }

    #[test]
    fn test_save_and_lookup() {
        let temp = TempDir::new().unwrap();
        let store = RocksGraphStore::open(temp.path()).unwrap();
        let graphs = graphs(2);

        assert_eq!(store.count_persisted_blocks().unwrap(), 0);
        for g in &graphs {
            store.save(g).unwrap();
        }
        assert_eq!(store.count_persisted_blocks().unwrap(), 2);

        let second = &graphs[1];
        assert_eq!(store.find_block_by_hash(second.hash()).unwrap().as_ref(), Some(&second.block));
        assert_eq!(store.find_block_by_height(2).unwrap().as_ref(), Some(&second.block));
        assert_eq!(store.find_block_by_height(3).unwrap(), None);

        let payment = &second.transactions[1];
        assert_eq!(store.find_transaction(&payment.txid).unwrap().as_ref(), Some(payment));
        let out = store.find_output(&payment.txid, 0).unwrap().unwrap();
        assert_eq!(out, second.outputs[1]);
    }

    #[test]
    fn test_spender_and_address_index() {
        let temp = TempDir::new().unwrap();
        let store = RocksGraphStore::open(temp.path()).unwrap();
        let graphs = graphs(2);
        for g in &graphs {
            store.save(g).unwrap();
        }

        let coinbase_1 = &graphs[0].transactions[0].txid;
        let spend = store.find_spender(coinbase_1, 0).unwrap().unwrap();
        assert_eq!(spend.spender_txid, graphs[1].transactions[1].txid);
        assert_eq!(store.find_spender(coinbase_1, 1).unwrap(), None);

        let paid = &graphs[0].outputs[0];
        let address = &paid.addresses[0];
        let outputs = store.find_address_outputs(address).unwrap();
        assert!(outputs.contains(paid));
        assert!(store.find_address_outputs("unknown").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_block_rejected() {
        let temp = TempDir::new().unwrap();
        let store = RocksGraphStore::open(temp.path()).unwrap();
        let graphs = graphs(1);

        store.save(&graphs[0]).unwrap();
        let err = store.save(&graphs[0]).unwrap_err();
        assert!(err.to_string().contains("already stored"));
        assert_eq!(store.count_persisted_blocks().unwrap(), 1);
    }

    #[test]
    fn test_gap_rejected() {
        let temp = TempDir::new().unwrap();
        let store = RocksGraphStore::open(temp.path()).unwrap();
        let graphs = graphs(3);

        store.save(&graphs[0]).unwrap();
        let err = store.save(&graphs[2]).unwrap_err();
        assert!(err.to_string().contains("block 2 is missing"));
        assert_eq!(store.find_block_by_height(3).unwrap(), None);
    }

    #[test]
    fn test_repeated_txid_takes_the_later_block() {
        let temp = TempDir::new().unwrap();
        let store = RocksGraphStore::open(temp.path()).unwrap();
        let mut graphs = graphs(3);
        store.save(&graphs[0]).unwrap();
        store.save(&graphs[1]).unwrap();

        // block 3 repeats the coinbase of block 1
        let mut repeated = graphs[0].transactions[0].clone();
        repeated.block_height = 3;
        let mut repeated_out = graphs[0].outputs[0].clone();
        repeated_out.block_height = 3;
        let txid = repeated.txid.clone();
        graphs[2].block.txids.push(txid.clone());
        graphs[2].transactions.push(repeated);
        graphs[2].outputs.push(repeated_out);
        store.save(&graphs[2]).unwrap();

        assert_eq!(store.find_transaction(&txid).unwrap().unwrap().block_height, 3);
        assert_eq!(store.find_output(&txid, 0).unwrap().unwrap().block_height, 3);
        let first = store.find_block_by_height(1).unwrap().unwrap();
        assert!(first.txids.contains(&txid));
        // the spend recorded by block 2 stays
        assert!(store.find_spender(&txid, 0).unwrap().is_some());
    }

    #[test]
    fn test_reopen_keeps_count() {
        let temp = TempDir::new().unwrap();
        let graphs = graphs(2);
        {
            let store = RocksGraphStore::open(temp.path()).unwrap();
            store.save(&graphs[0]).unwrap();
        }
        let store = RocksGraphStore::open(temp.path()).unwrap();
        assert_eq!(store.count_persisted_blocks().unwrap(), 1);
        store.save(&graphs[1]).unwrap();
        assert_eq!(store.count_persisted_blocks().unwrap(), 2);
    }
}
