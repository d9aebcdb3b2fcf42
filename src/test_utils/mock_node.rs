use crate::bitcoind::NodeRpc;
use crate::error::RpcError;
use crate::schemas::{
    BlockHeaderInfo, RawScriptPubKey, RawScriptSig, RawTransaction, RawTxInput, RawTxOutput,
    RpcBlock,
};
use bitcoin::consensus::encode::serialize;
use bitcoin::{Address, Block, BlockHash, Network, Transaction, Txid};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// How many times each RPC was called.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub get_block_count: u64,
    pub get_block_hash: u64,
    pub get_block: u64,
    pub get_raw_transaction: u64,
}

#[derive(Default)]
struct NodeState {
    /// index == height
    blocks: Vec<Block>,
    hash_to_height: HashMap<BlockHash, u64>,
    txs: HashMap<Txid, (Transaction, u64)>,
    count_override: Option<u64>,
    count_failure: Option<RpcError>,
    hash_failures: HashMap<u64, RpcError>,
    block_failures: HashMap<u64, RpcError>,
    tx_failures: HashSet<Txid>,
}

/// In-memory bitcoind speaking the indexer's [`NodeRpc`] surface.
///
/// Like bitcoind, it refuses `getrawtransaction` for the genesis coinbase. Failures can be
/// scripted per call and height, and every call is counted.
#[derive(Default)]
pub struct MockBitcoinNode {
    state: Mutex<NodeState>,
    count_calls: AtomicU64,
    hash_calls: AtomicU64,
    block_calls: AtomicU64,
    tx_calls: AtomicU64,
}

impl MockBitcoinNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node serving `blocks`, genesis first.
    pub fn from_chain(blocks: &[Block]) -> Self {
        let node = Self::new();
        node.set_chain(blocks.to_vec());
        node
    }

    /// Replace the whole chain, keeping scripted failures.
    pub fn set_chain(&self, blocks: Vec<Block>) {
        let mut st = self.lock();
        st.blocks.clear();
        st.hash_to_height.clear();
        st.txs.clear();
        for block in blocks {
            Self::append(&mut st, block);
        }
    }

    /// Extend the tip by one block.
    pub fn push_block(&self, block: Block) {
        Self::append(&mut self.lock(), block);
    }

    fn append(st: &mut NodeState, block: Block) {
        let height = st.blocks.len() as u64;
        st.hash_to_height.insert(block.block_hash(), height);
        for tx in &block.txdata {
            st.txs.insert(tx.compute_txid(), (tx.clone(), height));
        }
        st.blocks.push(block);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tip_height(&self) -> u64 {
        (self.lock().blocks.len() as u64).saturating_sub(1)
    }

    pub fn block_hash_at(&self, height: u64) -> Option<BlockHash> {
        self.lock().blocks.get(height as usize).map(|b| b.block_hash())
    }

    pub fn txids_at(&self, height: u64) -> Vec<Txid> {
        self.lock()
            .blocks
            .get(height as usize)
            .map(|b| b.txdata.iter().map(|tx| tx.compute_txid()).collect())
            .unwrap_or_default()
    }

    /// Make `getblockcount` report `count` instead of the real tip.
    pub fn set_block_count(&self, count: u64) {
        self.lock().count_override = Some(count);
    }

    pub fn fail_block_count(&self, err: Option<RpcError>) {
        self.lock().count_failure = err;
    }

    pub fn fail_block_hash(&self, height: u64, err: RpcError) {
        self.lock().hash_failures.insert(height, err);
    }

    pub fn fail_block(&self, height: u64, err: RpcError) {
        self.lock().block_failures.insert(height, err);
    }

    /// `getrawtransaction` answers "No such mempool or blockchain transaction" for `txid`.
    pub fn fail_transaction(&self, txid: Txid) {
        self.lock().tx_failures.insert(txid);
    }

    pub fn clear_failures(&self) {
        let mut st = self.lock();
        st.count_failure = None;
        st.hash_failures.clear();
        st.block_failures.clear();
        st.tx_failures.clear();
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            get_block_count: self.count_calls.load(Ordering::SeqCst),
            get_block_hash: self.hash_calls.load(Ordering::SeqCst),
            get_block: self.block_calls.load(Ordering::SeqCst),
            get_raw_transaction: self.tx_calls.load(Ordering::SeqCst),
        }
    }

    fn header_info(st: &NodeState, height: u64) -> BlockHeaderInfo {
        let block = &st.blocks[height as usize];
        let tip = st.blocks.len() as u64 - 1;
        BlockHeaderInfo {
            hash: block.block_hash(),
            confirmations: (tip - height + 1) as i64,
            height,
            version: block.header.version.to_consensus(),
            merkleroot: block.header.merkle_root.to_string(),
            time: block.header.time as u64,
            mediantime: Some(block.header.time as u64),
            nonce: block.header.nonce,
            bits: format!("{:08x}", block.header.bits.to_consensus()),
            difficulty: 1.0,
            size: serialize(block).len() as u64,
            weight: Some(block.weight().to_wu()),
            previousblockhash: (height > 0).then_some(block.header.prev_blockhash),
            nextblockhash: st.blocks.get(height as usize + 1).map(|b| b.block_hash()),
        }
    }
}

/// Verbose `getrawtransaction` view of a transaction.
pub fn raw_transaction(tx: &Transaction, block: Option<(BlockHash, u32)>) -> RawTransaction {
    let vin = tx
        .input
        .iter()
        .map(|input| {
            let sig_hex = hex::encode(input.script_sig.as_bytes());
            let witness: Vec<String> = input.witness.iter().map(hex::encode).collect();
            if input.previous_output.is_null() {
                RawTxInput {
                    coinbase: Some(sig_hex),
                    txid: None,
                    vout: None,
                    script_sig: None,
                    txinwitness: (!witness.is_empty()).then_some(witness),
                    sequence: input.sequence.0,
                }
            } else {
                RawTxInput {
                    coinbase: None,
                    txid: Some(input.previous_output.txid),
                    vout: Some(input.previous_output.vout),
                    script_sig: Some(RawScriptSig {
                        asm: input.script_sig.to_asm_string(),
                        hex: sig_hex,
                    }),
                    txinwitness: (!witness.is_empty()).then_some(witness),
                    sequence: input.sequence.0,
                }
            }
        })
        .collect();

    let vout = tx
        .output
        .iter()
        .enumerate()
        .map(|(n, out)| {
            let spk = &out.script_pubkey;
            let kind = if spk.is_p2wpkh() {
                "witness_v0_keyhash"
            } else if spk.is_p2pkh() {
                "pubkeyhash"
            } else {
                "nonstandard"
            };
            RawTxOutput {
                value: out.value.to_btc(),
                n: n as u32,
                script_pub_key: RawScriptPubKey {
                    asm: spk.to_asm_string(),
                    hex: hex::encode(spk.as_bytes()),
                    kind: Some(kind.to_string()),
                    address: Address::from_script(spk, Network::Regtest).ok().map(|a| a.to_string()),
                    addresses: Vec::new(),
                },
            }
        })
        .collect();

    RawTransaction {
        txid: tx.compute_txid(),
        hash: Some(tx.compute_wtxid().to_string()),
        size: tx.total_size() as u64,
        vsize: tx.vsize() as u64,
        version: tx.version.0 as i64,
        locktime: tx.lock_time.to_consensus_u32(),
        vin,
        vout,
        blockhash: block.map(|(h, _)| h),
        blocktime: block.map(|(_, t)| t as u64),
    }
}

impl NodeRpc for MockBitcoinNode {
    fn get_block_count(&self) -> Result<u64, RpcError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        let st = self.lock();
        if let Some(err) = &st.count_failure {
            return Err(err.clone());
        }
        Ok(st.count_override.unwrap_or((st.blocks.len() as u64).saturating_sub(1)))
    }

    fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        self.hash_calls.fetch_add(1, Ordering::SeqCst);
        let st = self.lock();
        if let Some(err) = st.hash_failures.get(&height) {
            return Err(err.clone());
        }
        st.blocks.get(height as usize).map(|b| b.block_hash()).ok_or_else(|| RpcError::Protocol {
            code: -8,
            message: "Block height out of range".to_string(),
        })
    }

    fn get_block(&self, hash: &BlockHash) -> Result<RpcBlock, RpcError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        let st = self.lock();
        let height = *st.hash_to_height.get(hash).ok_or_else(|| RpcError::Protocol {
            code: -5,
            message: "Block not found".to_string(),
        })?;
        if let Some(err) = st.block_failures.get(&height) {
            return Err(err.clone());
        }
        let tx = st.blocks[height as usize].txdata.iter().map(|t| t.compute_txid()).collect();
        Ok(RpcBlock { header: Self::header_info(&st, height), tx })
    }

    fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, RpcError> {
        self.tx_calls.fetch_add(1, Ordering::SeqCst);
        let st = self.lock();
        let not_found = || RpcError::Protocol {
            code: -5,
            message: "No such mempool or blockchain transaction".to_string(),
        };
        if st.tx_failures.contains(txid) {
            return Err(not_found());
        }
        let (tx, height) = st.txs.get(txid).ok_or_else(not_found)?;
        if *height == 0 {
            return Err(RpcError::Protocol {
                code: -5,
                message: "The genesis block coinbase is not considered an ordinary transaction and cannot be retrieved".to_string(),
            });
        }
        let block = &st.blocks[*height as usize];
        Ok(raw_transaction(tx, Some((block.block_hash(), block.header.time))))
    }
}
