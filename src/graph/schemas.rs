use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BlockNode {
    pub height: u64,
    pub hash: String,
    pub previous_hash: Option<String>,
    pub merkle_root: String,
    pub version: i32,
    pub time: u64,
    pub median_time: Option<u64>,
    pub nonce: u32,
    pub bits: String,
    pub difficulty: f64,
    pub size: u64,
    pub weight: Option<u64>,
    /// Every txid of the block in order, including ones never resolved.
    pub txids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct TransactionNode {
    pub txid: String,
    pub block_height: u64,
    /// Position inside the block.
    pub index: u32,
    pub version: i64,
    pub locktime: u32,
    pub size: u64,
    pub vsize: u64,
    pub inputs: Vec<InputNode>,
    pub output_count: u32,
}

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum InputNode {
    Coinbase { data: String, sequence: u32 },
    Spend { prev_txid: String, vout: u32, script_sig: Option<String>, sequence: u32 },
}

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct OutputNode {
    pub txid: String,
    pub n: u32,
    pub value_sats: u64,
    pub script_type: Option<String>,
    pub script_hex: String,
    pub addresses: Vec<String>,
    pub block_height: u64,
}

/// `(prev_txid, vout)` consumed by `spender_txid` at `input_index`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SpendEdge {
    pub prev_txid: String,
    pub vout: u32,
    pub spender_txid: String,
    pub input_index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct OutPointRef {
    pub txid: String,
    pub n: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct AddressLink {
    pub address: String,
    pub outpoint: OutPointRef,
}

/// Everything one block contributes to the graph. Saved atomically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockGraph {
    pub block: BlockNode,
    pub transactions: Vec<TransactionNode>,
    pub outputs: Vec<OutputNode>,
    pub spends: Vec<SpendEdge>,
    pub address_links: Vec<AddressLink>,
}

impl BlockGraph {
    pub fn height(&self) -> u64 {
        self.block.height
    }

    pub fn hash(&self) -> &str {
        &self.block.hash
    }
}
