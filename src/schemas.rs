// Wire shapes of the bitcoind JSON-RPC results we consume.
use bitcoin::{BlockHash, Txid};
use serde::{Deserialize, Serialize};

/// Header part of `getblock <hash> 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeaderInfo {
    pub hash: BlockHash,
    #[serde(default)]
    pub confirmations: i64,
    pub height: u64,
    pub version: i32,
    pub merkleroot: String,
    pub time: u64,
    #[serde(default)]
    pub mediantime: Option<u64>,
    pub nonce: u32,
    pub bits: String,
    pub difficulty: f64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub weight: Option<u64>,
    #[serde(default)]
    pub previousblockhash: Option<BlockHash>,
    #[serde(default)]
    pub nextblockhash: Option<BlockHash>,
}

/// `getblock <hash> 1`: header fields plus the ordered txid list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcBlock {
    #[serde(flatten)]
    pub header: BlockHeaderInfo,
    pub tx: Vec<Txid>,
}

/// `getrawtransaction <txid> 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub txid: Txid,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub vsize: u64,
    pub version: i64,
    pub locktime: u32,
    pub vin: Vec<RawTxInput>,
    pub vout: Vec<RawTxOutput>,
    #[serde(default)]
    pub blockhash: Option<BlockHash>,
    #[serde(default)]
    pub blocktime: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTxInput {
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<Txid>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default, rename = "scriptSig")]
    pub script_sig: Option<RawScriptSig>,
    #[serde(default)]
    pub txinwitness: Option<Vec<String>>,
    pub sequence: u32,
}

impl RawTxInput {
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScriptSig {
    pub asm: String,
    pub hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTxOutput {
    /// Amount in BTC, as bitcoind prints it.
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RawScriptPubKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScriptPubKey {
    #[serde(default)]
    pub asm: String,
    pub hex: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// bitcoind >= 22
    #[serde(default)]
    pub address: Option<String>,
    /// bitcoind < 22
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl RawScriptPubKey {
    /// Addresses from both the legacy and the current field, deduplicated, in order.
    pub fn all_addresses(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.addresses.len() + 1);
        for a in self.address.iter().chain(self.addresses.iter()) {
            if !out.contains(a) {
                out.push(a.clone());
            }
        }
        out
    }
}
