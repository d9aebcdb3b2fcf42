use bitcoin::script::ScriptBuf;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, OutPoint, Sequence, Transaction, TxIn, TxMerkleNode,
    TxOut, WPubkeyHash, Witness,
    block::{Header, Version},
    hashes::{Hash, sha256d},
};

pub const COINBASE_REWARD: Amount = Amount::from_sat(50 * 100_000_000);
pub const PAYMENT_AMOUNT: Amount = Amount::from_sat(30 * 100_000_000);
pub const PAYMENT_FEE: Amount = Amount::from_sat(1_000_000);

/// Builder for synthetic regtest chains.
///
/// Every block has a coinbase paying 50 BTC to a P2WPKH address unique to its height.
/// With [`ChainBuilder::with_payments`], every block from height 2 also carries one payment
/// spending the previous block's coinbase into a payment output and a change output.
pub struct ChainBuilder {
    blocks: u32,
    salt: u64,
    payments: bool,
}

impl ChainBuilder {
    /// Start from a regtest-like genesis block.
    pub fn new() -> Self {
        Self { blocks: 0, salt: 0, payments: false }
    }

    /// Add a specified number of blocks on top of genesis.
    pub fn add_blocks(mut self, count: u32) -> Self {
        self.blocks += count;
        self
    }

    /// Change the salt to generate different block hashes.
    pub fn with_salt(mut self, salt: u64) -> Self {
        self.salt = salt;
        self
    }

    pub fn with_payments(mut self) -> Self {
        self.payments = true;
        self
    }

    /// Current tip height.
    pub fn height(&self) -> u32 {
        self.blocks
    }

    /// Build the chain; index == height.
    pub fn build(self) -> Vec<Block> {
        let mut chain: Vec<Block> = Vec::with_capacity(self.blocks as usize + 1);
        for height in 0..=self.blocks {
            let extra = if height == 0 { Vec::new() } else { self.salt.to_le_bytes().to_vec() };
            let mut txdata = vec![Self::create_coinbase_tx(height, &extra)];
            if self.payments && height >= 2 {
                let funding = chain[height as usize - 1].txdata[0].compute_txid();
                txdata.push(Self::create_payment_tx(funding, height));
            }

            let (prev_blockhash, time) = match chain.last() {
                Some(prev) => (prev.block_hash(), prev.header.time + 600),
                None => (BlockHash::all_zeros(), 1296688602),
            };
            let header = Header {
                version: Version::from_consensus(1),
                prev_blockhash,
                merkle_root: Self::compute_merkle_root(&txdata),
                time,
                bits: CompactTarget::from_consensus(0x207fffff), // Regtest difficulty
                nonce: if height == 0 { 2 } else { height + self.salt as u32 },
            };
            chain.push(Block { header, txdata });
        }
        chain
    }

    /// P2WPKH script for a deterministic test key.
    pub fn test_script(tag: u32) -> ScriptBuf {
        let mut bytes = [0u8; 20];
        bytes[..4].copy_from_slice(&tag.to_le_bytes());
        bytes[19] = 0xab;
        ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(bytes))
    }

    fn create_coinbase_tx(height: u32, extra_data: &[u8]) -> Transaction {
        // Create height script (BIP34)
        let mut height_script = vec![0x03];
        height_script.extend_from_slice(&height.to_le_bytes()[..3]);
        height_script.extend_from_slice(extra_data);

        let coinbase_input = TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(height_script),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        };

        let coinbase_output =
            TxOut { value: COINBASE_REWARD, script_pubkey: Self::test_script(height) };

        Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: bitcoin::locktime::absolute::LockTime::ZERO,
            input: vec![coinbase_input],
            output: vec![coinbase_output],
        }
    }

    fn create_payment_tx(funding: bitcoin::Txid, height: u32) -> Transaction {
        let mut witness = Witness::new();
        witness.push([0x30u8; 71]);
        witness.push([0x02u8; 33]);

        let input = TxIn {
            previous_output: OutPoint { txid: funding, vout: 0 },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness,
        };
        let change = COINBASE_REWARD - PAYMENT_AMOUNT - PAYMENT_FEE;

        Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: bitcoin::locktime::absolute::LockTime::ZERO,
            input: vec![input],
            output: vec![
                TxOut { value: PAYMENT_AMOUNT, script_pubkey: Self::test_script(1_000_000 + height) },
                TxOut { value: change, script_pubkey: Self::test_script(2_000_000 + height) },
            ],
        }
    }

    /// Compute merkle root from transactions
    fn compute_merkle_root(txs: &[Transaction]) -> TxMerkleNode {
        if txs.is_empty() {
            return TxMerkleNode::all_zeros();
        }

        let mut hashes: Vec<TxMerkleNode> = txs
            .iter()
            .map(|tx| TxMerkleNode::from_byte_array(tx.compute_txid().to_byte_array()))
            .collect();

        while hashes.len() > 1 {
            let mut next_level = Vec::new();
            for chunk in hashes.chunks(2) {
                let hash = if chunk.len() == 2 {
                    Self::hash_pair(chunk[0], chunk[1])
                } else {
                    // Duplicate last hash if odd number
                    Self::hash_pair(chunk[0], chunk[0])
                };
                next_level.push(hash);
            }
            hashes = next_level;
        }

        hashes[0]
    }

    fn hash_pair(a: TxMerkleNode, b: TxMerkleNode) -> TxMerkleNode {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(&a.to_byte_array());
        data.extend_from_slice(&b.to_byte_array());
        TxMerkleNode::from_byte_array(sha256d::Hash::hash(&data).to_byte_array())
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_builder_basic() {
        let chain = ChainBuilder::new().add_blocks(10).build();

        assert_eq!(chain.len(), 11); // Genesis + 10 blocks
        for i in 1..chain.len() {
            assert_eq!(chain[i].header.prev_blockhash, chain[i - 1].block_hash());
        }
    }

    #[test]
    fn test_payments_spend_previous_coinbase() {
        let chain = ChainBuilder::new().add_blocks(3).with_payments().build();

        assert_eq!(chain[1].txdata.len(), 1);
        for h in 2..=3 {
            let payment = &chain[h].txdata[1];
            assert_eq!(payment.input[0].previous_output.txid, chain[h - 1].txdata[0].compute_txid());
            assert_eq!(payment.output.len(), 2);
            assert!(chain[h].check_merkle_root());
        }
    }

    #[test]
    fn test_salt_changes_hashes() {
        let a = ChainBuilder::new().add_blocks(2).build();
        let b = ChainBuilder::new().add_blocks(2).with_salt(7).build();

        assert_eq!(a[0].block_hash(), b[0].block_hash());
        assert_ne!(a[2].block_hash(), b[2].block_hash());
    }
}
