use crate::core::aggregator::BlockAggregate;
use crate::graph::schemas::{
    AddressLink, BlockGraph, BlockNode, InputNode, OutPointRef, OutputNode, SpendEdge,
    TransactionNode,
};
use crate::schemas::{RawTransaction, RawTxInput};
use anyhow::{Context, Result, anyhow};
use bitcoin::Amount;

/// Turn a resolved block into its graph nodes and edges.
pub fn map_block(agg: &BlockAggregate) -> Result<BlockGraph> {
    let header = &agg.header;
    let block = BlockNode {
        height: agg.height,
        hash: agg.hash.to_string(),
        previous_hash: header.previousblockhash.map(|h| h.to_string()),
        merkle_root: header.merkleroot.clone(),
        version: header.version,
        time: header.time,
        median_time: header.mediantime,
        nonce: header.nonce,
        bits: header.bits.clone(),
        difficulty: header.difficulty,
        size: header.size,
        weight: header.weight,
        txids: agg.txids.iter().map(|t| t.to_string()).collect(),
    };

    let mut graph = BlockGraph {
        block,
        transactions: Vec::with_capacity(agg.transactions.len()),
        outputs: Vec::new(),
        spends: Vec::new(),
        address_links: Vec::new(),
    };

    // resolved transactions follow block order, so one walk over the txids places them all
    let mut listed = agg.txids.iter().enumerate();
    for tx in &agg.transactions {
        let index = listed
            .find_map(|(i, t)| (*t == tx.txid).then_some(i))
            .ok_or_else(|| anyhow!("transaction {} is not listed in block {}", tx.txid, agg.hash))?;
        map_transaction(&mut graph, tx, index as u32, agg.height)
            .with_context(|| format!("mapping transaction {}", tx.txid))?;
    }

    Ok(graph)
}

fn map_transaction(graph: &mut BlockGraph, tx: &RawTransaction, index: u32, height: u64) -> Result<()> {
    let txid = tx.txid.to_string();

    let mut inputs = Vec::with_capacity(tx.vin.len());
    for (input_index, vin) in tx.vin.iter().enumerate() {
        let node = map_input(vin).with_context(|| format!("input #{input_index}"))?;
        if let InputNode::Spend { prev_txid, vout, .. } = &node {
            graph.spends.push(SpendEdge {
                prev_txid: prev_txid.clone(),
                vout: *vout,
                spender_txid: txid.clone(),
                input_index: input_index as u32,
            });
        }
        inputs.push(node);
    }

    for vout in &tx.vout {
        let value = Amount::from_btc(vout.value)
            .with_context(|| format!("output #{} has invalid value {}", vout.n, vout.value))?;
        let addresses = vout.script_pub_key.all_addresses();
        for address in &addresses {
            graph.address_links.push(AddressLink {
                address: address.clone(),
                outpoint: OutPointRef { txid: txid.clone(), n: vout.n },
            });
        }
        graph.outputs.push(OutputNode {
            txid: txid.clone(),
            n: vout.n,
            value_sats: value.to_sat(),
            script_type: vout.script_pub_key.kind.clone(),
            script_hex: vout.script_pub_key.hex.clone(),
            addresses,
            block_height: height,
        });
    }

    graph.transactions.push(TransactionNode {
        txid,
        block_height: height,
        index,
        version: tx.version,
        locktime: tx.locktime,
        size: tx.size,
        vsize: tx.vsize,
        inputs,
        output_count: tx.vout.len() as u32,
    });
    Ok(())
}

fn map_input(vin: &RawTxInput) -> Result<InputNode> {
    if let Some(data) = &vin.coinbase {
        return Ok(InputNode::Coinbase { data: data.clone(), sequence: vin.sequence });
    }
    let prev_txid = vin.txid.ok_or_else(|| anyhow!("non-coinbase input without txid"))?;
    let vout = vin.vout.ok_or_else(|| anyhow!("non-coinbase input without vout"))?;
    Ok(InputNode::Spend {
        prev_txid: prev_txid.to_string(),
        vout,
        script_sig: vin.script_sig.as_ref().map(|s| s.hex.clone()),
        sequence: vin.sequence,
    })
}
