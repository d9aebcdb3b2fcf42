use bitcoin::{BlockHash, Txid};
use thiserror::Error;

/// Failure of a single node RPC call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The node answered with an `error` object (unknown hash, bad params, ...).
    #[error("node error {code}: {message}")]
    Protocol { code: i32, message: String },
    /// Connection, timeout, HTTP or decoding failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RpcError {
    pub fn transport(msg: impl Into<String>) -> Self {
        RpcError::Transport(msg.into())
    }
}

/// Why a block aggregate could not be produced. There is never a partial aggregate.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("getblockhash({height}) failed: {source}")]
    BlockHash { height: u64, source: RpcError },

    #[error("getblock({hash}) failed: {source}")]
    Block { hash: BlockHash, source: RpcError },

    #[error("getrawtransaction({txid}) failed: {source}")]
    Transaction { txid: Txid, source: RpcError },

    #[error("node returned block {actual} while {expected} was requested")]
    HeightMismatch { expected: u64, actual: u64 },
}

impl FetchError {
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            FetchError::BlockHash { source, .. }
            | FetchError::Block { source, .. }
            | FetchError::Transaction { source, .. } => Some(source),
            FetchError::HeightMismatch { .. } => None,
        }
    }
}
