// bitcoind JSON-RPC client
// Plain HTTP + JSON-RPC with basic auth, one POST per call, no retries.

use crate::error::RpcError;
use crate::schemas::{RawTransaction, RpcBlock};
use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitcoin::{BlockHash, Txid};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// The four node calls the indexer needs.
pub trait NodeRpc: Send + Sync {
    /// Height of the node's best chain tip.
    fn get_block_count(&self) -> Result<u64, RpcError>;
    fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError>;
    /// Header fields and txid list (`verbosity = 1`).
    fn get_block(&self, hash: &BlockHash) -> Result<RpcBlock, RpcError>;
    fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, RpcError>;
}

impl<T: NodeRpc + ?Sized> NodeRpc for Arc<T> {
    fn get_block_count(&self) -> Result<u64, RpcError> {
        (**self).get_block_count()
    }

    fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        (**self).get_block_hash(height)
    }

    fn get_block(&self, hash: &BlockHash) -> Result<RpcBlock, RpcError> {
        (**self).get_block(hash)
    }

    fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, RpcError> {
        (**self).get_raw_transaction(txid)
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'a str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorDetail>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcErrorDetail {
    code: i32,
    message: String,
}

pub struct BitcoindClient {
    url: String,
    auth: Option<String>,
    client: reqwest::blocking::Client,
    request_id: AtomicU64,
}

impl BitcoindClient {
    pub fn new(url: &str, auth: Option<(String, String)>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let auth_header = auth.map(|(user, pass)| basic_auth_header(&user, &pass));

        Ok(Self { url: url.to_string(), auth: auth_header, client, request_id: AtomicU64::new(1) })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn rpc_call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, RpcError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest { jsonrpc: "1.0", id, method, params };

        let mut req =
            self.client.post(&self.url).header(CONTENT_TYPE, "application/json").json(&request);
        if let Some(ref auth) = self.auth {
            req = req.header(AUTHORIZATION, auth);
        }

        tracing::trace!(method, id, "bitcoind call");
        let response = req
            .send()
            .map_err(|e| RpcError::transport(format!("HTTP request failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| RpcError::transport(format!("failed to read response body: {e}")))?;

        decode_response(status, &body)
    }
}

impl NodeRpc for BitcoindClient {
    fn get_block_count(&self) -> Result<u64, RpcError> {
        self.rpc_call("getblockcount", vec![])
    }

    fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        self.rpc_call("getblockhash", vec![json!(height)])
    }

    fn get_block(&self, hash: &BlockHash) -> Result<RpcBlock, RpcError> {
        self.rpc_call("getblock", vec![json!(hash.to_string()), json!(1)])
    }

    fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, RpcError> {
        self.rpc_call("getrawtransaction", vec![json!(txid.to_string()), json!(1)])
    }
}

pub fn basic_auth_header(user: &str, pass: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{user}:{pass}")))
}

/// Classify a raw HTTP answer from bitcoind.
///
/// bitcoind reports RPC failures with a non-2xx status *and* a JSON body carrying `error`,
/// so the body is inspected before the status. A body that is not JSON-RPC at all (401 from
/// a bad password, a proxy page, ...) is a transport failure.
pub(crate) fn decode_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, RpcError> {
    let success = (200..300).contains(&status);

    let envelope: JsonRpcResponse = match serde_json::from_str(body) {
        Ok(env) => env,
        Err(_) if !success => {
            return Err(RpcError::transport(format!("HTTP {status}: {}", snippet(body))));
        }
        Err(e) => {
            return Err(RpcError::transport(format!("Failed to parse JSON-RPC response: {e}")));
        }
    };

    if let Some(err) = envelope.error {
        return Err(RpcError::Protocol { code: err.code, message: err.message });
    }
    if !success {
        return Err(RpcError::transport(format!("HTTP {status} without an error object")));
    }

    let result =
        envelope.result.ok_or_else(|| RpcError::transport("Missing result field in response"))?;
    serde_json::from_value(result)
        .map_err(|e| RpcError::transport(format!("Failed to decode result: {e}")))
}

fn snippet(body: &str) -> &str {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_decodes_result() {
        let count: u64 = decode_response(200, r#"{"result":812345,"error":null,"id":1}"#).unwrap();
        assert_eq!(count, 812345);
    }

    #[test]
    fn test_error_body_with_500_is_protocol_error() {
        let body = r#"{"result":null,"error":{"code":-8,"message":"Block height out of range"},"id":3}"#;
        let err = decode_response::<String>(500, body).unwrap_err();
        assert_eq!(
            err,
            RpcError::Protocol { code: -8, message: "Block height out of range".to_string() }
        );
    }

    #[test]
    fn test_non_json_failure_is_transport_error() {
        let err = decode_response::<u64>(401, "").unwrap_err();
        assert!(matches!(err, RpcError::Transport(ref m) if m.starts_with("HTTP 401")));
    }

    #[test]
    fn test_missing_result_is_transport_error() {
        let err = decode_response::<u64>(200, r#"{"id":1}"#).unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[test]
    fn test_wrong_result_type_is_transport_error() {
        let err = decode_response::<u64>(200, r#"{"result":"abc","error":null}"#).unwrap_err();
        assert!(matches!(err, RpcError::Transport(ref m) if m.contains("decode result")));
    }

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth_header("user", "pass"), "Basic dXNlcjpwYXNz");
    }
}
