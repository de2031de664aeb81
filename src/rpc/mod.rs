//! Typed JSON-RPC client for one node's RPC endpoint.
//!
//! ```text
//! RpcClient ──▶ JsonRpcRequest ──▶ dyn Transport ──▶ node
//!     ▲                                  │
//!     └──── typed result ◀── JsonRpcResponse
//! ```
//!
//! The [`Transport`] trait is the seam between the harness and the wire:
//! [`http::HttpTransport`] talks to real nodes, tests plug in a mock.
#![allow(missing_docs)]

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

use crate::error::{Error, Result, TransportError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub use http::HttpTransport;

/// A generic transport for sending JSON-RPC requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a JSON-RPC request and returns the response.
    async fn send(
        &self,
        req: &JsonRpcRequest,
    ) -> std::result::Result<JsonRpcResponse, TransportError>;
}

/// A JSON-RPC request object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>, id: u64) -> Self {
        Self {
            jsonrpc: "1.0",
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC response object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: Value,
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// How `addnode` should treat the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddNodeCommand {
    /// Persistently add the peer.
    Add,
    /// Remove a persistently added peer.
    Remove,
    /// Try a single outbound connection.
    OneTry,
}

impl AddNodeCommand {
    fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::OneTry => "onetry",
        }
    }
}

/// One entry of `getpeerinfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerInfo {
    pub id: i64,
    pub addr: String,
    /// Protocol version; zero until the version handshake completes.
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub inbound: bool,
}

/// Typed request/response channel to a single node.
pub struct RpcClient {
    index: usize,
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Client for node `index` over an arbitrary transport.
    #[must_use]
    pub fn new(index: usize, transport: Arc<dyn Transport>) -> Self {
        Self {
            index,
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// Index of the node this client talks to.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Issue a raw call and decode its result.
    ///
    /// # Errors
    ///
    /// `Error::RpcFailure` on transport failure, `Error::Rpc` if the node
    /// returned an error object, `Error::Serialization` if the result has
    /// an unexpected shape.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(method, params, id);

        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|source| Error::RpcFailure {
                index: self.index,
                method: method.to_string(),
                source,
            })?;

        if let Some(err) = response.error {
            return Err(Error::Rpc {
                index: self.index,
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }

        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| {
            Error::Serialization(format!(
                "node {} returned unexpected {method} result: {e}",
                self.index
            ))
        })
    }

    /// Mine `blocks` blocks and return their hashes.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn generate(&self, blocks: u32) -> Result<Vec<String>> {
        debug!("Node {} generating {} blocks", self.index, blocks);
        self.call("generate", vec![json!(blocks)]).await
    }

    /// Current chain height.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn get_block_count(&self) -> Result<u64> {
        self.call("getblockcount", vec![]).await
    }

    /// Hash of the current tip.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn get_best_block_hash(&self) -> Result<String> {
        self.call("getbestblockhash", vec![]).await
    }

    /// Set the node's simulated clock; `0` restores the real clock.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn set_mock_time(&self, timestamp: u64) -> Result<()> {
        self.call("setmocktime", vec![json!(timestamp)]).await
    }

    /// Ask the node to connect to (or forget) a peer.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn add_node(&self, peer: SocketAddr, command: AddNodeCommand) -> Result<()> {
        self.call(
            "addnode",
            vec![json!(peer.to_string()), json!(command.as_str())],
        )
        .await
    }

    /// Drop an established connection to `peer`.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn disconnect_node(&self, peer: SocketAddr) -> Result<()> {
        self.call("disconnectnode", vec![json!(peer.to_string())])
            .await
    }

    /// Connected peers.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn get_peer_info(&self) -> Result<Vec<PeerInfo>> {
        self.call("getpeerinfo", vec![]).await
    }

    /// Request graceful shutdown. Returns as soon as the node acknowledges.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn stop(&self) -> Result<()> {
        let _: Value = self.call("stop", vec![]).await?;
        Ok(())
    }

    /// Store a tweak value under a dotted key.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn set_tweak(&self, key: &str, value: &str) -> Result<()> {
        let _: Value = self
            .call("set", vec![json!(format!("{key}={value}"))])
            .await?;
        Ok(())
    }

    /// Query tweaks: exact key, `prefix.*`, or everything when `None`/`"*"`.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn get_tweaks(&self, query: Option<&str>) -> Result<BTreeMap<String, Value>> {
        let params = query.map(|q| vec![json!(q)]).unwrap_or_default();
        self.call("get", params).await
    }
}
