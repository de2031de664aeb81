//! A programmable in-memory node for exercising the harness without processes.

use super::{JsonRpcRequest, JsonRpcResponse, Transport};
use crate::error::{TransportError, RPC_IN_WARMUP};
use crate::tweak::TweakSet;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Protocol version reported for peers once their handshake is done.
pub(crate) const HANDSHAKE_VERSION: i64 = 70_015;

/// Observable and tweakable state behind a [`MockTransport`].
#[derive(Debug)]
pub(crate) struct MockNodeState {
    pub height: u64,
    pub reachable: bool,
    /// Number of calls still answered with the warm-up error.
    pub warming_up: u32,
    pub mock_time: Option<u64>,
    pub tweaks: TweakSet,
    /// `(addr, version)` for each requested peer.
    pub peers: Vec<(String, i64)>,
    /// Version given to newly added peers.
    pub new_peer_version: i64,
    pub stopped: bool,
    /// Artificial latency applied to every call.
    pub latency: Duration,
    pub calls: Vec<String>,
    pub ids: Vec<u64>,
}

impl Default for MockNodeState {
    fn default() -> Self {
        Self {
            height: 0,
            reachable: true,
            warming_up: 0,
            mock_time: None,
            tweaks: TweakSet::default(),
            peers: Vec::new(),
            new_peer_version: HANDSHAKE_VERSION,
            stopped: false,
            latency: Duration::ZERO,
            calls: Vec::new(),
            ids: Vec::new(),
        }
    }
}

/// A transport that answers the harness's RPC surface from shared state.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockNodeState>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_height(height: u64) -> Self {
        let mock = Self::new();
        mock.state.lock().height = height;
        mock
    }

    pub(crate) fn state(&self) -> &Arc<Mutex<MockNodeState>> {
        &self.state
    }

    fn error(code: i64, message: &str) -> JsonRpcResponse {
        JsonRpcResponse {
            result: None,
            error: Some(super::JsonRpcError {
                code,
                message: message.to_string(),
            }),
            id: Value::Null,
        }
    }

    fn ok(result: Value) -> JsonRpcResponse {
        JsonRpcResponse {
            result: Some(result),
            error: None,
            id: Value::Null,
        }
    }

    fn dispatch(state: &mut MockNodeState, req: &JsonRpcRequest) -> JsonRpcResponse {
        let first = req.params.first();
        match req.method.as_str() {
            "getblockcount" => Self::ok(json!(state.height)),
            "getbestblockhash" => Self::ok(json!(format!("{:064x}", state.height))),
            "generate" => {
                let blocks = first.and_then(Value::as_u64).unwrap_or(0);
                let hashes: Vec<String> = (1..=blocks)
                    .map(|n| format!("{:064x}", state.height + n))
                    .collect();
                state.height += blocks;
                Self::ok(json!(hashes))
            }
            "setmocktime" => {
                let ts = first.and_then(Value::as_u64).unwrap_or(0);
                state.mock_time = (ts != 0).then_some(ts);
                Self::ok(Value::Null)
            }
            "addnode" => {
                let addr = first.and_then(Value::as_str).unwrap_or_default();
                state.peers.push((addr.to_string(), state.new_peer_version));
                Self::ok(Value::Null)
            }
            "disconnectnode" => {
                let addr = first.and_then(Value::as_str).unwrap_or_default();
                let before = state.peers.len();
                state.peers.retain(|(a, _)| a != addr);
                if state.peers.len() == before {
                    Self::error(-29, "Node not found in connected nodes")
                } else {
                    Self::ok(Value::Null)
                }
            }
            "getpeerinfo" => {
                let peers: Vec<Value> = state
                    .peers
                    .iter()
                    .enumerate()
                    .map(|(id, (addr, version))| {
                        json!({ "id": id, "addr": addr, "version": version, "inbound": false })
                    })
                    .collect();
                Self::ok(Value::Array(peers))
            }
            "stop" => {
                state.stopped = true;
                state.reachable = false;
                Self::ok(json!("Bitcoin server stopping"))
            }
            "set" => {
                let assignment = first.and_then(Value::as_str).unwrap_or_default();
                match state.tweaks.apply_assignment(assignment) {
                    Ok(()) => Self::ok(Value::Null),
                    Err(e) => Self::error(-8, &e.to_string()),
                }
            }
            "get" => {
                let query = first.and_then(Value::as_str);
                Self::ok(json!(state.tweaks.get(query)))
            }
            _ => Self::error(-32601, "Method not found"),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        req: &JsonRpcRequest,
    ) -> std::result::Result<JsonRpcResponse, TransportError> {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if !state.reachable {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        state.calls.push(req.method.clone());
        state.ids.push(req.id);

        if state.warming_up > 0 {
            state.warming_up -= 1;
            return Ok(Self::error(RPC_IN_WARMUP, "Loading block index..."));
        }

        Ok(Self::dispatch(&mut state, req))
    }
}
