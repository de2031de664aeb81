//! Error types for regtest-harness.

use crate::barrier::ChainSnapshot;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// JSON-RPC error code a node returns while it is still loading its chain.
pub const RPC_IN_WARMUP: i64 = -28;

/// Transport-level failures talking to a node's RPC endpoint.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The endpoint refused or reset the connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request did not complete within the transport timeout.
    #[error("request timed out")]
    Timeout,

    /// Non-JSON HTTP failure (e.g. 401 with an empty body).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The response body was not a JSON-RPC response.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Errors that can occur while orchestrating a node cluster.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Node process failed to reach the ready state.
    #[error("node {index} failed to start: {reason}")]
    StartupFailure {
        /// Node index.
        index: usize,
        /// Why startup was abandoned.
        reason: String,
    },

    /// One or more node processes outlived the shutdown timeout.
    #[error("nodes {indices:?} still running after {timeout:?}")]
    ShutdownTimeout {
        /// Indices of the processes that did not exit.
        indices: Vec<usize>,
        /// How long the harness waited.
        timeout: Duration,
    },

    /// A convergence predicate never held within the timeout.
    #[error("nodes did not converge within {timeout:?} (last observed heights {:?})", .last.heights())]
    SyncTimeout {
        /// How long the barrier waited.
        timeout: Duration,
        /// The last snapshot taken before giving up.
        last: ChainSnapshot,
    },

    /// Transport failure talking to a node.
    #[error("RPC {method} to node {index} failed: {source}")]
    RpcFailure {
        /// Node index.
        index: usize,
        /// RPC method name.
        method: String,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },

    /// The node answered with a JSON-RPC error object.
    #[error("RPC {method} on node {index} returned error {code}: {message}")]
    Rpc {
        /// Node index.
        index: usize,
        /// RPC method name.
        method: String,
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the node.
        message: String,
    },

    /// Observed node state did not match the expectation.
    #[error("assertion failed on node {index}: expected {expected}, got {actual}")]
    AssertionFailure {
        /// Node index whose state diverged.
        index: usize,
        /// Expected value.
        expected: String,
        /// Observed value.
        actual: String,
    },

    /// The node is stopping, stopped or was never started.
    #[error("node {index} is not running")]
    NodeUnavailable {
        /// Node index.
        index: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this is a convergence timeout rather than an infrastructure failure.
    #[must_use]
    pub fn is_sync_timeout(&self) -> bool {
        matches!(self, Self::SyncTimeout { .. })
    }

    /// The last snapshot carried by a [`Error::SyncTimeout`].
    #[must_use]
    pub fn sync_snapshot(&self) -> Option<&ChainSnapshot> {
        match self {
            Self::SyncTimeout { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Infrastructure errors that abort a scenario outright.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StartupFailure { .. }
                | Self::ShutdownTimeout { .. }
                | Self::RpcFailure { .. }
                | Self::Io(_)
        )
    }

    /// Errors that mean "node not up yet" while waiting for readiness.
    pub(crate) fn is_transient_startup(&self) -> bool {
        match self {
            Self::RpcFailure { .. } => true,
            Self::Rpc { code, .. } => *code == RPC_IN_WARMUP,
            _ => false,
        }
    }

    pub(crate) fn assertion(
        index: usize,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::AssertionFailure {
            index,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
