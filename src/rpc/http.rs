//! JSON-RPC over HTTP with basic authentication.

use super::{JsonRpcRequest, JsonRpcResponse, Transport};
use crate::error::{Error, Result, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;

/// HTTP transport to a node's RPC port.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    user: String,
    password: String,
}

impl HttpTransport {
    /// Transport for `addr` with the given credentials and per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the HTTP client cannot be built.
    pub fn new(
        addr: SocketAddr,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("regtest-harness/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("http://{addr}/"),
            user: user.into(),
            password: password.into(),
        })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Http(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        req: &JsonRpcRequest,
    ) -> std::result::Result<JsonRpcResponse, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(req)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        // Nodes report RPC errors with a 4xx/5xx status and a JSON body,
        // so decode first and only fall back to the status when that fails.
        let status = response.status();
        let body = response.bytes().await.map_err(|e| classify(&e))?;

        match serde_json::from_slice::<JsonRpcResponse>(&body) {
            Ok(decoded) => Ok(decoded),
            Err(_) if !status.is_success() => Err(TransportError::Http(status.to_string())),
            Err(e) => Err(TransportError::Decode(e.to_string())),
        }
    }
}
