//! HTTP client for the validator node API.
//!
//! Each node under test exposes three things the harness consumes: a
//! readiness probe (`GET /status`), an operation-submission endpoint
//! (`POST /operations`) and state reads (`GET /state/{key}`,
//! `GET /state/digest`). The [`NodeApi`] trait is the seam that lets the
//! load driver and the convergence checker run against scripted nodes in
//! unit tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-request timeout for node API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from talking to a validator node.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The node answered with an unexpected status code.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
    },
}

/// Address of one running validator instance.
///
/// Immutable once assigned: created at launch (or parsed from the external
/// endpoint list) and only dropped at shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeEndpoint(String);

impl NodeEndpoint {
    /// Create an endpoint from a base URL. A trailing slash is stripped so
    /// path joins stay predictable.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self(url.trim_end_matches('/').to_string())
    }

    /// The base URL.
    pub fn url(&self) -> &str {
        &self.0
    }

    /// Parse a comma-separated endpoint list, skipping empty entries.
    pub fn parse_list(list: &str) -> Vec<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Self::new)
            .collect()
    }
}

impl std::fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compact, comparable summary of a node's current ledger state.
///
/// Two nodes agree on the ledger exactly when their digests compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDigest {
    /// Current block height.
    pub height: u64,
    /// Identifier of the head block.
    pub head: String,
}

/// One state-mutating operation with its deterministic expected outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Key to set.
    pub key: String,
    /// Value the key must hold once the operation is final.
    pub value: u64,
}

/// Response body for a state read.
#[derive(Debug, Deserialize)]
struct ReadResponse {
    value: u64,
}

/// The node API surface consumed by the harness.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Readiness probe. Errors map to "not ready", never to a harness crash.
    async fn ready(&self) -> bool;

    /// Submit one operation for inclusion in the ledger.
    async fn submit(&self, op: &Operation) -> Result<(), ClientError>;

    /// Read the final value of a key, `None` if the key is absent.
    async fn read(&self, key: &str) -> Result<Option<u64>, ClientError>;

    /// Fetch the node's current state digest.
    async fn digest(&self) -> Result<StateDigest, ClientError>;
}

/// [`NodeApi`] implementation over HTTP.
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    endpoint: NodeEndpoint,
    http: reqwest::Client,
}

impl HttpNodeClient {
    /// Create a client for one node.
    pub fn new(endpoint: NodeEndpoint) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { endpoint, http })
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.url(), path)
    }

    fn check_status(response: &reqwest::Response) -> Result<(), ClientError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::Status {
                status: response.status().as_u16(),
                url: response.url().to_string(),
            })
        }
    }
}

#[async_trait]
impl NodeApi for HttpNodeClient {
    async fn ready(&self) -> bool {
        match self.http.get(self.url("/status")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn submit(&self, op: &Operation) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url("/operations"))
            .json(op)
            .send()
            .await?;
        Self::check_status(&response)
    }

    async fn read(&self, key: &str) -> Result<Option<u64>, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/state/{key}")))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::check_status(&response)?;

        let body: ReadResponse = response.json().await?;
        Ok(Some(body.value))
    }

    async fn digest(&self) -> Result<StateDigest, ClientError> {
        let response = self.http.get(self.url("/state/digest")).send().await?;
        Self::check_status(&response)?;

        let digest: StateDigest = response.json().await?;
        Ok(digest)
    }
}
