//! Gateway client for forwarding window snapshots to a remote renderer.
//!
//! The renderer runs elsewhere (a dashboard process, a notebook server); this
//! module only delivers snapshots to it over HTTP.

use crate::core::{Snapshot, WindowSummary};
use crate::publish::{SinkError, SnapshotSink};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway host (default: 127.0.0.1)
    pub host: String,
    /// Gateway port
    pub port: u16,
    /// Bearer authentication token
    pub token: String,
}

impl GatewayConfig {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
        }
    }

    /// Load port and token written by a running renderer.
    ///
    /// Reads `<data dir>/activity-window/runtime/gateway.port` and `gateway.token`.
    pub fn from_runtime_dir() -> Result<Self, GatewayError> {
        let runtime_dir = Self::default_runtime_dir()?;

        let port_path = runtime_dir.join("gateway.port");
        let token_path = runtime_dir.join("gateway.token");

        let port_str = std::fs::read_to_string(&port_path).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read gateway port from {port_path:?}: {e}"
            ))
        })?;

        let port: u16 = port_str.trim().parse().map_err(|e| {
            GatewayError::Config(format!("Invalid port number '{}': {}", port_str.trim(), e))
        })?;

        let token = std::fs::read_to_string(&token_path)
            .map_err(|e| {
                GatewayError::Config(format!(
                    "Failed to read gateway token from {token_path:?}: {e}"
                ))
            })?
            .trim()
            .to_string();

        Ok(Self::new("127.0.0.1", port, token))
    }

    fn default_runtime_dir() -> Result<PathBuf, GatewayError> {
        dirs::data_dir()
            .map(|dir| dir.join("activity-window").join("runtime"))
            .ok_or_else(|| {
                GatewayError::Config("Could not determine data directory".to_string())
            })
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Snapshot ingest endpoint.
    pub fn snapshots_url(&self) -> String {
        format!("{}/v1/snapshots", self.url())
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.url())
    }
}

/// Gateway client error types.
#[derive(Debug)]
pub enum GatewayError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Server returned an error response
    Server { status: u16, message: String },
    /// JSON serialization error
    Serialization(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Config(msg) => write!(f, "Gateway config error: {msg}"),
            GatewayError::Network(msg) => write!(f, "Gateway network error: {msg}"),
            GatewayError::Server { status, message } => {
                write!(f, "Gateway server error ({status}): {message}")
            }
            GatewayError::Serialization(msg) => write!(f, "Gateway serialization error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Body posted to the snapshot endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEnvelope<'a> {
    pub device_id: &'a str,
    pub source: &'static str,
    pub version: &'static str,
    pub summary: WindowSummary,
    pub snapshot: &'a Snapshot,
}

/// Gateway acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayResponse {
    #[serde(default = "default_accepted")]
    pub accepted: bool,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_accepted() -> bool {
    true
}

/// Async client for the renderer gateway.
pub struct GatewayClient {
    config: GatewayConfig,
    client: reqwest::Client,
    device_id: String,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {e}")))?;

        // Device ID from hostname + instance
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let device_id = format!(
            "window-{}-{}",
            hostname,
            &uuid::Uuid::new_v4().to_string()[..8]
        );

        Ok(Self {
            config,
            client,
            device_id,
        })
    }

    pub fn from_runtime() -> Result<Self, GatewayError> {
        Self::new(GatewayConfig::from_runtime_dir()?)
    }

    /// Test connection to the gateway.
    pub async fn test_connection(&self) -> Result<bool, GatewayError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Deliver one snapshot.
    pub async fn push_snapshot(&self, snapshot: &Snapshot) -> Result<GatewayResponse, GatewayError> {
        let envelope = SnapshotEnvelope {
            device_id: &self.device_id,
            source: "activity-window",
            version: env!("CARGO_PKG_VERSION"),
            summary: snapshot.summary(),
            snapshot,
        };

        let response = self
            .client
            .post(self.config.snapshots_url())
            .header("Authorization", format!("Bearer {}", self.config.token))
            .json(&envelope)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Serialization(e.to_string()))
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Blocking gateway client for use on the render thread.
pub struct BlockingGatewayClient {
    inner: GatewayClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingGatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: GatewayClient::new(config)?,
            runtime,
        })
    }

    pub fn from_runtime() -> Result<Self, GatewayError> {
        Self::new(GatewayConfig::from_runtime_dir()?)
    }

    pub fn test_connection(&self) -> Result<bool, GatewayError> {
        self.runtime.block_on(self.inner.test_connection())
    }

    pub fn push_snapshot(&self, snapshot: &Snapshot) -> Result<GatewayResponse, GatewayError> {
        self.runtime.block_on(self.inner.push_snapshot(snapshot))
    }

    pub fn device_id(&self) -> &str {
        self.inner.device_id()
    }
}

/// Sink that forwards every snapshot to the gateway.
///
/// Blocks on network I/O, so pair it with a background publisher.
pub struct GatewaySink {
    client: BlockingGatewayClient,
}

impl GatewaySink {
    pub fn new(client: BlockingGatewayClient) -> Self {
        Self { client }
    }
}

impl SnapshotSink for GatewaySink {
    fn name(&self) -> &str {
        "gateway"
    }

    fn render(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        match self.client.push_snapshot(snapshot) {
            Ok(response) if response.accepted => Ok(()),
            Ok(response) => Err(SinkError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "snapshot not accepted".to_string()),
            )),
            Err(GatewayError::Serialization(e)) => Err(SinkError::Serialization(e)),
            Err(e) => Err(SinkError::Io(e.to_string())),
        }
    }
}
