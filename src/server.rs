//! HTTP surface for pushing messages and reading the window.
//!
//! - `POST /ingest` hands the raw body to the engine as one message
//! - `GET /snapshot` returns the current window
//! - `GET /stats` returns pipeline counters
//! - `GET /health`
//!
//! # Architecture
//!
//! ```text
//! producer ──→ POST /ingest ──→ engine (single writer) ──→ publisher ──→ gateway / export
//!                                   ↑
//! dashboard ──→ GET /snapshot ──────┘
//! ```

use crate::config::EngineConfig;
use crate::core::{Snapshot, UpsertOutcome};
use crate::engine::{AggregationEngine, IngestError, MessageOutcome};
use crate::gateway::{BlockingGatewayClient, GatewayConfig, GatewaySink};
use crate::publish::{FanoutSink, JsonlExportSink, SnapshotPublisher};
use crate::stats::{create_shared_stats, SharedPipelineStats, StatsSnapshot};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Engine settings
    pub engine: EngineConfig,
    /// Forward snapshots to a renderer gateway
    pub gateway: Option<GatewayConfig>,
    /// Append snapshots to a JSON-lines file
    pub export_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn new(port: u16, engine: EngineConfig) -> Self {
        Self {
            port,
            engine,
            gateway: None,
            export_path: None,
        }
    }

    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_export_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = Some(path.into());
        self
    }
}

/// Shared server state
pub struct ServerState {
    /// The only writer of the window; requests are serialized through this lock
    engine: Mutex<AggregationEngine>,
    stats: SharedPipelineStats,
}

impl ServerState {
    /// Build the engine and its sinks.
    ///
    /// Must not run on an async worker: the gateway client owns its own runtime.
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let stats = create_shared_stats();

        let mut sinks = FanoutSink::new();
        if let Some(gateway) = &config.gateway {
            let client = BlockingGatewayClient::new(gateway.clone())?;
            tracing::info!(device_id = client.device_id(), "Forwarding snapshots to gateway");
            sinks.push(Box::new(GatewaySink::new(client)));
        }
        if let Some(path) = &config.export_path {
            sinks.push(Box::new(JsonlExportSink::create(path)?));
        }

        let publisher = SnapshotPublisher::background(sinks, stats.clone());
        let engine = AggregationEngine::new(config.engine.clone(), publisher, stats.clone())?;

        Ok(Self {
            engine: Mutex::new(engine),
            stats,
        })
    }
}

/// Response from ingest endpoint
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub status: String,
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<UpsertOutcome>,
    pub evicted: usize,
    pub window_len: usize,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /ingest
///
/// The body is one message payload, passed to the engine untouched.
async fn ingest(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let (outcome, window_len) = {
        let mut engine = state.engine.lock().await;
        let outcome = engine.on_message(&body);
        (outcome, engine.window().len())
    };

    match outcome {
        MessageOutcome::Applied {
            record,
            upsert,
            evicted,
            ..
        } => Ok(Json(IngestResponse {
            status: "applied".to_string(),
            date: record.date,
            outcome: Some(upsert),
            evicted,
            window_len,
        })),
        MessageOutcome::Stale { date } => Ok(Json(IngestResponse {
            status: "stale".to_string(),
            date,
            outcome: None,
            evicted: 0,
            window_len,
        })),
        MessageOutcome::Rejected(error) => {
            let code = match error {
                IngestError::Decode(_) => "DECODE_ERROR",
                IngestError::Derivation(_) => "DERIVATION_ERROR",
            };
            Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    error: error.to_string(),
                    code: code.to_string(),
                }),
            ))
        }
    }
}

/// GET /snapshot
async fn snapshot(State(state): State<Arc<ServerState>>) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = state.engine.lock().await.snapshot();
    if snapshot.sequence == 0 {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "No snapshot published yet".to_string(),
                code: "EMPTY_WINDOW".to_string(),
            }),
        ));
    }
    Ok(Json(snapshot))
}

/// GET /stats
async fn stats(State(state): State<Arc<ServerState>>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let port = config.port;
    let state = tokio::task::spawn_blocking(move || ServerState::new(&config)).await??;
    let state = Arc::new(state);

    let app = Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .route("/snapshot", get(snapshot))
        .route("/stats", get(stats))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Activity window server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
