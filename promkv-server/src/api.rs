//! HTTP handlers for the remote storage endpoints.
//!
//! Write listener:
//!
//! - `POST /write` - snappy + protobuf `WriteRequest`
//! - `GET /dump?start=<ms>&end=<ms>` - export a window to the backup directory
//! - `GET /-/healthy` - liveness check
//!
//! Read listener:
//!
//! - `POST /read` - snappy + protobuf `ReadRequest`, answered with a
//!   snappy + protobuf `ReadResponse`
//! - `GET /-/healthy` - liveness check
//!
//! Store work is blocking, so every handler hands it to the blocking pool.
//! Scans get a [`ScanControl`] whose token is cancelled when the handler
//! future is dropped, which happens when the client goes away.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, de};
use tokio_util::sync::CancellationToken;

use promkv::backup::{BackupExporter, BackupSummary};
use promkv::query::{QueryEngine, ScanControl};
use promkv::remote::{self, proto};
use promkv::store::Store;
use promkv::write::Writer;
use promkv::{BackupConfig, PromKvError};

/// Shared state of both listeners.
#[derive(Clone)]
pub struct AppState {
    writer: Arc<Writer>,
    engine: QueryEngine,
    exporter: Arc<BackupExporter>,
    scan_timeout: Option<Duration>,
}

impl AppState {
    /// Builds the state, recovering the sequencer from `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the last sequence cannot be read from the store.
    pub fn new(
        store: Arc<Store>,
        backup: BackupConfig,
        scan_timeout: Option<Duration>,
    ) -> Result<Self, PromKvError> {
        Ok(Self {
            writer: Arc::new(Writer::open(Arc::clone(&store))?),
            engine: QueryEngine::new(Arc::clone(&store)),
            exporter: Arc::new(BackupExporter::new(store, backup)),
            scan_timeout,
        })
    }

    fn scan_control(&self) -> ScanControl {
        let control = ScanControl::new(CancellationToken::new());
        match self.scan_timeout {
            Some(timeout) => control.with_timeout(timeout),
            None => control,
        }
    }
}

/// Routes served on the write address.
pub fn write_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/write", post(handle_write))
        .route("/dump", get(handle_dump))
        .route("/-/healthy", get(handle_healthy))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Routes served on the read address.
pub fn read_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/read", post(handle_read))
        .route("/-/healthy", get(handle_healthy))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Error returned by handlers; rendered as a plain-text body.
#[derive(Debug)]
pub enum ApiError {
    /// A library error, classified by kind.
    Store(PromKvError),
    /// The blocking task panicked or was aborted.
    Internal(String),
}

impl From<PromKvError> for ApiError {
    fn from(err: PromKvError) -> Self {
        Self::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Store(err) if err.is_client_error() => {
                tracing::warn!("rejected request: {err}");
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            Self::Store(err) if err.is_interrupted() => {
                tracing::warn!("scan interrupted: {err}");
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            Self::Store(err) => {
                tracing::error!("storage failure: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            Self::Internal(message) => {
                tracing::error!("handler task failed: {message}");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, message).into_response()
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, PromKvError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

/// `POST /write`
async fn handle_write(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let writer = Arc::clone(&state.writer);
    let summary = run_blocking(move || {
        let request: proto::WriteRequest = remote::decode(&body)?;
        let samples = remote::samples_from_write_request(&request)?;
        writer.write(&samples)
    })
    .await?;

    tracing::debug!(
        samples = summary.samples,
        last_sequence = summary.last_sequence,
        "handled write"
    );
    Ok(StatusCode::OK)
}

/// `POST /read`
async fn handle_read(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let control = state.scan_control();
    let _cancel_on_drop = control.token().clone().drop_guard();
    let engine = state.engine.clone();

    let encoded = run_blocking(move || {
        let request: proto::ReadRequest = remote::decode(&body)?;
        let queries = remote::queries_from_read_request(&request)?;
        let results = engine.read(&queries, &control)?;
        Ok(remote::encode(&remote::read_response(results))?)
    })
    .await?;

    Ok((
        [
            (header::CONTENT_TYPE, remote::CONTENT_TYPE),
            (header::CONTENT_ENCODING, remote::CONTENT_ENCODING),
        ],
        encoded,
    )
        .into_response())
}

/// Query parameters of `/dump`.
///
/// An empty value (`?end=`) counts as absent. Anything else that is not an
/// integer is rejected.
#[derive(Debug, Deserialize)]
pub struct DumpParams {
    /// Inclusive lower bound in milliseconds; absent means 0.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub start: Option<i64>,
    /// Inclusive upper bound in milliseconds; absent or 0 means unbounded.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub end: Option<i64>,
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(de::Error::custom),
    }
}

/// `GET /dump`
async fn handle_dump(
    State(state): State<AppState>,
    Query(params): Query<DumpParams>,
) -> Result<Json<BackupSummary>, ApiError> {
    let control = state.scan_control();
    let _cancel_on_drop = control.token().clone().drop_guard();
    let exporter = Arc::clone(&state.exporter);
    let start = params.start.unwrap_or(0);

    let summary = run_blocking(move || exporter.export(start, params.end, &control)).await?;
    Ok(Json(summary))
}

/// `GET /-/healthy`
async fn handle_healthy() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
