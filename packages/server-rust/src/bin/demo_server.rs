//! Notes API demonstrating request-scoped audit stamping.
//!
//! Requests are attributed to the principal named in `X-Demo-User` (or to a
//! bearer token when JWT identity is configured) and to the `sessionid`
//! cookie.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use auditlog_core::{AuditRecord, FieldRegistry, Principal, Record, RecordType, Value};
use auditlog_server::interceptor::{save_offloaded, AuditInterceptor, AuditLayer, OffloadError};
use auditlog_server::network::{shutdown_signal, NetworkConfig, NetworkModule};
use auditlog_server::{AuditConfig, AuditSettings, ModelStore, WriteSignals};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

const NOTE: RecordType = RecordType::new("note");

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "demo-server", about = "Notes API with audit stamping")]
struct Args {
    #[arg(long, env = "AUDITLOG_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "AUDITLOG_PORT", default_value_t = 8000)]
    port: u16,

    /// Disable all stamping.
    #[arg(long, env = "AUDITLOG_DISABLED")]
    disabled: bool,

    /// JSON file with audit settings.
    #[arg(long, env = "AUDITLOG_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "AUDITLOG_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn declare_models(registry: &FieldRegistry) {
    registry
        .declare(NOTE)
        .last_modified_by("modified_by")
        .last_session("modified_in")
        .created_by("created_by")
        .created_in_session("created_in");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    store: Arc<ModelStore>,
}

#[derive(Debug, Deserialize)]
struct NoteInput {
    title: String,
    #[serde(default)]
    body: String,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("note {0} not found")]
    NotFound(u64),
    #[error(transparent)]
    Save(#[from] OffloadError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Save(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn note_json(note: &Record) -> serde_json::Value {
    let mut row = serde_json::Map::new();
    row.insert("id".to_string(), json!(note.pk()));
    for (name, value) in note.to_row() {
        row.insert(name, serde_json::to_value(value).unwrap_or_default());
    }
    serde_json::Value::Object(row)
}

async fn create_note(
    State(state): State<AppState>,
    Json(input): Json<NoteInput>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let note = Record::new(NOTE)
        .with("title", input.title)
        .with("body", input.body);
    let (note, _) = save_offloaded(Arc::clone(&state.store), note).await?;
    Ok((StatusCode::CREATED, Json(note_json(&note))))
}

async fn update_note(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(input): Json<NoteInput>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut note = state.store.load(NOTE, id).ok_or(ApiError::NotFound(id))?;
    note.set_field("title", Value::from(input.title));
    note.set_field("body", Value::from(input.body));
    let (note, _) = save_offloaded(Arc::clone(&state.store), note).await?;
    Ok(Json(note_json(&note)))
}

async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let note = state.store.load(NOTE, id).ok_or(ApiError::NotFound(id))?;
    Ok(Json(note_json(&note)))
}

/// Stand-in for an authentication layer.
async fn demo_identity(mut request: Request, next: Next) -> Response {
    let user = request
        .headers()
        .get("x-demo-user")
        .and_then(|value| value.to_str().ok())
        .map(Principal::new);
    if let Some(user) = user {
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let settings = AuditSettings::global();
    if let Some(path) = &args.config {
        let config = AuditConfig::from_file(path)
            .with_context(|| format!("load audit config from {}", path.display()))?;
        settings.store(config);
    }
    if args.disabled {
        settings.set_disabled(true);
    }

    declare_models(&FieldRegistry::global());
    let store = Arc::new(ModelStore::in_memory(WriteSignals::global()));
    let audit = AuditLayer::new(AuditInterceptor::from_globals());

    let routes = Router::new()
        .route("/notes", post(create_note))
        .route("/notes/{id}", get(get_note).put(update_note))
        .with_state(AppState { store });

    let mut network = NetworkModule::new(NetworkConfig {
        host: args.host,
        port: args.port,
        ..NetworkConfig::default()
    });
    let router = network
        .build_router(routes, audit)
        .layer(middleware::from_fn(demo_identity));

    network.start().await?;
    network.serve(router, shutdown_signal()).await
}
