//! HTTP server for the tool API and the MCP endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `GET`  | `/health` | Version, cache state and index age |
//! | `*`    | `/mcp` | MCP Streamable HTTP (JSON-RPC) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "issue not found: ENG-9" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `invalid_argument`, `invalid_cursor` | 400 |
//! | `not_found` | 404 |
//! | `timeout` | 504 |
//! | `no_data_available`, `source_unavailable` | 503 |
//! | anything else | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based
//! clients can call the API directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::{CacheManager, CacheState};
use crate::config::Config;
use crate::error::{ErrorBody, LinearError};
use crate::mcp::McpBridge;
use crate::source::JsonlSource;
use crate::tools::{ToolContext, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

/// Build the application router over an existing cache.
///
/// Exposed separately from [`run_server`] so tests can serve it on an
/// ephemeral port.
pub fn build_router(tools: Arc<ToolRegistry>, ctx: ToolContext) -> Router {
    let bridge = McpBridge::new(tools.clone(), ctx.clone());
    let mcp = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .nest_service("/mcp", mcp)
        .layer(cors)
        .with_state(AppState { tools, ctx })
}

/// Serve the configured snapshot on `[server].bind` until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let cache = Arc::new(CacheManager::from_config(config, Arc::new(JsonlSource)));
    let ctx = ToolContext::from_config(config, cache);
    let tools = Arc::new(ToolRegistry::with_builtins());

    tracing::info!(tools = tools.len(), "tool registry ready");
    for t in tools.tools() {
        tracing::debug!("POST /tools/{}: {}", t.name(), t.description());
    }

    let app = build_router(tools, ctx);
    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{} (MCP at /mcp)", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

struct AppError {
    status: StatusCode,
    body: ErrorBody,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn status_for(err: &LinearError) -> StatusCode {
    match err {
        LinearError::InvalidArgument(_) | LinearError::InvalidCursor(_) => StatusCode::BAD_REQUEST,
        LinearError::NotFound { .. } => StatusCode::NOT_FOUND,
        LinearError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        LinearError::NoDataAvailable(_) | LinearError::SourceUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<LinearError>() {
            Some(le) => {
                if !le.is_client_error() {
                    tracing::warn!(code = le.kind(), "tool call failed: {}", le);
                }
                AppError {
                    status: status_for(le),
                    body: le.to_body(),
                }
            }
            None => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: ErrorBody {
                    error: crate::error::ErrorDetail {
                        code: "tool_error".to_string(),
                        message: err.to_string(),
                    },
                },
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    cache: CacheState,
    /// Seconds since the published Index was built.
    index_age_secs: Option<u64>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache: state.ctx.cache().state(),
        index_age_secs: state.ctx.cache().age().map(|age| age.as_secs()),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
}

// ============ POST /tools/{name} ============

/// Validates the body against the tool's schema, then executes it. The
/// result comes back wrapped as `{ "result": ... }`.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state.tools.call(&name, params, &state.ctx).await?;
    Ok(Json(serde_json::json!({ "result": result })))
}
