//! HTTP transport for the MCP server.
//!
//! Routes:
//! - `POST /mcp`: JSON-RPC over HTTP
//! - `GET /mcp/list_tools`: tool definitions
//! - `POST /mcp/call_tool`: `{name, arguments}`, answered with content blocks
//!
//! Request headers are the call metadata of every route. A request without an
//! `mcp-session-id` header is assigned a fresh one, returned in the response
//! header of the same name; clients resend it to keep their user session.

use super::TransportError;
use crate::metadata::{CallMetadata, SESSION_HEADER};
use crate::server::{McpServer, McpServerError};
use crate::types::{McpError, McpRequest, McpResponse, RequestId};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Create the HTTP router for MCP.
pub fn create_router(server: Arc<McpServer>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp_post))
        .route("/mcp/list_tools", get(handle_list_tools))
        .route("/mcp/call_tool", post(handle_call_tool))
        .with_state(server)
}

/// Serve HTTP on `addr` until Ctrl-C.
pub async fn serve_http(server: Arc<McpServer>, addr: &str) -> Result<(), TransportError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    info!(addr = %addr, "MCP HTTP server listening");

    axum::serve(listener, create_router(server))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("MCP HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Handle POST requests to /mcp (JSON-RPC over HTTP).
async fn handle_mcp_post(
    State(server): State<Arc<McpServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: McpRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return Json(McpResponse::error(RequestId::Null, McpError::parse_error(e))).into_response()
        }
    };

    let (metadata, session_id) = caller_metadata(&headers);
    let response = match server.handle_request(request, &metadata).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    with_session_header(response, &session_id)
}

/// Handle GET requests to /mcp/list_tools.
async fn handle_list_tools(State(server): State<Arc<McpServer>>) -> impl IntoResponse {
    Json(server.list_tools().await)
}

#[derive(Debug, Deserialize)]
struct CallToolBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<serde_json::Value>,
}

/// Handle POST requests to /mcp/call_tool.
async fn handle_call_tool(
    State(server): State<Arc<McpServer>>,
    headers: HeaderMap,
    Json(body): Json<CallToolBody>,
) -> Response {
    let Some(name) = body.name.filter(|n| !n.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Tool name is required");
    };
    let arguments = body.arguments.unwrap_or_else(|| serde_json::json!({}));

    let (metadata, session_id) = caller_metadata(&headers);
    let response = match server.call_tool(&name, arguments, &metadata).await {
        Ok(result) => Json(result.content).into_response(),
        Err(e @ McpServerError::UnknownTool(_)) => {
            error_response(StatusCode::NOT_FOUND, &e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    with_session_header(response, &session_id)
}

/// Call metadata from request headers, with a session id assigned if missing.
fn caller_metadata(headers: &HeaderMap) -> (CallMetadata, String) {
    let mut metadata = CallMetadata::from_header_map(headers);
    let session_id = match metadata.session_id() {
        Some(id) => id.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            debug!(session_id = %id, "Assigned new session id");
            metadata.insert(SESSION_HEADER, id.clone());
            id
        }
    };
    (metadata, session_id)
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
