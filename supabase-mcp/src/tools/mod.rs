//! Supabase MCP tools
//!
//! Tools are grouped by API surface, and the group is encoded in the tool
//! name prefix:
//! - `database_`: table CRUD, raw SQL and project info
//! - `auth_`: sign-up, sign-in and user management
//! - `storage_`: object storage
//! - `realtime_`: subscriptions and broadcast

pub mod auth;
pub mod database;
pub mod realtime;
pub mod storage;

pub use auth::*;
pub use database::*;
pub use realtime::*;
pub use storage::*;

use crate::server::{McpServerError, McpServerResult, Tool};
use crate::types::ToolDefinition;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Get all available MCP tools.
///
/// # Example
///
/// ```rust,no_run
/// use supabase_mcp::tools::all_tools;
///
/// let tools = all_tools();
/// println!("Available tools: {}", tools.len());
/// ```
pub fn all_tools() -> Vec<Arc<dyn Tool>> {
    let mut tools = Vec::new();

    // Database tools (7)
    tools.extend(database_tools());

    // Auth tools (6)
    tools.extend(auth_tools());

    // Storage tools (6)
    tools.extend(storage_tools());

    // Realtime tools (5)
    tools.extend(realtime_tools());

    tools
}

/// Check the required arguments of `definition`, then deserialize.
///
/// An argument that is absent, null or an empty string counts as missing.
pub(crate) fn parse_args<T: DeserializeOwned>(
    definition: &ToolDefinition,
    args: serde_json::Value,
) -> McpServerResult<T> {
    for field in definition.required_arguments() {
        let missing = match args.get(field) {
            None | Some(serde_json::Value::Null) => true,
            Some(serde_json::Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing {
            return Err(McpServerError::MissingArgument(field.to_string()));
        }
    }

    serde_json::from_value(args).map_err(|e| McpServerError::InvalidParams(e.to_string()))
}

/// Render a JSON scalar id the way PostgREST filters expect it.
pub(crate) fn id_text(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
