//! # Supabase MCP
//!
//! This crate provides an MCP (Model Context Protocol) server for Supabase in
//! which the target project is chosen per call instead of at startup.
//!
//! ## Overview
//!
//! The supabase-mcp crate handles:
//! - **Configuration**: default project settings and per-call resolution
//! - **Middleware**: turns call metadata into a call-scoped project client
//! - **Client**: PostgREST, GoTrue, Storage and Realtime over HTTP
//! - **Tools**: database, auth, storage and realtime tools
//! - **Transports**: stdio and HTTP
//!
//! ## Selecting a Project
//!
//! A call runs against a tenant project when it carries both a project id
//! and a token, otherwise against the default project:
//! - project id: `x-supabase-project`, else `supabase-project`
//! - token: `x-supabase-token`, else `supabase-token`, else
//!   `Authorization: Bearer <token>`
//!
//! Over HTTP these are request headers. Any transport may also send them in
//! the tool arguments, either as a `headers` object or as the inline
//! `project_code` / `access_token` arguments; in-band values win. The tenant
//! base URL comes from `SUPABASE_PROJECT_URL_TEMPLATE`.
//!
//! ## MCP Protocol
//!
//! Supported methods:
//! - `initialize`: Initialize the MCP session
//! - `ping`: Liveness check
//! - `tools/list`: List available tools
//! - `tools/call`: Execute a tool
//!
//! ## Available Tools
//!
//! ### Database
//! - `database_query`, `database_select`, `database_insert`, `database_update`,
//!   `database_delete`, `database_list_tables`, `database_get_project_info`
//!
//! ### Auth
//! - `auth_sign_up`, `auth_sign_in`, `auth_sign_out`, `auth_get_user`,
//!   `auth_reset_password`, `auth_update_user`
//!
//! ### Storage
//! - `storage_upload`, `storage_download`, `storage_list_files`,
//!   `storage_delete_file`, `storage_get_url`, `storage_list_buckets`
//!
//! ### Realtime
//! - `realtime_subscribe`, `realtime_unsubscribe`, `realtime_list_subscriptions`,
//!   `realtime_broadcast`, `realtime_subscribe_channel`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use supabase_mcp::{CallMetadata, DynamicConfigMiddleware, McpServer, Settings};
//! use std::sync::Arc;
//!
//! async fn run() -> anyhow::Result<()> {
//!     let settings = Settings::from_env();
//!     let middleware = Arc::new(DynamicConfigMiddleware::new(&settings)?);
//!     let server = McpServer::supabase(middleware).await;
//!
//!     let metadata = CallMetadata::new()
//!         .with("x-supabase-project", "abcd")
//!         .with("x-supabase-token", "service-role-key");
//!     let result = server
//!         .call_tool("database_list_tables", serde_json::json!({}), &metadata)
//!         .await?;
//!     println!("{}", result.text_content());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod metadata;
pub mod middleware;
pub mod server;
pub mod tools;
pub mod transport;
pub mod types;

// Re-export main types
pub use client::{BackendCause, BackendError, BackendResult, SupabaseClient};
pub use config::{ConfigError, EffectiveConfig, ProjectDefaults, Settings};
pub use metadata::{CallMetadata, TenantCredentials};
pub use middleware::{CallScope, DynamicConfigMiddleware};
pub use server::{McpServer, McpServerError, McpServerResult, Tool, ToolContext};
pub use transport::{Transport, TransportError};
pub use types::{
    ContentBlock, McpError, McpRequest, McpResponse, RequestId, ServerCapabilities, ServerInfo,
    ToolCall, ToolCapabilities, ToolCategory, ToolDefinition, ToolResult,
};

// Re-export tool collections
pub use tools::{all_tools, auth_tools, database_tools, realtime_tools, storage_tools};
