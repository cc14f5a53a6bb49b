//! MCP server implementation
//!
//! This module provides the MCP server that routes tool calls to the
//! database, auth, storage and realtime tools, each call running against
//! the project resolved from its own metadata.

use crate::client::SupabaseClient;
use crate::config::EffectiveConfig;
use crate::metadata::{CallMetadata, HEADERS_ARGUMENT, PROJECT_ARGUMENT, TOKEN_ARGUMENT};
use crate::middleware::{CallScope, DynamicConfigMiddleware};
use crate::tools::all_tools;
use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// MCP server error types.
#[derive(Debug, Error)]
pub enum McpServerError {
    /// No tool is registered under the name.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A required argument is absent or empty.
    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

/// Result type for MCP server operations.
pub type McpServerResult<T> = Result<T, McpServerError>;

/// Trait for tool implementations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with given arguments.
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult>;
}

/// Context for tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Project the call runs against
    pub scope: CallScope,

    /// Request correlation ID
    pub correlation_id: Uuid,
}

impl ToolContext {
    /// Create a context for one call.
    pub fn new(scope: CallScope) -> Self {
        Self {
            scope,
            correlation_id: Uuid::now_v7(),
        }
    }

    /// Client bound to the call's project.
    pub fn client(&self) -> &SupabaseClient {
        &self.scope.client
    }

    /// Configuration of the call's project.
    pub fn config(&self) -> &EffectiveConfig {
        &self.scope.config
    }
}

/// MCP server for Supabase projects.
pub struct McpServer {
    /// Server info
    info: ServerInfo,

    /// Server capabilities
    capabilities: ServerCapabilities,

    /// Registered tools
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,

    /// Per-call project resolution
    middleware: Arc<DynamicConfigMiddleware>,
}

impl McpServer {
    /// Create a new MCP server with no tools.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        middleware: Arc<DynamicConfigMiddleware>,
    ) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolCapabilities { list_changed: false }),
                experimental: HashMap::new(),
            },
            tools: Arc::new(RwLock::new(HashMap::new())),
            middleware,
        }
    }

    /// Create a server with every database, auth, storage and realtime tool.
    pub async fn supabase(middleware: Arc<DynamicConfigMiddleware>) -> Self {
        let server = Self::new("supabase-mcp", env!("CARGO_PKG_VERSION"), middleware);
        server.register_tools(all_tools()).await;
        server
    }

    /// Register a tool.
    pub async fn register_tool(&self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        let mut tools = self.tools.write().await;
        if tools.insert(name.clone(), tool).is_some() {
            warn!("Tool {} registered twice, keeping the latest", name);
        }
    }

    /// Register multiple tools.
    pub async fn register_tools(&self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            self.register_tool(tool).await;
        }
    }

    /// Get all tool definitions, ordered by name.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut definitions: Vec<_> = tools.values().map(|t| t.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Get tools by category.
    pub async fn list_tools_by_category(&self, category: ToolCategory) -> Vec<ToolDefinition> {
        self.list_tools()
            .await
            .into_iter()
            .filter(|d| d.category == Some(category))
            .collect()
    }

    /// Execute a tool.
    ///
    /// `metadata` comes from the transport; credentials carried in the
    /// arguments override it. Only [`McpServerError::UnknownTool`] is
    /// returned as an error, every other failure becomes an error result.
    #[instrument(skip(self, arguments, metadata), fields(tool = %name))]
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        metadata: &CallMetadata,
    ) -> McpServerResult<ToolResult> {
        let category = ToolCategory::from_tool_name(name)
            .ok_or_else(|| McpServerError::UnknownTool(name.to_string()))?;

        let tool = self
            .tools
            .read()
            .await
            .get(name)
            .filter(|tool| tool.definition().category == Some(category))
            .cloned()
            .ok_or_else(|| McpServerError::UnknownTool(name.to_string()))?;

        let metadata = metadata.clone().merged(CallMetadata::from_arguments(&arguments));
        let scope = self.middleware.resolve(&metadata).await;
        let context = ToolContext::new(scope);

        debug!(
            correlation_id = %context.correlation_id,
            dynamic = context.config().is_dynamic,
            "Dispatching tool call"
        );

        match tool.execute(strip_credentials(arguments), &context).await {
            Ok(result) => Ok(result),
            Err(McpServerError::UnknownTool(name)) => Err(McpServerError::UnknownTool(name)),
            Err(e) => {
                warn!(correlation_id = %context.correlation_id, "Tool call failed: {}", e);
                Ok(ToolResult::error(e))
            }
        }
    }

    /// Handle an MCP request. Notifications produce no response.
    pub async fn handle_request(
        &self,
        request: McpRequest,
        metadata: &CallMetadata,
    ) -> Option<McpResponse> {
        if request.is_notification() {
            debug!("Received notification {}", request.method);
            return None;
        }

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id),
            "ping" => McpResponse::success(request.id, serde_json::json!({})),
            "tools/list" => self.handle_tools_list(request.id).await,
            "tools/call" => self.handle_tools_call(request.id, request.params, metadata).await,
            _ => McpResponse::error(request.id, McpError::method_not_found(&request.method)),
        };
        Some(response)
    }

    fn handle_initialize(&self, id: RequestId) -> McpResponse {
        info!("Client initialized session");
        McpResponse::success(
            id,
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": self.capabilities,
                "serverInfo": self.info
            }),
        )
    }

    async fn handle_tools_list(&self, id: RequestId) -> McpResponse {
        let tools = self.list_tools().await;
        McpResponse::success(id, serde_json::json!({ "tools": tools }))
    }

    async fn handle_tools_call(
        &self,
        id: RequestId,
        params: Option<serde_json::Value>,
        metadata: &CallMetadata,
    ) -> McpResponse {
        let params = match params {
            Some(p) => p,
            None => return McpResponse::error(id, McpError::invalid_params("Missing params")),
        };

        let call: ToolCall = match serde_json::from_value(params) {
            Ok(c) => c,
            Err(e) => return McpResponse::error(id, McpError::invalid_params(e.to_string())),
        };

        match self.call_tool(&call.name, call.arguments, metadata).await {
            Ok(result) => match serde_json::to_value(result) {
                Ok(value) => McpResponse::success(id, value),
                Err(e) => McpResponse::error(id, McpError::internal_error(e.to_string())),
            },
            Err(e @ McpServerError::UnknownTool(_)) => {
                McpResponse::error(id, McpError::invalid_params(e.to_string()))
            }
            Err(e) => McpResponse::error(id, McpError::internal_error(e.to_string())),
        }
    }

    /// Get server info.
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Get server capabilities.
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Get the middleware resolving call scopes.
    pub fn middleware(&self) -> &Arc<DynamicConfigMiddleware> {
        &self.middleware
    }
}

/// Drop the credential-carrying arguments before they reach a handler.
fn strip_credentials(mut arguments: serde_json::Value) -> serde_json::Value {
    if let Some(map) = arguments.as_object_mut() {
        for key in [PROJECT_ARGUMENT, TOKEN_ARGUMENT, HEADERS_ARGUMENT] {
            map.remove(key);
        }
    }
    arguments
}
