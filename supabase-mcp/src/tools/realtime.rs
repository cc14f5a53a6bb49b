//! Realtime MCP tools

use super::parse_args;
use crate::server::{McpServerResult, Tool, ToolContext};
use crate::types::{ToolCategory, ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, instrument};

/// Tool to subscribe to row changes on a table.
pub struct RealtimeSubscribeTool;

#[async_trait]
impl Tool for RealtimeSubscribeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("realtime_subscribe", "Subscribe to changes on a table")
            .with_category(ToolCategory::Realtime)
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "table": {
                        "type": "string",
                        "description": "Table name"
                    },
                    "event": {
                        "type": "string",
                        "enum": ["INSERT", "UPDATE", "DELETE", "*"],
                        "description": "Change event to listen to",
                        "default": "*"
                    },
                    "filter": {
                        "type": "string",
                        "description": "Row filter, e.g. id=eq.1"
                    }
                },
                "required": ["table"]
            }))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "realtime_subscribe"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: SubscribeParams = parse_args(&self.definition(), args)?;

        match context
            .client()
            .subscribe_table(&params.table, params.event.as_deref(), params.filter.as_deref())
            .await
        {
            Ok(subscription) => Ok(ToolResult::json(
                format!("Subscribed to changes on {}:", params.table),
                &serde_json::to_value(&subscription).unwrap_or_default(),
            )),
            Err(e) => {
                error!("Failed to subscribe: {}", e);
                Ok(ToolResult::error(format!("Failed to subscribe: {}", e)))
            }
        }
    }
}

#[derive(Deserialize)]
struct SubscribeParams {
    table: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    filter: Option<String>,
}

/// Tool to remove a subscription.
pub struct RealtimeUnsubscribeTool;

#[async_trait]
impl Tool for RealtimeUnsubscribeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("realtime_unsubscribe", "Remove a subscription")
            .with_category(ToolCategory::Realtime)
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "table": {
                        "type": "string",
                        "description": "Table name, or channel_<name> for channel subscriptions"
                    }
                },
                "required": ["table"]
            }))
            .with_tenant_arguments()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: UnsubscribeParams = parse_args(&self.definition(), args)?;

        if context.client().unsubscribe_table(&params.table).await {
            Ok(ToolResult::text(format!("Unsubscribed from {}", params.table)))
        } else {
            Ok(ToolResult::text(format!("No subscription found for {}", params.table)))
        }
    }
}

#[derive(Deserialize)]
struct UnsubscribeParams {
    table: String,
}

/// Tool to list the subscriptions of the project.
pub struct RealtimeListSubscriptionsTool;

#[async_trait]
impl Tool for RealtimeListSubscriptionsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("realtime_list_subscriptions", "List active subscriptions")
            .with_category(ToolCategory::Realtime)
            .with_tenant_arguments()
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let subscriptions = context.client().list_subscriptions().await;
        if subscriptions.is_empty() {
            return Ok(ToolResult::text("No active subscriptions"));
        }

        let keys: Vec<_> = subscriptions.iter().map(|s| s.key.as_str()).collect();
        Ok(ToolResult::json(
            format!("Active subscriptions: {}", keys.join(", ")),
            &serde_json::to_value(&subscriptions).unwrap_or_default(),
        ))
    }
}

/// Tool to broadcast a message on a channel.
pub struct RealtimeBroadcastTool;

#[async_trait]
impl Tool for RealtimeBroadcastTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("realtime_broadcast", "Broadcast a message on a channel")
            .with_category(ToolCategory::Realtime)
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "channel": {
                        "type": "string",
                        "description": "Channel name"
                    },
                    "message": {
                        "type": "object",
                        "description": "Payload delivered to listeners"
                    }
                },
                "required": ["channel", "message"]
            }))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "realtime_broadcast"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: BroadcastParams = parse_args(&self.definition(), args)?;

        match context.client().broadcast(&params.channel, &params.message).await {
            Ok(()) => Ok(ToolResult::text(format!(
                "Message sent to channel {}",
                params.channel
            ))),
            Err(e) => {
                error!("Failed to broadcast: {}", e);
                Ok(ToolResult::error(format!("Failed to send message: {}", e)))
            }
        }
    }
}

#[derive(Deserialize)]
struct BroadcastParams {
    channel: String,
    message: serde_json::Value,
}

/// Tool to subscribe to a broadcast channel.
pub struct RealtimeSubscribeChannelTool;

#[async_trait]
impl Tool for RealtimeSubscribeChannelTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("realtime_subscribe_channel", "Subscribe to a broadcast channel")
            .with_category(ToolCategory::Realtime)
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "channel": {
                        "type": "string",
                        "description": "Channel name"
                    }
                },
                "required": ["channel"]
            }))
            .with_tenant_arguments()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: ChannelParams = parse_args(&self.definition(), args)?;

        match context.client().subscribe_channel(&params.channel).await {
            Ok(subscription) => Ok(ToolResult::text(format!(
                "Subscribed to channel {} (key {})",
                params.channel, subscription.key
            ))),
            Err(e) => {
                error!("Failed to subscribe to channel: {}", e);
                Ok(ToolResult::error(format!("Failed to subscribe to channel: {}", e)))
            }
        }
    }
}

#[derive(Deserialize)]
struct ChannelParams {
    channel: String,
}

/// Get all realtime tools.
pub fn realtime_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(RealtimeSubscribeTool),
        Arc::new(RealtimeUnsubscribeTool),
        Arc::new(RealtimeListSubscriptionsTool),
        Arc::new(RealtimeBroadcastTool),
        Arc::new(RealtimeSubscribeChannelTool),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{next_event, spawn_realtime_server};
    use crate::config::{ProjectDefaults, Settings};
    use crate::middleware::DynamicConfigMiddleware;

    fn context() -> ToolContext {
        context_for("https://default.supabase.co")
    }

    fn context_for(base_url: &str) -> ToolContext {
        let settings = Settings {
            defaults: ProjectDefaults {
                base_url: Some(base_url.to_string()),
                api_key: Some("anon-key".to_string()),
                ..Settings::default().defaults
            },
            ..Settings::default()
        };
        let middleware = DynamicConfigMiddleware::new(&settings).unwrap();
        ToolContext::new(middleware.default_scope().clone())
    }

    #[test]
    fn test_realtime_tools() {
        let tools = realtime_tools();
        assert_eq!(tools.len(), 5);
        for tool in tools {
            assert_eq!(tool.definition().category, Some(ToolCategory::Realtime));
        }
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let (base_url, mut events) = spawn_realtime_server("ok").await;
        let context = context_for(&base_url);

        let result = RealtimeSubscribeTool
            .execute(serde_json::json!({"table": "orders", "event": "INSERT"}), &context)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(next_event(&mut events).await, "join realtime:public:orders");

        let result = RealtimeSubscribeChannelTool
            .execute(serde_json::json!({"channel": "lobby"}), &context)
            .await
            .unwrap();
        assert!(result.text_content().contains("channel_lobby"));

        let result = RealtimeListSubscriptionsTool
            .execute(serde_json::json!({}), &context)
            .await
            .unwrap();
        assert!(result
            .text_content()
            .starts_with("Active subscriptions: channel_lobby, orders"));

        let result = RealtimeUnsubscribeTool
            .execute(serde_json::json!({"table": "orders"}), &context)
            .await
            .unwrap();
        assert_eq!(result.text_content(), "Unsubscribed from orders");
        assert_eq!(next_event(&mut events).await, "join realtime:lobby");
        assert_eq!(next_event(&mut events).await, "closed");

        let result = RealtimeUnsubscribeTool
            .execute(serde_json::json!({"table": "orders"}), &context)
            .await
            .unwrap();
        assert_eq!(result.text_content(), "No subscription found for orders");
    }

    #[tokio::test]
    async fn test_refused_join_reports_error() {
        let (base_url, _events) = spawn_realtime_server("error").await;
        let context = context_for(&base_url);

        let result = RealtimeSubscribeChannelTool
            .execute(serde_json::json!({"channel": "lobby"}), &context)
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.text_content().contains("join refused: join denied"));

        let result = RealtimeListSubscriptionsTool
            .execute(serde_json::json!({}), &context)
            .await
            .unwrap();
        assert_eq!(result.text_content(), "No active subscriptions");
    }

    #[tokio::test]
    async fn test_invalid_event() {
        let result = RealtimeSubscribeTool
            .execute(serde_json::json!({"table": "orders", "event": "TRUNCATE"}), &context())
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.text_content().contains("unsupported event"));
    }
}
