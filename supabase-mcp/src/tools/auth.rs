//! Auth MCP tools
//!
//! Sign-up, sign-in and user management against the project's GoTrue API.
//! A session established by sign-in belongs to the calling session
//! (`mcp-session-id`) and is used only by its later calls to the same project
//! and token.

use super::parse_args;
use crate::server::{McpServerResult, Tool, ToolContext};
use crate::types::{ToolCategory, ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

fn credentials_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "email": {
                "type": "string",
                "description": "User email"
            },
            "password": {
                "type": "string",
                "description": "User password"
            }
        },
        "required": ["email", "password"]
    })
}

/// Tool to register a new user.
pub struct AuthSignUpTool;

#[async_trait]
impl Tool for AuthSignUpTool {
    fn definition(&self) -> ToolDefinition {
        let mut schema = credentials_schema();
        schema["properties"]["user_data"] = serde_json::json!({
            "type": "object",
            "description": "Extra user metadata stored with the account"
        });

        ToolDefinition::new("auth_sign_up", "Register a new user")
            .with_category(ToolCategory::Auth)
            .with_schema(schema)
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "auth_sign_up"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: SignUpParams = parse_args(&self.definition(), args)?;

        match context
            .client()
            .sign_up(&params.email, &params.password, &params.user_data)
            .await
        {
            Ok(user) => {
                info!("User registered");
                Ok(ToolResult::json("User registered:", &user))
            }
            Err(e) => {
                error!("Failed to register user: {}", e);
                Ok(ToolResult::error(format!("Failed to register user: {}", e)))
            }
        }
    }
}

#[derive(Deserialize)]
struct SignUpParams {
    email: String,
    password: String,
    #[serde(default)]
    user_data: serde_json::Value,
}

/// Tool to sign in with email and password.
pub struct AuthSignInTool;

#[async_trait]
impl Tool for AuthSignInTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("auth_sign_in", "Sign in with email and password")
            .with_category(ToolCategory::Auth)
            .with_schema(credentials_schema())
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "auth_sign_in"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: SignInParams = parse_args(&self.definition(), args)?;

        match context.client().sign_in(&params.email, &params.password).await {
            Ok(user) => Ok(ToolResult::json("Signed in:", &user)),
            Err(e) => {
                error!("Failed to sign in: {}", e);
                Ok(ToolResult::error(format!("Failed to sign in: {}", e)))
            }
        }
    }
}

#[derive(Deserialize)]
struct SignInParams {
    email: String,
    password: String,
}

/// Tool to sign out the current user.
pub struct AuthSignOutTool;

#[async_trait]
impl Tool for AuthSignOutTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("auth_sign_out", "Sign out the current user")
            .with_category(ToolCategory::Auth)
            .with_tenant_arguments()
    }

    #[instrument(skip(self, _args, context), fields(tool = "auth_sign_out"))]
    async fn execute(
        &self,
        _args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        match context.client().sign_out().await {
            Ok(()) => Ok(ToolResult::text("Signed out")),
            Err(e) => {
                error!("Failed to sign out: {}", e);
                Ok(ToolResult::error(format!("Failed to sign out: {}", e)))
            }
        }
    }
}

/// Tool to show the signed-in user.
pub struct AuthGetUserTool;

#[async_trait]
impl Tool for AuthGetUserTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("auth_get_user", "Show the signed-in user")
            .with_category(ToolCategory::Auth)
            .with_tenant_arguments()
    }

    #[instrument(skip(self, _args, context), fields(tool = "auth_get_user"))]
    async fn execute(
        &self,
        _args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        match context.client().get_user().await {
            Ok(Some(user)) => Ok(ToolResult::json("Current user:", &user)),
            Ok(None) => Ok(ToolResult::text("No user is signed in")),
            Err(e) => {
                error!("Failed to get user: {}", e);
                Ok(ToolResult::error(format!("Failed to get user: {}", e)))
            }
        }
    }
}

/// Tool to send a password recovery email.
pub struct AuthResetPasswordTool;

#[async_trait]
impl Tool for AuthResetPasswordTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("auth_reset_password", "Send a password reset email")
            .with_category(ToolCategory::Auth)
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "email": {
                        "type": "string",
                        "description": "Email of the account to recover"
                    }
                },
                "required": ["email"]
            }))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "auth_reset_password"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: ResetPasswordParams = parse_args(&self.definition(), args)?;

        match context.client().reset_password(&params.email).await {
            Ok(()) => Ok(ToolResult::text(format!(
                "Password reset email sent to {}",
                params.email
            ))),
            Err(e) => {
                error!("Failed to request password reset: {}", e);
                Ok(ToolResult::error(format!(
                    "Failed to request password reset: {}",
                    e
                )))
            }
        }
    }
}

#[derive(Deserialize)]
struct ResetPasswordParams {
    email: String,
}

/// Tool to update the signed-in user.
pub struct AuthUpdateUserTool;

#[async_trait]
impl Tool for AuthUpdateUserTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("auth_update_user", "Update the signed-in user")
            .with_category(ToolCategory::Auth)
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "user_data": {
                        "type": "object",
                        "description": "Attributes to change, e.g. {\"email\": ...} or {\"data\": {...}}"
                    }
                },
                "required": ["user_data"]
            }))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "auth_update_user"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: UpdateUserParams = parse_args(&self.definition(), args)?;

        match context.client().update_user(&params.user_data).await {
            Ok(user) => Ok(ToolResult::json("User updated:", &user)),
            Err(e) => {
                error!("Failed to update user: {}", e);
                Ok(ToolResult::error(format!("Failed to update user: {}", e)))
            }
        }
    }
}

#[derive(Deserialize)]
struct UpdateUserParams {
    user_data: serde_json::Value,
}

/// Get all auth tools.
pub fn auth_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(AuthSignUpTool),
        Arc::new(AuthSignInTool),
        Arc::new(AuthSignOutTool),
        Arc::new(AuthGetUserTool),
        Arc::new(AuthResetPasswordTool),
        Arc::new(AuthUpdateUserTool),
    ]
}
