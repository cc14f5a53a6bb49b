//! Supabase backend client.
//!
//! [`SupabaseClient`] owns one HTTP handle bound to exactly one
//! [`EffectiveConfig`]. Operations are grouped by API surface:
//! - [`query`]: PostgREST table access and raw SQL
//! - [`auth`]: GoTrue user flows
//! - [`storage`]: object storage
//! - [`realtime`]: subscriptions and broadcast
//!
//! Every operation returns [`BackendResult`]; failures carry the operation
//! name and the table, bucket or channel involved. Nothing is retried.
//!
//! State that outlives a call (user sessions, realtime subscriptions) lives in
//! [`SharedState`], partitioned by [`EffectiveConfig::partition_key`]. User
//! sessions are further keyed by the caller's session id, so a client only
//! ever acts as a user that signed in through the same caller.

pub mod auth;
pub mod query;
pub mod realtime;
pub mod storage;

pub use auth::{Session, SessionStore};
pub use query::{Filter, OrderBy, Pagination, QueryParams};
pub use realtime::{Subscription, SubscriptionKind, SubscriptionRegistry};

use crate::config::{ConfigError, EffectiveConfig};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// A table row as returned by PostgREST.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failure of a single backend operation.
#[derive(Debug, Error)]
#[error("{operation} failed{}: {cause}", target_suffix(.target))]
pub struct BackendError {
    /// Operation that failed (e.g., "delete record").
    pub operation: &'static str,

    /// Table, bucket or channel involved.
    pub target: Option<String>,

    /// Underlying cause.
    #[source]
    pub cause: BackendCause,
}

fn target_suffix(target: &Option<String>) -> String {
    target
        .as_ref()
        .map(|t| format!(" for {}", t))
        .unwrap_or_default()
}

impl BackendError {
    /// Create a new backend error.
    pub fn new(operation: &'static str, target: Option<&str>, cause: BackendCause) -> Self {
        Self {
            operation,
            target: target.map(str::to_string),
            cause,
        }
    }

    /// HTTP status reported by the backend, if any.
    pub fn status(&self) -> Option<u16> {
        match &self.cause {
            BackendCause::Api { status, .. } => Some(*status),
            BackendCause::Unauthorized { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Why a backend operation failed.
#[derive(Debug, Error)]
pub enum BackendCause {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The backend rejected the credentials.
    #[error("Authentication failed ({status}): {message}")]
    Unauthorized {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// The operation needs a signed-in user.
    #[error("No user is signed in")]
    NoSession,

    /// The request could not be built from the given input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The realtime socket failed or the channel join was refused.
    #[error("Realtime error: {0}")]
    Realtime(String),
}

/// Per-project state shared by every client of the process.
#[derive(Debug, Default)]
pub struct SharedState {
    /// Realtime subscriptions.
    pub subscriptions: SubscriptionRegistry,

    /// Signed-in user sessions.
    pub sessions: SessionStore,
}

impl SharedState {
    /// Create empty shared state.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Client bound to one Supabase project.
pub struct SupabaseClient {
    /// HTTP client instance.
    http: Client,

    /// Configuration this client was built from.
    config: Arc<EffectiveConfig>,

    /// Request and realtime join timeout.
    timeout: Duration,

    /// Session id of the caller this client acts for, if any.
    caller: Option<String>,

    /// Sessions and subscriptions, shared across clients.
    shared: Arc<SharedState>,
}

impl SupabaseClient {
    /// Create a client bound to `config`, acting for no caller.
    pub fn new(
        config: Arc<EffectiveConfig>,
        timeout: Duration,
        shared: Arc<SharedState>,
    ) -> Result<Self, ConfigError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            config,
            timeout,
            caller: None,
            shared,
        })
    }

    /// A client for the same project acting for `caller`.
    ///
    /// The HTTP connection pool is shared with `self`.
    pub fn with_caller(&self, caller: &str) -> Self {
        Self {
            http: self.http.clone(),
            config: self.config.clone(),
            timeout: self.timeout,
            caller: Some(caller.to_string()),
            shared: self.shared.clone(),
        }
    }

    /// Session id of the caller this client acts for.
    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// Configuration this client is bound to.
    pub fn config(&self) -> &Arc<EffectiveConfig> {
        &self.config
    }

    /// Summary of the bound project. Keys are never included.
    pub fn project_info(&self) -> serde_json::Value {
        serde_json::json!({
            "url": self.config.base_url,
            "project_ref": self.config.project_ref(),
            "dynamic": self.config.is_dynamic,
            "has_privileged_key": self.config.privileged_key.is_some(),
        })
    }

    /// Bearer for user-scoped requests: the caller's session token, else the API key.
    async fn bearer(&self) -> String {
        match self.access_token().await {
            Some(token) => token,
            None => self.config.api_key.clone(),
        }
    }

    /// Start a request authenticated as the caller's user, or with the API key.
    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let bearer = self.bearer().await;

        self.http
            .request(method, self.config.url(path))
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    /// Start a request authenticated with the privileged key.
    fn privileged_request(&self, method: Method, path: &str) -> RequestBuilder {
        let key = self.config.sql_key();

        self.http
            .request(method, self.config.url(path))
            .header("apikey", key)
            .header("Authorization", format!("Bearer {}", key))
    }

    /// Start a request authenticated with an explicit bearer token.
    fn bearer_request(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.http
            .request(method, self.config.url(path))
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {}", token))
    }

    /// Fail on non-success statuses, keeping the backend's message.
    async fn check_status(response: Response) -> Result<Response, BackendCause> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            error!("Supabase authentication failed ({})", status.as_u16());
            return Err(BackendCause::Unauthorized {
                status: status.as_u16(),
                message,
            });
        }

        warn!("Supabase API error ({}): {}", status.as_u16(), message);
        Err(BackendCause::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Handle API response and parse JSON.
    async fn handle_response<T>(response: Response) -> Result<T, BackendCause>
    where
        T: DeserializeOwned,
    {
        Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendCause::InvalidResponse(e.to_string()))
    }

    /// Handle API response whose body may be empty.
    async fn handle_optional_json(response: Response) -> Result<serde_json::Value, BackendCause> {
        let body = Self::check_status(response).await?.text().await?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| BackendCause::InvalidResponse(e.to_string()))
    }
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("config", &self.config)
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}

/// Pull a readable message out of a Supabase error body.
///
/// PostgREST uses `message`, GoTrue uses `msg` or `error_description`,
/// Storage uses `error`/`message`. Falls back to the raw body.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "msg", "error_description", "error"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }
    if body.is_empty() {
        "Unknown error".to_string()
    } else {
        body.to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ProjectDefaults;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    pub(crate) fn test_client(base_url: &str) -> SupabaseClient {
        let defaults = ProjectDefaults {
            base_url: Some(base_url.to_string()),
            api_key: Some("anon-key".to_string()),
            privileged_key: Some("service-key".to_string()),
            tenant_url_template: crate::config::DEFAULT_PROJECT_URL_TEMPLATE.to_string(),
        };
        let config = EffectiveConfig::resolve(None, None, &defaults).unwrap();
        SupabaseClient::new(Arc::new(config), Duration::from_secs(5), Arc::new(SharedState::new()))
            .unwrap()
    }

    /// Start a local Phoenix realtime endpoint that answers every join with
    /// `status`. Returns its base URL and a feed of `join <topic>` / `closed`
    /// events, one per join and one per finished connection.
    pub(crate) async fn spawn_realtime_server(
        status: &'static str,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events, feed) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let events = events.clone();
                tokio::spawn(async move {
                    let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(message)) = socket.next().await {
                        let Message::Text(text) = message else { continue };
                        let message: serde_json::Value = serde_json::from_str(&text).unwrap();
                        if message["event"] != "phx_join" {
                            continue;
                        }
                        let topic = message["topic"].as_str().unwrap_or_default().to_string();
                        let _ = events.send(format!("join {}", topic));
                        let reply = serde_json::json!({
                            "topic": topic,
                            "event": "phx_reply",
                            "ref": message["ref"],
                            "payload": {"status": status, "response": {"reason": "join denied"}}
                        });
                        if socket.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                    let _ = events.send("closed".to_string());
                });
            }
        });

        (format!("http://{}", addr), feed)
    }

    /// Next event from a realtime server feed, failing after two seconds.
    pub(crate) async fn next_event(feed: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(2), feed.recv())
            .await
            .expect("no realtime event")
            .expect("realtime server stopped")
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"message":"relation does not exist"}"#), "relation does not exist");
        assert_eq!(error_message(r#"{"msg":"Invalid login credentials"}"#), "Invalid login credentials");
        assert_eq!(error_message("plain failure"), "plain failure");
        assert_eq!(error_message(""), "Unknown error");
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::new(
            "delete record",
            Some("users"),
            BackendCause::Api {
                status: 400,
                message: "bad".to_string(),
            },
        );
        assert_eq!(err.to_string(), "delete record failed for users: API error (400): bad");
        assert_eq!(err.status(), Some(400));

        let err = BackendError::new("sign out", None, BackendCause::NoSession);
        assert_eq!(err.to_string(), "sign out failed: No user is signed in");
    }

    #[test]
    fn test_project_info_hides_keys() {
        let client = test_client("https://abcd.supabase.co");
        let info = client.project_info();
        assert_eq!(info["project_ref"], "abcd");
        assert_eq!(info["dynamic"], false);
        assert_eq!(info["has_privileged_key"], true);
        assert!(!info.to_string().contains("service-key"));
    }
}
