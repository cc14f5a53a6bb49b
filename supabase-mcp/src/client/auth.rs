//! GoTrue user flows.
//!
//! Sign-in and sign-up store the returned session in the [`SessionStore`]
//! under the project partition and the caller's session id. Later
//! user-scoped calls from the same caller (get/update user, sign-out, and
//! table access under RLS) run as that user; every other caller keeps using
//! the project key. A client acting for no caller never stores a session.

use super::{BackendCause, BackendError, BackendResult, SupabaseClient};
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// A signed-in user session.
#[derive(Clone, Deserialize)]
pub struct Session {
    /// Bearer token for user-scoped requests.
    pub access_token: String,

    /// Token used to obtain a new access token.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Seconds until the access token expires.
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// The authenticated user.
    #[serde(default)]
    pub user: serde_json::Value,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Signed-in sessions keyed by (project partition, caller session id).
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<(String, String), Session>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session of `caller` in `partition`.
    pub async fn get(&self, partition: &str, caller: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(&(partition.to_string(), caller.to_string()))
            .cloned()
    }

    /// Store a session, replacing the caller's previous one.
    pub async fn insert(&self, partition: &str, caller: &str, session: Session) {
        self.sessions
            .write()
            .await
            .insert((partition.to_string(), caller.to_string()), session);
    }

    /// Remove and return the caller's session.
    pub async fn remove(&self, partition: &str, caller: &str) -> Option<Session> {
        self.sessions
            .write()
            .await
            .remove(&(partition.to_string(), caller.to_string()))
    }

    /// Number of stored sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no sessions are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl SupabaseClient {
    /// Register a new user. Returns the user record, or `{}` when none is returned.
    #[instrument(skip(self, password, extra))]
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        extra: &serde_json::Value,
    ) -> BackendResult<serde_json::Value> {
        debug!("Signing up user");

        let result: Result<serde_json::Value, BackendCause> = async {
            let data = if extra.is_null() { serde_json::json!({}) } else { extra.clone() };
            let response = self
                .request(Method::POST, "/auth/v1/signup")
                .await
                .json(&serde_json::json!({
                    "email": email,
                    "password": password,
                    "data": data,
                }))
                .send()
                .await?;
            let body: serde_json::Value = Self::handle_response(response).await?;
            Ok(self.absorb_session(body).await)
        }
        .await;

        result.map_err(|cause| BackendError::new("sign up", None, cause))
    }

    /// Sign in with email and password. Returns the user record.
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> BackendResult<serde_json::Value> {
        debug!("Signing in user");

        let result: Result<serde_json::Value, BackendCause> = async {
            let response = self
                .request(Method::POST, "/auth/v1/token")
                .await
                .query(&[("grant_type", "password")])
                .json(&serde_json::json!({ "email": email, "password": password }))
                .send()
                .await?;
            let body: serde_json::Value = Self::handle_response(response).await?;
            Ok(self.absorb_session(body).await)
        }
        .await;

        result.map_err(|cause| BackendError::new("sign in", None, cause))
    }

    /// Sign out the caller's user. Without a session this is a no-op.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> BackendResult<()> {
        let session = match self.caller() {
            Some(caller) => {
                self.shared
                    .sessions
                    .remove(&self.config.partition_key(), caller)
                    .await
            }
            None => None,
        };

        let Some(session) = session else {
            debug!("Sign out without an active session");
            return Ok(());
        };

        let result: Result<(), BackendCause> = async {
            let response = self
                .bearer_request(Method::POST, "/auth/v1/logout", &session.access_token)
                .send()
                .await?;
            Self::check_status(response).await?;
            Ok(())
        }
        .await;

        info!("User signed out");
        result.map_err(|cause| BackendError::new("sign out", None, cause))
    }

    /// Fetch the signed-in user, or `None` when nobody is signed in.
    #[instrument(skip(self))]
    pub async fn get_user(&self) -> BackendResult<Option<serde_json::Value>> {
        let Some(token) = self.access_token().await else {
            return Ok(None);
        };

        let result: Result<serde_json::Value, BackendCause> = async {
            let response = self
                .bearer_request(Method::GET, "/auth/v1/user", &token)
                .send()
                .await?;
            Self::handle_response(response).await
        }
        .await;

        result
            .map(Some)
            .map_err(|cause| BackendError::new("get user", None, cause))
    }

    /// Send a password recovery email.
    #[instrument(skip(self))]
    pub async fn reset_password(&self, email: &str) -> BackendResult<()> {
        let result: Result<(), BackendCause> = async {
            let response = self
                .request(Method::POST, "/auth/v1/recover")
                .await
                .json(&serde_json::json!({ "email": email }))
                .send()
                .await?;
            Self::check_status(response).await?;
            Ok(())
        }
        .await;

        result.map_err(|cause| BackendError::new("reset password", None, cause))
    }

    /// Update the signed-in user's attributes. `fields` is passed through unchanged.
    #[instrument(skip(self, fields))]
    pub async fn update_user(&self, fields: &serde_json::Value) -> BackendResult<serde_json::Value> {
        let result: Result<serde_json::Value, BackendCause> = async {
            let token = self.access_token().await.ok_or(BackendCause::NoSession)?;
            let response = self
                .bearer_request(Method::PUT, "/auth/v1/user", &token)
                .json(fields)
                .send()
                .await?;
            Self::handle_response(response).await
        }
        .await;

        result.map_err(|cause| BackendError::new("update user", None, cause))
    }

    /// Whether the caller has a signed-in user on this project.
    pub async fn has_session(&self) -> bool {
        self.access_token().await.is_some()
    }

    /// Access token of the caller's session.
    pub(super) async fn access_token(&self) -> Option<String> {
        let caller = self.caller()?;
        self.shared
            .sessions
            .get(&self.config.partition_key(), caller)
            .await
            .map(|s| s.access_token)
    }

    /// Store the session carried by a token response and return the user.
    ///
    /// Sign-up without auto-confirm returns the bare user instead of a session.
    async fn absorb_session(&self, body: serde_json::Value) -> serde_json::Value {
        if body.get("access_token").is_none() {
            return if body.is_null() { serde_json::json!({}) } else { body };
        }

        match serde_json::from_value::<Session>(body.clone()) {
            Ok(session) => {
                let user = session.user.clone();
                match self.caller() {
                    Some(caller) => {
                        self.shared
                            .sessions
                            .insert(&self.config.partition_key(), caller, session)
                            .await;
                        info!("User session established");
                    }
                    None => debug!("Call has no session id, user session not kept"),
                }
                if user.is_null() { serde_json::json!({}) } else { user }
            }
            Err(_) => body.get("user").cloned().unwrap_or_else(|| serde_json::json!({})),
        }
    }
}
