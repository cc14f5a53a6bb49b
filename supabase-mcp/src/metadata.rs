//! Per-call metadata.
//!
//! Transports normalize whatever they receive (HTTP headers, in-band
//! `headers` objects, inline `project_code`/`access_token` arguments) into a
//! [`CallMetadata`]. The middleware only ever sees this type.

use std::collections::HashMap;

/// Primary header carrying the tenant project id.
pub const PROJECT_HEADER: &str = "x-supabase-project";
/// Fallback header carrying the tenant project id.
pub const PROJECT_HEADER_FALLBACK: &str = "supabase-project";
/// Primary header carrying the tenant token.
pub const TOKEN_HEADER: &str = "x-supabase-token";
/// Fallback header carrying the tenant token.
pub const TOKEN_HEADER_FALLBACK: &str = "supabase-token";
/// Authorization header, read with the Bearer scheme.
pub const AUTHORIZATION_HEADER: &str = "authorization";
/// Caller session id. Set by the transport, never by tool arguments.
pub const SESSION_HEADER: &str = "mcp-session-id";

const BEARER_PREFIX: &str = "Bearer ";

/// Argument names accepted as inline credentials.
pub const PROJECT_ARGUMENT: &str = "project_code";
pub const TOKEN_ARGUMENT: &str = "access_token";
/// Argument holding an in-band header object.
pub const HEADERS_ARGUMENT: &str = "headers";

/// Normalized string-to-string metadata with lower-cased keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallMetadata {
    entries: HashMap<String, String>,
}

impl CallMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, lower-casing the key.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a value by case-insensitive key. Blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Whether no entries are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adapter for HTTP transports.
    ///
    /// Headers whose values are not valid visible ASCII are skipped.
    pub fn from_header_map(headers: &axum::http::HeaderMap) -> Self {
        let mut metadata = Self::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                metadata.insert(name.as_str(), value);
            }
        }
        metadata
    }

    /// Adapter for in-band credentials carried in tool arguments.
    ///
    /// Reads an optional `headers` object and the inline `project_code` /
    /// `access_token` arguments; the inline arguments map onto the primary
    /// headers and win over the `headers` object. A session id in the
    /// `headers` object is dropped.
    pub fn from_arguments(arguments: &serde_json::Value) -> Self {
        let mut metadata = Self::new();

        if let Some(headers) = arguments.get(HEADERS_ARGUMENT).and_then(|h| h.as_object()) {
            for (key, value) in headers {
                if key.eq_ignore_ascii_case(SESSION_HEADER) {
                    continue;
                }
                if let Some(value) = value.as_str() {
                    metadata.insert(key, value);
                }
            }
        }

        let project = arguments.get(PROJECT_ARGUMENT).and_then(|v| v.as_str());
        let token = arguments.get(TOKEN_ARGUMENT).and_then(|v| v.as_str());
        if let (Some(project), Some(token)) = (project, token) {
            metadata.insert(PROJECT_HEADER, project);
            metadata.insert(TOKEN_HEADER, token);
        }

        metadata
    }

    /// Overlay `other` on top of `self`; entries in `other` win.
    pub fn merged(mut self, other: CallMetadata) -> Self {
        self.entries.extend(other.entries);
        self
    }

    /// Session id of the caller, as assigned by the transport.
    pub fn session_id(&self) -> Option<&str> {
        self.get(SESSION_HEADER)
    }

    /// Extract tenant credentials, if both parts are present.
    pub fn tenant_credentials(&self) -> Option<TenantCredentials> {
        let project_id = self
            .get(PROJECT_HEADER)
            .or_else(|| self.get(PROJECT_HEADER_FALLBACK))?;

        let token = self
            .get(TOKEN_HEADER)
            .or_else(|| self.get(TOKEN_HEADER_FALLBACK))
            .or_else(|| {
                self.get(AUTHORIZATION_HEADER)
                    .and_then(|auth| auth.strip_prefix(BEARER_PREFIX))
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
            })?;

        Some(TenantCredentials {
            project_id: project_id.to_string(),
            token: token.to_string(),
        })
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for CallMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

/// Tenant project id and token taken from call metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct TenantCredentials {
    /// Project id.
    pub project_id: String,
    /// Access token, used as both public and privileged key.
    pub token: String,
}

impl std::fmt::Debug for TenantCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCredentials")
            .field("project_id", &self.project_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_headers() {
        let metadata: CallMetadata = [
            ("X-Supabase-Project", "proj"),
            ("X-Supabase-Token", "tok"),
        ]
        .into_iter()
        .collect();

        let creds = metadata.tenant_credentials().unwrap();
        assert_eq!(creds.project_id, "proj");
        assert_eq!(creds.token, "tok");
    }

    #[test]
    fn test_prefixed_project_wins() {
        let metadata: CallMetadata = [
            ("x-supabase-project", "primary"),
            ("supabase-project", "fallback"),
            ("supabase-token", "tok"),
        ]
        .into_iter()
        .collect();

        assert_eq!(metadata.tenant_credentials().unwrap().project_id, "primary");
    }

    #[test]
    fn test_prefixed_token_wins_over_authorization() {
        let metadata: CallMetadata = [
            ("supabase-project", "proj"),
            ("x-supabase-token", "header-token"),
            ("authorization", "Bearer bearer-token"),
        ]
        .into_iter()
        .collect();

        assert_eq!(metadata.tenant_credentials().unwrap().token, "header-token");
    }

    #[test]
    fn test_bearer_stripping() {
        let metadata: CallMetadata = [
            ("x-supabase-project", "proj"),
            ("Authorization", "Bearer abc123"),
        ]
        .into_iter()
        .collect();

        assert_eq!(metadata.tenant_credentials().unwrap().token, "abc123");
    }

    #[test]
    fn test_non_bearer_authorization_ignored() {
        let metadata: CallMetadata = [
            ("x-supabase-project", "proj"),
            ("authorization", "Basic dXNlcjpwYXNz"),
        ]
        .into_iter()
        .collect();

        assert!(metadata.tenant_credentials().is_none());
    }

    #[test]
    fn test_partial_credentials() {
        let only_project = CallMetadata::new().with("x-supabase-project", "proj");
        assert!(only_project.tenant_credentials().is_none());

        let only_token = CallMetadata::new().with("x-supabase-token", "tok");
        assert!(only_token.tenant_credentials().is_none());

        let blank = CallMetadata::new()
            .with("x-supabase-project", "  ")
            .with("x-supabase-token", "tok");
        assert!(blank.tenant_credentials().is_none());

        assert!(CallMetadata::new().tenant_credentials().is_none());
    }

    #[test]
    fn test_from_header_map() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-supabase-project", "proj".parse().unwrap());
        headers.insert("authorization", "Bearer tok".parse().unwrap());

        let metadata = CallMetadata::from_header_map(&headers);
        let creds = metadata.tenant_credentials().unwrap();
        assert_eq!(creds.project_id, "proj");
        assert_eq!(creds.token, "tok");
    }

    #[test]
    fn test_from_arguments() {
        let args = serde_json::json!({
            "table": "users",
            "headers": {"x-supabase-project": "from-headers", "x-supabase-token": "t1"},
            "project_code": "inline",
            "access_token": "t2"
        });

        let creds = CallMetadata::from_arguments(&args).tenant_credentials().unwrap();
        assert_eq!(creds.project_id, "inline");
        assert_eq!(creds.token, "t2");

        let headers_only = serde_json::json!({
            "headers": {"supabase-project": "p", "supabase-token": "t"}
        });
        let creds = CallMetadata::from_arguments(&headers_only)
            .tenant_credentials()
            .unwrap();
        assert_eq!(creds.project_id, "p");
    }

    #[test]
    fn test_inline_project_without_token_is_ignored() {
        let args = serde_json::json!({"project_code": "inline"});
        assert!(CallMetadata::from_arguments(&args).is_empty());
    }

    #[test]
    fn test_merged_overrides() {
        let transport = CallMetadata::new()
            .with("x-supabase-project", "header")
            .with("x-supabase-token", "t1");
        let inline = CallMetadata::new()
            .with("x-supabase-project", "inline")
            .with("x-supabase-token", "t2");

        let creds = transport.merged(inline).tenant_credentials().unwrap();
        assert_eq!(creds.project_id, "inline");
        assert_eq!(creds.token, "t2");
    }

    #[test]
    fn test_session_id_not_taken_from_arguments() {
        let args = serde_json::json!({
            "headers": {"Mcp-Session-Id": "someone-else", "x-supabase-project": "p"}
        });
        let metadata = CallMetadata::from_arguments(&args);
        assert_eq!(metadata.session_id(), None);
        assert_eq!(metadata.get("x-supabase-project"), Some("p"));

        let transport = CallMetadata::new().with(SESSION_HEADER, "mine");
        assert_eq!(transport.merged(metadata).session_id(), Some("mine"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = TenantCredentials {
            project_id: "p".to_string(),
            token: "secret".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("secret"));
    }
}
