//! Project configuration and per-call resolution.
//!
//! [`Settings`] holds the process-wide defaults loaded once from environment
//! variables. [`EffectiveConfig::resolve`] turns an optional tenant
//! (project id + token) and those defaults into the configuration a single
//! call runs against.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

/// Placeholder replaced by the tenant project id in the URL template.
pub const PROJECT_PLACEHOLDER: &str = "{project}";

/// Default template used to derive a tenant's base URL.
pub const DEFAULT_PROJECT_URL_TEMPLATE: &str = "https://{project}.supabase.co";

/// Longest accepted tenant project id (one DNS label).
pub const MAX_PROJECT_ID_LEN: usize = 63;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The resolved configuration has no base URL.
    #[error("No Supabase URL configured: set DEFAULT_SUPABASE_URL or send project credentials")]
    MissingUrl,

    /// The resolved configuration has no API key.
    #[error("No Supabase API key configured: set DEFAULT_SUPABASE_ANON_KEY or send project credentials")]
    MissingApiKey,

    /// The tenant project id is not a single DNS label.
    #[error("Invalid project id: must be 1-63 lowercase letters, digits or '-', starting with a letter or digit")]
    InvalidProjectId,

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },

    /// The HTTP client for a project could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Default project credentials, used whenever a call carries no tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectDefaults {
    /// Default project base URL.
    pub base_url: Option<String>,

    /// Default public (anon) key.
    pub api_key: Option<String>,

    /// Default privileged (service role) key.
    pub privileged_key: Option<String>,

    /// Template deriving a tenant base URL from its project id.
    pub tenant_url_template: String,
}

impl ProjectDefaults {
    /// Derive the base URL for a tenant project id.
    pub fn tenant_url(&self, project_id: &str) -> String {
        let template = if self.tenant_url_template.is_empty() {
            DEFAULT_PROJECT_URL_TEMPLATE
        } else {
            &self.tenant_url_template
        };
        template.replace(PROJECT_PLACEHOLDER, project_id)
    }
}

/// Process-wide settings loaded from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Default project credentials.
    pub defaults: ProjectDefaults,

    /// Enables verbose logging.
    pub debug: bool,

    /// Tracing filter directive.
    pub log_level: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            defaults: ProjectDefaults {
                base_url: None,
                api_key: None,
                privileged_key: None,
                tenant_url_template: DEFAULT_PROJECT_URL_TEMPLATE.to_string(),
            },
            debug: false,
            log_level: "info".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// Environment variables:
    /// - `DEFAULT_SUPABASE_URL`: default project URL
    /// - `DEFAULT_SUPABASE_ANON_KEY`: default public key
    /// - `DEFAULT_SUPABASE_SERVICE_KEY`: default privileged key
    /// - `SUPABASE_PROJECT_URL_TEMPLATE`: tenant URL template (default: https://{project}.supabase.co)
    /// - `DEBUG`: enable debug logging (default: false)
    /// - `LOG_LEVEL`: tracing filter (default: info)
    /// - `REQUEST_TIMEOUT`: request timeout in seconds (default: 30)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            defaults: ProjectDefaults {
                base_url: non_empty_var("DEFAULT_SUPABASE_URL"),
                api_key: non_empty_var("DEFAULT_SUPABASE_ANON_KEY"),
                privileged_key: non_empty_var("DEFAULT_SUPABASE_SERVICE_KEY"),
                tenant_url_template: non_empty_var("SUPABASE_PROJECT_URL_TEMPLATE")
                    .unwrap_or(default.defaults.tenant_url_template),
            },
            debug: std::env::var("DEBUG")
                .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
                .unwrap_or(default.debug),
            log_level: non_empty_var("LOG_LEVEL").unwrap_or(default.log_level),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.request_timeout_secs),
        }
    }

    /// Get the request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate the tenant URL template.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let template = &self.defaults.tenant_url_template;
        if !template.contains(PROJECT_PLACEHOLDER) {
            return Err(ConfigError::InvalidValue {
                key: "SUPABASE_PROJECT_URL_TEMPLATE".to_string(),
                message: format!("template must contain {PROJECT_PLACEHOLDER}"),
            });
        }
        Ok(())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// The configuration one call runs against.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Project base URL (e.g., "https://abcd.supabase.co").
    pub base_url: String,

    /// Public API key.
    pub api_key: String,

    /// Privileged key used for raw SQL.
    pub privileged_key: Option<String>,

    /// Whether the configuration came from tenant credentials.
    pub is_dynamic: bool,
}

impl EffectiveConfig {
    /// Resolve the configuration for one call.
    ///
    /// Both `tenant_id` and `tenant_token` must be non-empty to select the
    /// tenant project; otherwise the defaults are copied unchanged. A tenant id
    /// that is not a DNS label is rejected before it reaches the template.
    pub fn resolve(
        tenant_id: Option<&str>,
        tenant_token: Option<&str>,
        defaults: &ProjectDefaults,
    ) -> Result<Self, ConfigError> {
        let tenant_id = tenant_id.filter(|s| !s.is_empty());
        let tenant_token = tenant_token.filter(|s| !s.is_empty());

        let config = match (tenant_id, tenant_token) {
            (Some(id), Some(_)) if !is_valid_project_id(id) => {
                return Err(ConfigError::InvalidProjectId);
            }
            (Some(id), Some(token)) => Self {
                base_url: defaults.tenant_url(id),
                api_key: token.to_string(),
                privileged_key: Some(token.to_string()),
                is_dynamic: true,
            },
            _ => Self {
                base_url: defaults.base_url.clone().unwrap_or_default(),
                api_key: defaults.api_key.clone().unwrap_or_default(),
                privileged_key: defaults.privileged_key.clone(),
                is_dynamic: false,
            },
        };

        if config.base_url.is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        if config.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(config)
    }

    /// Build a full URL by appending a path to the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    /// Key used for raw SQL execution.
    pub fn sql_key(&self) -> &str {
        self.privileged_key.as_deref().unwrap_or(&self.api_key)
    }

    /// Key separating per-project state between credentials.
    ///
    /// Two callers share a partition only when they hold the same base URL
    /// and the same API key. The key itself is hashed.
    pub fn partition_key(&self) -> String {
        let digest = Sha256::digest(self.api_key.as_bytes());
        let fingerprint: String = digest.iter().take(16).map(|b| format!("{:02x}", b)).collect();
        format!("{}#{}", self.base_url, fingerprint)
    }

    /// Project reference: the first host label of the base URL.
    pub fn project_ref(&self) -> String {
        let without_scheme = self
            .base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.base_url);
        let host = without_scheme.split(|c| c == '/' || c == ':').next().unwrap_or_default();
        host.split('.').next().unwrap_or(host).to_string()
    }
}

/// Whether `id` is one DNS label: `[a-z0-9][a-z0-9-]{0,62}`.
pub fn is_valid_project_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    match bytes.first() {
        Some(first) if first.is_ascii_lowercase() || first.is_ascii_digit() => {}
        _ => return false,
    }
    bytes.len() <= MAX_PROJECT_ID_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

// Keys stay out of logs.
impl std::fmt::Debug for EffectiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectiveConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("has_privileged_key", &self.privileged_key.is_some())
            .field("is_dynamic", &self.is_dynamic)
            .finish()
    }
}
