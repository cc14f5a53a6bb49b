//! Dynamic configuration middleware.
//!
//! Decides, per call, which Supabase project the call runs against and hands
//! back a [`CallScope`] bound to it. The scope is what tool handlers use; the
//! "current" pair kept here is only a cache so that consecutive calls for the
//! same tenant share one client. The cached client acts for no caller; a call
//! carrying a session id gets a view of it bound to that caller.

use crate::client::{SharedState, SupabaseClient};
use crate::config::{ConfigError, EffectiveConfig, ProjectDefaults, Settings};
use crate::metadata::CallMetadata;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

/// The configuration and client one call runs against.
#[derive(Debug, Clone)]
pub struct CallScope {
    /// Resolved configuration.
    pub config: Arc<EffectiveConfig>,

    /// Client bound to `config`.
    pub client: Arc<SupabaseClient>,
}

impl CallScope {
    /// Whether both scopes share the same client instance.
    pub fn same_as(&self, other: &CallScope) -> bool {
        Arc::ptr_eq(&self.client, &other.client) && Arc::ptr_eq(&self.config, &other.config)
    }

    /// The same project, acting for `caller`.
    pub fn for_caller(&self, caller: &str) -> CallScope {
        CallScope {
            config: self.config.clone(),
            client: Arc::new(self.client.with_caller(caller)),
        }
    }
}

/// Resolves tenant credentials from call metadata into call scopes.
pub struct DynamicConfigMiddleware {
    /// Default credentials and tenant URL template.
    defaults: ProjectDefaults,

    /// Request timeout for clients built here.
    timeout: Duration,

    /// Sessions and subscriptions shared by every client.
    shared: Arc<SharedState>,

    /// Scope used when a call carries no tenant.
    default_scope: CallScope,

    /// Most recently resolved scope.
    current: RwLock<CallScope>,
}

impl DynamicConfigMiddleware {
    /// Build the middleware and the default client.
    ///
    /// Fails when the defaults are incomplete; the process cannot serve
    /// credential-less calls without them.
    pub fn new(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = settings.defaults.clone();
        let timeout = settings.timeout();
        let shared = Arc::new(SharedState::new());

        let config = Arc::new(EffectiveConfig::resolve(None, None, &defaults)?);
        let client = Arc::new(SupabaseClient::new(
            config.clone(),
            timeout,
            shared.clone(),
        )?);
        let default_scope = CallScope { config, client };

        info!(url = %default_scope.config.base_url, "Default Supabase project configured");

        Ok(Self {
            defaults,
            timeout,
            shared,
            current: RwLock::new(default_scope.clone()),
            default_scope,
        })
    }

    /// Resolve the scope for one call. Never fails: anything that prevents a
    /// tenant client from being built falls back to the default project.
    ///
    /// Calls with a session id get a client acting for that caller; calls
    /// without one can never use a signed-in user session.
    #[instrument(skip(self, metadata))]
    pub async fn resolve(&self, metadata: &CallMetadata) -> CallScope {
        let scope = self.resolve_project(metadata).await;
        match metadata.session_id() {
            Some(caller) => scope.for_caller(caller),
            None => scope,
        }
    }

    /// Resolve the project-level scope, updating the cache.
    async fn resolve_project(&self, metadata: &CallMetadata) -> CallScope {
        let Some(credentials) = metadata.tenant_credentials() else {
            return self.revert_to_default().await;
        };

        let config = match EffectiveConfig::resolve(
            Some(&credentials.project_id),
            Some(&credentials.token),
            &self.defaults,
        ) {
            Ok(config) => config,
            Err(e) => {
                warn!(project = %credentials.project_id, "Tenant configuration rejected: {}", e);
                return self.revert_to_default().await;
            }
        };

        {
            let current = self.current.read().await;
            if *current.config == config {
                debug!(project = %credentials.project_id, "Reusing cached tenant client");
                return current.clone();
            }
        }

        let config = Arc::new(config);
        let client = match SupabaseClient::new(config.clone(), self.timeout, self.shared.clone()) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!(project = %credentials.project_id, "Failed to build tenant client: {}", e);
                return self.revert_to_default().await;
            }
        };

        let scope = CallScope { config, client };
        *self.current.write().await = scope.clone();
        info!(project = %credentials.project_id, url = %scope.config.base_url, "Switched to tenant project");
        scope
    }

    /// Resolve for one call and report whether a tenant configuration is active.
    pub async fn update_from_metadata(&self, metadata: &CallMetadata) -> bool {
        self.resolve(metadata).await.config.is_dynamic
    }

    /// Client of the cached current scope.
    pub async fn current_client(&self) -> Arc<SupabaseClient> {
        self.current.read().await.client.clone()
    }

    /// Configuration of the cached current scope.
    pub async fn current_config(&self) -> Arc<EffectiveConfig> {
        self.current.read().await.config.clone()
    }

    /// Scope used for calls without tenant credentials.
    pub fn default_scope(&self) -> &CallScope {
        &self.default_scope
    }

    async fn revert_to_default(&self) -> CallScope {
        let is_default = self.current.read().await.same_as(&self.default_scope);
        if !is_default {
            *self.current.write().await = self.default_scope.clone();
            debug!("Reverted to default project");
        }
        self.default_scope.clone()
    }
}
