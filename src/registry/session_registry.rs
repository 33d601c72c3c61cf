use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{error, info, warn};

use crate::config::{ConnectorConfig, GatewayConfig};
use crate::error::{GatewayError, Result};
use crate::gateway::GatewaySession;

/// Registry of gateway sessions keyed by role name.
///
/// Populated once at startup and torn down with [`close_all`](Self::close_all)
/// at shutdown. Clones share the same underlying map.
pub struct GatewayRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<GatewaySession>>>>,
}

impl GatewayRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a session under `role`, returning the session it replaced
    pub fn register(
        &self,
        role: impl Into<String>,
        session: GatewaySession,
    ) -> Result<Option<Arc<GatewaySession>>> {
        self.insert(role.into(), Arc::new(session))
    }

    fn insert(
        &self,
        role: String,
        session: Arc<GatewaySession>,
    ) -> Result<Option<Arc<GatewaySession>>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| GatewayError::LockPoisoned(e.to_string()))?;

        let replaced = sessions.insert(role.clone(), session);
        if replaced.is_some() {
            warn!("Replaced gateway session for role '{}'", role);
        } else {
            info!("Registered gateway session for role '{}'", role);
        }
        Ok(replaced)
    }

    /// Get the session for `role`; `None` when the role is unknown
    pub fn get(&self, role: &str) -> Result<Option<Arc<GatewaySession>>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| GatewayError::LockPoisoned(e.to_string()))?;

        Ok(sessions.get(role).cloned())
    }

    /// Registered role names, sorted
    pub fn roles(&self) -> Result<Vec<String>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| GatewayError::LockPoisoned(e.to_string()))?;

        let mut roles: Vec<String> = sessions.keys().cloned().collect();
        roles.sort();
        Ok(roles)
    }

    pub fn len(&self) -> Result<usize> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| GatewayError::LockPoisoned(e.to_string()))?;

        Ok(sessions.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Set up a session for `role` and register it.
    ///
    /// Nothing is registered when setup fails. The returned handle is the
    /// session that was inserted, even if another task replaces or drains the
    /// role right after.
    pub async fn connect_role(
        &self,
        role: &str,
        config: &GatewayConfig,
    ) -> Result<Arc<GatewaySession>> {
        let session = Arc::new(GatewaySession::connect(config).await?);
        self.insert(role.to_string(), Arc::clone(&session))?;
        Ok(session)
    }

    /// Set up and register a session for every configured role.
    ///
    /// Roles whose setup fails are left unregistered so requests for them are
    /// rejected as unavailable; their errors are returned.
    pub async fn connect_all(&self, config: &ConnectorConfig) -> Vec<(String, GatewayError)> {
        let mut failures = Vec::new();

        for (role, gateway) in &config.gateways {
            if let Err(e) = self.connect_role(role, gateway).await {
                error!("Gateway for role '{}' is unavailable: {}", role, e);
                failures.push((role.clone(), e));
            }
        }

        failures
    }

    /// Close and remove every session.
    ///
    /// Every session is closed even if some fail; failures are reported
    /// together as [`GatewayError::CloseFailures`].
    pub async fn close_all(&self) -> Result<()> {
        let drained: Vec<(String, Arc<GatewaySession>)> = {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|e| GatewayError::LockPoisoned(e.to_string()))?;
            sessions.drain().collect()
        };

        let mut failures = Vec::new();
        for (role, session) in drained {
            match session.close().await {
                Ok(()) => info!("Closed gateway session for role '{}'", role),
                Err(e) => {
                    error!("Failed to close gateway session for role '{}': {}", role, e);
                    failures.push((role, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::CloseFailures(failures))
        }
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for GatewayRegistry {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}
