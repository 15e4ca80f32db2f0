//! Registry of configured identity sources.
//!
//! The registry is built once at startup and then shared read-only with the
//! engine and the orchestrator. Registration order is the column order of
//! every report.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::connectors::{
    ActiveDirectorySource, IdentitySource, OktaSource, RadiusSource, SlackSource,
};
use crate::errors::{AdapterError, RegistryError};

/// A source that was configured but left out of queries, and why.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExcludedSource {
    pub id: String,
    pub reason: String,
}

/// Ordered set of registered identity sources.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn IdentitySource>>,
    index: HashMap<String, usize>,
    excluded: Vec<ExcludedSource>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration, in the fixed order okta,
    /// radius, active_directory, slack. Absent or disabled sections are
    /// skipped; misconfigured adapters end up in [`excluded`](Self::excluded).
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = Duration::from_secs(config.engine.call_timeout_secs);
        let mut registry = Self::new();

        if let Some(okta) = config.okta.as_ref().filter(|c| c.enabled) {
            registry.register_logged("okta", || {
                Ok(Arc::new(OktaSource::new(okta, timeout)?) as Arc<dyn IdentitySource>)
            });
        }
        if let Some(radius) = config.radius.as_ref().filter(|c| c.enabled) {
            registry.register_logged("radius", || {
                Ok(Arc::new(RadiusSource::new(radius, timeout)) as Arc<dyn IdentitySource>)
            });
        }
        if let Some(ad) = config.active_directory.as_ref().filter(|c| c.enabled) {
            registry.register_logged("active_directory", || {
                Ok(Arc::new(ActiveDirectorySource::new(ad, timeout)) as Arc<dyn IdentitySource>)
            });
        }
        if let Some(slack) = config.slack.as_ref().filter(|c| c.enabled) {
            registry.register_logged("slack", || {
                Ok(Arc::new(SlackSource::new(slack, timeout)?) as Arc<dyn IdentitySource>)
            });
        }

        info!(
            active = registry.len(),
            excluded = registry.excluded.len(),
            "identity source registry built"
        );
        registry
    }

    fn register_logged<F>(&mut self, id: &str, factory: F)
    where
        F: FnOnce() -> Result<Arc<dyn IdentitySource>, AdapterError>,
    {
        if let Err(e) = self.register(id, factory) {
            warn!(source = id, error = %e, "failed to register identity source");
        }
    }

    /// Register an adapter built by `factory` under `id`.
    ///
    /// A factory failure or a failed `validate_config` does not make this
    /// return `Err`: the adapter is recorded as excluded and the other
    /// sources keep working. `Err` is reserved for registry misuse (bad or
    /// duplicate ids).
    pub fn register<F>(&mut self, id: &str, factory: F) -> Result<(), RegistryError>
    where
        F: FnOnce() -> Result<Arc<dyn IdentitySource>, AdapterError>,
    {
        if !is_valid_id(id) {
            return Err(RegistryError::InvalidId(id.to_string()));
        }
        if self.index.contains_key(id) || self.excluded.iter().any(|e| e.id == id) {
            return Err(RegistryError::Duplicate(id.to_string()));
        }

        let checked = factory().and_then(|adapter| {
            adapter.validate_config()?;
            Ok(adapter)
        });
        let adapter = match checked {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(source = id, error = %e, "identity source excluded");
                self.excluded.push(ExcludedSource {
                    id: id.to_string(),
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        if adapter.id() != id {
            return Err(RegistryError::IdMismatch {
                registered: id.to_string(),
                reported: adapter.id().to_string(),
            });
        }

        debug!(source = id, display_name = adapter.display_name(), "registered identity source");
        self.index.insert(id.to_string(), self.adapters.len());
        self.adapters.push(adapter);
        Ok(())
    }

    /// Look up an adapter by id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn IdentitySource>, RegistryError> {
        self.index
            .get(id)
            .map(|&i| self.adapters[i].clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// All active adapters in registration order.
    pub fn all(&self) -> &[Arc<dyn IdentitySource>] {
        &self.adapters
    }

    /// Active adapter ids in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.id()).collect()
    }

    /// Adapters left out at registration, in registration order.
    pub fn excluded(&self) -> &[ExcludedSource] {
        &self.excluded
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Ids are non-empty, lowercase, and contain no whitespace.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(|c| c.is_whitespace() || c.is_uppercase())
}
