//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use authcheck_core::errors::AdapterError;
use authcheck_core::{AdapterRegistry, ExistenceResult, IdentitySource};

/// An in-memory source with a fixed user list, an optional artificial
/// latency, and a call counter.
pub struct ScriptedSource {
    id: String,
    users: BTreeSet<String>,
    latency: Duration,
    enumerable: bool,
    broken: Option<String>,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(id: &str, users: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            users: users.iter().map(|u| u.to_string()).collect(),
            latency: Duration::ZERO,
            enumerable: false,
            broken: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn enumerable(mut self) -> Self {
        self.enumerable = true;
        self
    }

    pub fn broken(mut self, reason: &str) -> Self {
        self.broken = Some(reason.to_string());
        self
    }
}

#[async_trait]
impl IdentitySource for ScriptedSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.id
    }

    async fn exists(&self, identity: &str) -> ExistenceResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.broken {
            Some(reason) => ExistenceResult::Error(reason.clone()),
            None => ExistenceResult::from_exists(self.users.contains(identity)),
        }
    }

    fn supports_enumeration(&self) -> bool {
        self.enumerable
    }

    async fn enumerate(&self) -> Result<Vec<String>, AdapterError> {
        match &self.broken {
            Some(reason) => Err(AdapterError::Malformed(reason.clone())),
            None => Ok(self.users.iter().cloned().collect()),
        }
    }
}

/// Register `source` under its own id.
pub fn register(registry: &mut AdapterRegistry, source: Arc<ScriptedSource>) {
    let id = source.id().to_string();
    registry
        .register(&id, || Ok(source as Arc<dyn IdentitySource>))
        .unwrap();
}
