//! Verification engine: concurrent existence checks across all sources.
//!
//! Every (identity x source) pair runs as its own task. A semaphore caps how
//! many calls are in flight at once, independent of batch size, and each call
//! runs under the per-call timeout. A slow, failing, or panicking adapter
//! only affects its own cells.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::models::{ExistenceResult, ResultMatrix};
use crate::registry::AdapterRegistry;

/// Reason recorded when a call exceeds the per-call timeout.
pub const TIMEOUT_REASON: &str = "timeout";
/// Reason recorded when a call's task dies without producing an outcome.
pub const ABORTED_REASON: &str = "adapter call aborted";

/// Bounded fan-out over an [`AdapterRegistry`].
#[derive(Debug, Clone)]
pub struct VerificationEngine {
    max_in_flight: usize,
    call_timeout: Duration,
}

impl VerificationEngine {
    /// `max_in_flight` is clamped to at least 1.
    pub fn new(max_in_flight: usize, call_timeout: Duration) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            call_timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.max_in_flight,
            Duration::from_secs(config.call_timeout_secs),
        )
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Check every identity against every registered source.
    ///
    /// The result has one key per distinct identity, each mapping to exactly
    /// one entry per registered source. Pairs that time out are recorded as
    /// `Error("timeout")`.
    pub async fn verify<S: AsRef<str>>(
        &self,
        identities: &[S],
        registry: &AdapterRegistry,
    ) -> ResultMatrix {
        let mut matrix = ResultMatrix::new();
        for identity in identities {
            matrix.entry(identity.as_ref().to_string()).or_default();
        }
        if matrix.is_empty() || registry.is_empty() {
            return matrix;
        }

        // Every pair starts as aborted so a task that never reports back
        // still leaves a recorded outcome.
        for row in matrix.values_mut() {
            for adapter in registry.all() {
                row.insert(
                    adapter.id().to_string(),
                    ExistenceResult::Error(ABORTED_REASON.into()),
                );
            }
        }

        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for identity in matrix.keys() {
            for adapter in registry.all() {
                let adapter = adapter.clone();
                let identity = identity.clone();
                let semaphore = semaphore.clone();
                let call_timeout = self.call_timeout;

                tasks.spawn(async move {
                    let source_id = adapter.id().to_string();
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return (identity, source_id, ExistenceResult::Error(ABORTED_REASON.into()));
                    };
                    let result =
                        match tokio::time::timeout(call_timeout, adapter.exists(&identity)).await {
                            Ok(result) => result,
                            Err(_) => {
                                warn!(
                                    source = %source_id,
                                    identity = %identity,
                                    timeout_secs = call_timeout.as_secs(),
                                    "existence check timed out"
                                );
                                ExistenceResult::Error(TIMEOUT_REASON.into())
                            }
                        };
                    (identity, source_id, result)
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((identity, source_id, result)) => {
                    debug!(identity = %identity, source = %source_id, result = %result, "check complete");
                    if let Some(row) = matrix.get_mut(&identity) {
                        row.insert(source_id, result);
                    }
                }
                Err(e) => warn!(error = %e, "verification task failed"),
            }
        }

        let (found, errors) = matrix
            .values()
            .flat_map(|row| row.values())
            .fold((0usize, 0usize), |(found, errors), r| {
                (found + r.is_found() as usize, errors + r.is_error() as usize)
            });
        info!(
            identities = matrix.len(),
            sources = registry.len(),
            found,
            errors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "verification batch complete"
        );

        matrix
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::fakes::{Behavior, FixedSource};
    use crate::connectors::IdentitySource;
    use crate::models::ExistenceResult::{Found, NotFound};

    fn registry(sources: Vec<FixedSource>) -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        for source in sources {
            let id = source.id().to_string();
            let adapter: Arc<dyn IdentitySource> = Arc::new(source);
            registry.register(&id, || Ok(adapter)).unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_scenario_three_sources() {
        let registry = registry(vec![
            FixedSource::new("okta", &["john.doe", "jane.smith"]),
            FixedSource::new("radius", &["jane.smith"]),
            FixedSource::new("ad", &["john.doe"]),
        ]);
        let engine = VerificationEngine::new(4, Duration::from_secs(5));

        let matrix = engine.verify(&["john.doe", "jane.smith"], &registry).await;

        assert_eq!(matrix.len(), 2);
        let john = &matrix["john.doe"];
        assert_eq!(john["okta"], Found);
        assert_eq!(john["radius"], NotFound);
        assert_eq!(john["ad"], Found);
        let jane = &matrix["jane.smith"];
        assert_eq!(jane["okta"], Found);
        assert_eq!(jane["radius"], Found);
        assert_eq!(jane["ad"], NotFound);
    }

    #[tokio::test]
    async fn test_empty_identities_returns_empty_matrix() {
        let registry = registry(vec![FixedSource::new("okta", &[])]);
        let engine = VerificationEngine::default();
        let matrix = engine.verify::<&str>(&[], &registry).await;
        assert!(matrix.is_empty());
    }

    #[tokio::test]
    async fn test_no_sources_yields_empty_rows() {
        let registry = AdapterRegistry::new();
        let engine = VerificationEngine::default();
        let matrix = engine.verify(&["a", "b"], &registry).await;
        assert_eq!(matrix.len(), 2);
        assert!(matrix.values().all(|row| row.is_empty()));
    }

    #[tokio::test]
    async fn test_duplicate_identities_collapse() {
        let registry = registry(vec![FixedSource::new("okta", &["a"])]);
        let engine = VerificationEngine::default();
        let matrix = engine.verify(&["a", "a", "b"], &registry).await;
        assert_eq!(matrix.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_source_times_out_without_blocking_others() {
        let registry = registry(vec![
            FixedSource::new("fast", &["a"]),
            FixedSource::new("stuck", &[]).with_behavior(Behavior::Hang),
        ]);
        let engine = VerificationEngine::new(2, Duration::from_secs(2));

        let matrix = engine.verify(&["a", "b", "c"], &registry).await;

        for identity in ["a", "b", "c"] {
            let row = &matrix[identity];
            assert_eq!(row.len(), 2);
            assert_eq!(row["stuck"], ExistenceResult::Error(TIMEOUT_REASON.into()));
        }
        assert_eq!(matrix["a"]["fast"], Found);
        assert_eq!(matrix["b"]["fast"], NotFound);
    }

    #[tokio::test]
    async fn test_panicking_source_is_isolated() {
        let registry = registry(vec![
            FixedSource::new("ok", &["a"]),
            FixedSource::new("boom", &[]).with_behavior(Behavior::Panic),
            FixedSource::new("err", &[]).with_behavior(Behavior::Fail("ldap down")),
        ]);
        let engine = VerificationEngine::new(1, Duration::from_secs(5));

        let matrix = engine.verify(&["a"], &registry).await;
        let row = &matrix["a"];
        assert_eq!(row["ok"], Found);
        assert_eq!(row["boom"], ExistenceResult::Error(ABORTED_REASON.into()));
        assert_eq!(row["err"], ExistenceResult::Error("ldap down".into()));
    }

    #[test]
    fn test_max_in_flight_clamped() {
        let engine = VerificationEngine::new(0, Duration::from_secs(1));
        assert_eq!(engine.max_in_flight(), 1);
    }
}
