//! Comparison orchestrator: enumerate, verify, consolidate, report.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{info, warn};

use crate::aliases::AliasResolver;
use crate::config::{AppConfig, ErrorPolicy};
use crate::engine::VerificationEngine;
use crate::errors::CoreError;
use crate::registry::AdapterRegistry;
use crate::report::{Report, ReportContext, SourceColumn};

/// Outcome of listing every enumerable source.
#[derive(Debug, Default, Clone)]
pub struct Enumeration {
    /// source id -> identities it listed (sorted, deduplicated).
    pub identities: BTreeMap<String, Vec<String>>,
    /// source id -> why the listing failed.
    pub failures: BTreeMap<String, String>,
}

impl Enumeration {
    /// Union of every listed identity.
    pub fn universe(&self) -> BTreeSet<String> {
        self.identities.values().flatten().cloned().collect()
    }
}

/// Glue between the registry, the verification engine and the alias
/// resolver.
#[derive(Debug, Clone)]
pub struct ComparisonOrchestrator {
    engine: VerificationEngine,
    enumeration_timeout: Duration,
    error_policy: ErrorPolicy,
}

impl ComparisonOrchestrator {
    pub fn new(
        engine: VerificationEngine,
        enumeration_timeout: Duration,
        error_policy: ErrorPolicy,
    ) -> Self {
        Self {
            engine,
            enumeration_timeout,
            error_policy,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            VerificationEngine::from_config(&config.engine),
            Duration::from_secs(config.engine.enumeration_timeout_secs),
            config.report.error_policy,
        )
    }

    pub fn engine(&self) -> &VerificationEngine {
        &self.engine
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy
    }

    /// List identities from every source that supports it, concurrently.
    ///
    /// A failing, hanging, or panicking source is recorded in
    /// `failures`; the others are unaffected.
    pub async fn enumerate_all(&self, registry: &AdapterRegistry) -> Enumeration {
        let timeout = self.enumeration_timeout;
        let handles: Vec<_> = registry
            .all()
            .iter()
            .filter(|a| a.supports_enumeration())
            .map(|adapter| {
                let adapter = adapter.clone();
                let id = adapter.id().to_string();
                let handle = tokio::spawn(async move {
                    match tokio::time::timeout(timeout, adapter.enumerate()).await {
                        Ok(Ok(identities)) => Ok(identities),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("enumeration timed out after {}s", timeout.as_secs())),
                    }
                });
                (id, handle)
            })
            .collect();

        let (ids, handles): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
        let outcomes = join_all(handles).await;

        let mut enumeration = Enumeration::default();
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            let listed = match outcome {
                Ok(listed) => listed,
                Err(e) => Err(format!("enumeration aborted: {}", e)),
            };
            match listed {
                Ok(identities) => {
                    let identities: Vec<String> = identities
                        .into_iter()
                        .map(|i| i.trim().to_string())
                        .filter(|i| !i.is_empty())
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    info!(source = %id, count = identities.len(), "enumerated identities");
                    enumeration.identities.insert(id, identities);
                }
                Err(reason) => {
                    warn!(source = %id, reason = %reason, "enumeration failed");
                    enumeration.failures.insert(id, reason);
                }
            }
        }
        enumeration
    }

    /// Full comparison: every identity any enumerable source knows, plus
    /// `extra`, checked against every source and folded by alias group.
    pub async fn compare<S: AsRef<str>>(
        &self,
        registry: &AdapterRegistry,
        resolver: &AliasResolver,
        extra: &[S],
    ) -> Report {
        let started = Instant::now();
        let enumeration = self.enumerate_all(registry).await;

        let mut universe = enumeration.universe();
        universe.extend(
            extra
                .iter()
                .map(|i| i.as_ref().trim())
                .filter(|i| !i.is_empty())
                .map(String::from),
        );
        let identities: Vec<String> = universe.into_iter().collect();

        let matrix = self.engine.verify(&identities, registry).await;
        let consolidated = resolver.consolidate(&matrix);

        let enumerated = enumeration
            .identities
            .iter()
            .map(|(id, listed)| (id.clone(), listed.len()))
            .collect();
        let context = ReportContext {
            sources: columns(registry),
            enumerated,
            enumeration_failures: enumeration.failures,
            excluded_sources: registry.excluded().to_vec(),
            identity_count: matrix.len(),
        };
        let report = Report::build(consolidated, context, self.error_policy);

        info!(
            identities = report.identity_count,
            rows = report.rows.len(),
            enumeration_failures = report.enumeration_failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "comparison complete"
        );
        report
    }

    /// Check an explicit identity list. Blank entries are ignored and
    /// duplicates collapse to their first occurrence.
    pub async fn verify<S: AsRef<str>>(
        &self,
        registry: &AdapterRegistry,
        resolver: &AliasResolver,
        identities: &[S],
    ) -> Result<Report, CoreError> {
        let mut seen = HashSet::new();
        let identities: Vec<String> = identities
            .iter()
            .map(|i| i.as_ref().trim())
            .filter(|i| !i.is_empty() && seen.insert(*i))
            .map(String::from)
            .collect();
        if identities.is_empty() {
            return Err(CoreError::Validation("no identities to verify".into()));
        }

        let matrix = self.engine.verify(&identities, registry).await;
        let consolidated = resolver.consolidate(&matrix);
        let context = ReportContext {
            sources: columns(registry),
            excluded_sources: registry.excluded().to_vec(),
            identity_count: matrix.len(),
            ..Default::default()
        };
        Ok(Report::build(consolidated, context, self.error_policy))
    }
}

fn columns(registry: &AdapterRegistry) -> Vec<SourceColumn> {
    registry
        .all()
        .iter()
        .map(|a| SourceColumn {
            id: a.id().to_string(),
            display_name: a.display_name().to_string(),
            enumerable: a.supports_enumeration(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connectors::fakes::{Behavior, FixedSource};
    use crate::connectors::IdentitySource;
    use crate::models::Status;

    fn registry(sources: Vec<FixedSource>) -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        for source in sources {
            let id = source.id().to_string();
            let adapter: Arc<dyn IdentitySource> = Arc::new(source);
            registry.register(&id, || Ok(adapter)).unwrap();
        }
        registry
    }

    fn orchestrator(policy: ErrorPolicy) -> ComparisonOrchestrator {
        ComparisonOrchestrator::new(
            VerificationEngine::new(4, Duration::from_secs(5)),
            Duration::from_secs(30),
            policy,
        )
    }

    #[tokio::test]
    async fn test_compare_unions_enumerations_and_extra() {
        let registry = registry(vec![
            FixedSource::new("okta", &["a", "b"]).enumerable(),
            FixedSource::new("slack", &["b", "c"]).enumerable(),
            FixedSource::new("radius", &["a", "z"]),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let resolver = AliasResolver::load(dir.path().join("aliases.json"));

        let report = orchestrator(ErrorPolicy::Report)
            .compare(&registry, &resolver, &["z"])
            .await;

        let keys: Vec<&str> = report.rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "z"]);
        assert_eq!(report.identity_count, 4);
        assert_eq!(report.counts("okta").unwrap().enumerated, Some(2));
        assert_eq!(report.counts("radius").unwrap().enumerated, None);
        assert_eq!(report.counts("radius").unwrap().found, 2);
        assert_eq!(report.row("z").unwrap().status("okta"), Some(Status::NotFound));
        let ids: Vec<&str> = report.sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["okta", "slack", "radius"]);
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_reported_not_fatal() {
        let registry = registry(vec![
            FixedSource::new("okta", &["a"]).enumerable(),
            FixedSource::new("slack", &[])
                .enumerable()
                .with_behavior(Behavior::Fail("invalid_auth")),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let resolver = AliasResolver::load(dir.path().join("aliases.json"));

        let report = orchestrator(ErrorPolicy::Report)
            .compare::<&str>(&registry, &resolver, &[])
            .await;

        assert_eq!(report.rows.len(), 1);
        assert!(report.enumeration_failures["slack"].contains("invalid_auth"));
        assert_eq!(report.row("a").unwrap().status("slack"), Some(Status::Error));
    }

    #[tokio::test]
    async fn test_compare_consolidates_groups() {
        let registry = registry(vec![
            FixedSource::new("okta", &["a@x.com"]).enumerable(),
            FixedSource::new("ad", &["a@y.org"]),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let resolver = AliasResolver::load(dir.path().join("aliases.json"));
        resolver.merge(&["a@x.com", "a@y.org"], Some("Alice")).unwrap();

        let report = orchestrator(ErrorPolicy::Report)
            .compare(&registry, &resolver, &["a@y.org"])
            .await;

        assert_eq!(report.rows.len(), 1);
        let row = report.row("a@x.com").unwrap();
        assert!(row.grouped);
        assert_eq!(row.display_name.as_deref(), Some("Alice"));
        assert_eq!(row.status("okta"), Some(Status::Found));
        assert_eq!(row.status("ad"), Some(Status::Found));
    }

    #[tokio::test]
    async fn test_verify_rejects_empty_and_dedupes() {
        let registry = registry(vec![FixedSource::new("okta", &["a"])
            .with_behavior(Behavior::Known)]);
        let dir = tempfile::tempdir().unwrap();
        let resolver = AliasResolver::load(dir.path().join("aliases.json"));
        let orchestrator = orchestrator(ErrorPolicy::Report);

        assert!(matches!(
            orchestrator.verify(&registry, &resolver, &["", "  "]).await,
            Err(CoreError::Validation(_))
        ));

        let report = orchestrator
            .verify(&registry, &resolver, &["a", "b", "a"])
            .await
            .unwrap();
        assert_eq!(report.identity_count, 2);
        assert!(report.enumeration_failures.is_empty());
    }

    #[tokio::test]
    async fn test_verify_applies_error_policy() {
        let registry = registry(vec![
            FixedSource::new("okta", &["a"]),
            FixedSource::new("ad", &[]).with_behavior(Behavior::Fail("ldap down")),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let resolver = AliasResolver::load(dir.path().join("aliases.json"));

        let report = orchestrator(ErrorPolicy::TreatAsNotFound)
            .verify(&registry, &resolver, &["a", "b"])
            .await
            .unwrap();

        assert_eq!(report.errors_coerced, 2);
        assert_eq!(report.row("a").unwrap().status("ad"), Some(Status::NotFound));
        assert_eq!(report.error_count(), 0);
    }
}
