//! Identity source adapters.
//!
//! Every backend (Okta, RADIUS, Active Directory, Slack) sits behind the
//! [`IdentitySource`] trait. Adapters own their connection configuration and
//! their own timeouts, and they turn every backend failure into
//! [`ExistenceResult::Error`] so that one broken source can never take down
//! a verification batch.

pub mod active_directory;
pub mod okta;
pub mod radius;
pub mod slack;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::AdapterError;
use crate::models::ExistenceResult;

pub use active_directory::ActiveDirectorySource;
pub use okta::OktaSource;
pub use radius::RadiusSource;
pub use slack::SlackSource;

/// Uniform capability interface over one external identity backend.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Stable, unique, lowercase identifier (e.g. `okta`).
    fn id(&self) -> &str;

    /// Human-readable name for column headers.
    fn display_name(&self) -> &str;

    /// Check that the configuration this adapter was built with is usable.
    fn validate_config(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Does `identity` exist in this source?
    ///
    /// Must not panic or hang past the adapter's own timeout; all failures
    /// are reported as `ExistenceResult::Error`.
    async fn exists(&self, identity: &str) -> ExistenceResult;

    /// Whether [`enumerate`](Self::enumerate) is supported.
    fn supports_enumeration(&self) -> bool {
        false
    }

    /// List every identity known to this source.
    ///
    /// Each call queries the backend again, so the listing can be restarted
    /// at will. Sources without a listing capability return
    /// [`AdapterError::Unsupported`].
    async fn enumerate(&self) -> Result<Vec<String>, AdapterError> {
        Err(AdapterError::Unsupported(self.id().to_string()))
    }
}

/// Convert an adapter-internal lookup into an [`ExistenceResult`], logging
/// the failure reason.
pub(crate) fn to_existence(
    source_id: &str,
    identity: &str,
    lookup: Result<bool, AdapterError>,
) -> ExistenceResult {
    match lookup {
        Ok(exists) => ExistenceResult::from_exists(exists),
        Err(e) => {
            debug!(source = source_id, identity, error = %e, "existence check failed");
            ExistenceResult::Error(e.to_string())
        }
    }
}

/// Run `fut` under the adapter's own timeout.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout {
            secs: timeout.as_secs(),
        }),
    }
}

/// Map a reqwest error, surfacing timeouts as [`AdapterError::Timeout`].
pub(crate) fn http_error(timeout: Duration) -> impl Fn(reqwest::Error) -> AdapterError {
    move |e| {
        if e.is_timeout() {
            AdapterError::Timeout {
                secs: timeout.as_secs(),
            }
        } else {
            AdapterError::Http(e)
        }
    }
}

/// In-memory adapters for unit tests.
#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::IdentitySource;
    use crate::errors::AdapterError;
    use crate::models::ExistenceResult;

    /// How a fake answers `exists`.
    pub enum Behavior {
        Known,
        Fail(&'static str),
        Hang,
        Panic,
    }

    pub struct FixedSource {
        id: String,
        known: BTreeSet<String>,
        behavior: Behavior,
        enumerable: bool,
    }

    impl FixedSource {
        /// Answers `Found` for `known`, `NotFound` otherwise.
        pub fn new(id: &str, known: &[&str]) -> Self {
            Self {
                id: id.to_string(),
                known: known.iter().map(|s| s.to_string()).collect(),
                behavior: Behavior::Known,
                enumerable: false,
            }
        }

        pub fn with_behavior(mut self, behavior: Behavior) -> Self {
            self.behavior = behavior;
            self
        }

        pub fn enumerable(mut self) -> Self {
            self.enumerable = true;
            self
        }
    }

    #[async_trait]
    impl IdentitySource for FixedSource {
        fn id(&self) -> &str {
            &self.id
        }

        fn display_name(&self) -> &str {
            &self.id
        }

        async fn exists(&self, identity: &str) -> ExistenceResult {
            match self.behavior {
                Behavior::Known => ExistenceResult::from_exists(self.known.contains(identity)),
                Behavior::Fail(reason) => ExistenceResult::Error(reason.to_string()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    ExistenceResult::Found
                }
                Behavior::Panic => panic!("backend exploded"),
            }
        }

        fn supports_enumeration(&self) -> bool {
            self.enumerable
        }

        async fn enumerate(&self) -> Result<Vec<String>, AdapterError> {
            if !self.enumerable {
                return Err(AdapterError::Unsupported(self.id.clone()));
            }
            match self.behavior {
                Behavior::Fail(reason) => Err(AdapterError::Malformed(reason.to_string())),
                _ => Ok(self.known.iter().cloned().collect()),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: Result<(), AdapterError> = with_timeout(Duration::from_secs(3), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AdapterError::Timeout { secs: 3 })));
    }

    #[test]
    fn test_to_existence_keeps_reason() {
        let result = to_existence("okta", "jdoe", Err(AdapterError::Auth("bad token".into())));
        assert_eq!(
            result,
            ExistenceResult::Error("authentication failed: bad token".into())
        );
        assert_eq!(to_existence("okta", "jdoe", Ok(true)), ExistenceResult::Found);
    }
}
