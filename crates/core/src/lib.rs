//! AuthCheck core library.
//!
//! This crate checks whether identities exist across several independent
//! identity backends (Okta, RADIUS, Active Directory, Slack): the adapter
//! interface and its implementations, the adapter registry, the concurrent
//! verification engine, alias grouping, and the comparison orchestrator
//! that ties them into a report.

pub mod aliases;
pub mod config;
pub mod connectors;
pub mod engine;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod report;

// Re-exports for convenience.
pub use aliases::AliasResolver;
pub use config::AppConfig;
pub use connectors::IdentitySource;
pub use engine::VerificationEngine;
pub use errors::CoreError;
pub use models::{ExistenceResult, ResultMatrix};
pub use orchestrator::ComparisonOrchestrator;
pub use registry::AdapterRegistry;
pub use report::Report;
