//! Error types for the AuthCheck core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Alias(#[from] AliasError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed request to the orchestrator (e.g. an empty user list).
    #[error("invalid request: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Adapter errors
// ---------------------------------------------------------------------------

/// Errors raised inside an identity source adapter.
///
/// `Config` is reported at registration time. Every other variant is a call
/// failure and is converted into `ExistenceResult::Error` at the adapter
/// boundary; it never reaches the verification engine as an `Err`.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The adapter is missing required configuration.
    #[error("adapter '{source_id}' is misconfigured: {detail}")]
    Config { source_id: String, detail: String },

    /// The backend did not answer within the adapter's own timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The backend rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP-level transport error (network, TLS, etc.).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with an unexpected status code.
    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// LDAP connection, bind or search error.
    #[error("LDAP error: {0}")]
    Ldap(String),

    /// The backend answered with something we could not interpret.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The backend has no listing capability.
    #[error("source '{0}' does not support enumeration")]
    Unsupported(String),

    /// Generic I/O wrapper (file-backed sources).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Shorthand for a configuration error on `source_id`.
    pub fn config(source_id: &str, detail: impl Into<String>) -> Self {
        Self::Config {
            source_id: source_id.to_string(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

/// Errors from the adapter registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No adapter is registered under this id.
    #[error("identity source '{0}' is not registered")]
    NotFound(String),

    /// An adapter with this id is already registered.
    #[error("identity source '{0}' is already registered")]
    Duplicate(String),

    /// Ids must be non-empty, lowercase, and free of whitespace.
    #[error("invalid identity source id '{0}': ids must be lowercase with no whitespace")]
    InvalidId(String),

    /// The factory built an adapter whose `id()` disagrees with the
    /// registration id.
    #[error("adapter registered as '{registered}' reports id '{reported}'")]
    IdMismatch { registered: String, reported: String },
}

// ---------------------------------------------------------------------------
// Alias errors
// ---------------------------------------------------------------------------

/// Errors from the alias resolver and its persisted group document.
#[derive(Debug, Error)]
pub enum AliasError {
    /// Malformed input to a resolver operation. No mutation was applied.
    #[error("invalid alias operation: {0}")]
    Validation(String),

    /// The requested group id does not exist.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// The group document could not be written. In-memory state is unchanged.
    #[error("failed to persist alias mapping to '{path}': {detail}")]
    Persistence { path: String, detail: String },

    /// The document is not valid JSON or lacks the expected top-level shape.
    #[error("alias mapping file '{path}' is malformed: {detail}")]
    Malformed { path: String, detail: String },

    /// Generic I/O error while reading the document.
    #[error("alias mapping I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
