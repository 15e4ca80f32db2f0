//! TOML-based configuration system for AuthCheck.
//!
//! All sensitive values (API tokens, bind passwords) are stored as `_env`
//! fields that reference environment variable names. The actual secrets are
//! resolved at runtime via [`AppConfig::resolve_env_vars`].
//!
//! Adapter sections are optional: a missing `[okta]` table simply means the
//! Okta source is not configured.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging and file locations.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Verification engine limits.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Report-boundary policy.
    #[serde(default)]
    pub report: ReportConfig,

    /// Okta source.
    #[serde(default)]
    pub okta: Option<OktaConfig>,

    /// RADIUS source.
    #[serde(default)]
    pub radius: Option<RadiusConfig>,

    /// Active Directory source.
    #[serde(default)]
    pub active_directory: Option<ActiveDirectoryConfig>,

    /// Slack workspace source.
    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Path of the persisted alias group document.
    #[serde(default = "default_alias_file")]
    pub alias_file: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_alias_file() -> PathBuf {
    PathBuf::from("user_alias_mapping.json")
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            alias_file: default_alias_file(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Fan-out limits for the verification engine and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of (identity x source) calls in flight at once.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Per-call timeout applied to every existence check.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Timeout applied to each source's full enumeration.
    #[serde(default = "default_enumeration_timeout")]
    pub enumeration_timeout_secs: u64,
}

fn default_max_in_flight() -> usize {
    16
}
fn default_call_timeout() -> u64 {
    10
}
fn default_enumeration_timeout() -> u64 {
    120
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            call_timeout_secs: default_call_timeout(),
            enumeration_timeout_secs: default_enumeration_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Report policy
// ---------------------------------------------------------------------------

/// What the report does with `Error` cells.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Show errors as errors.
    #[default]
    Report,
    /// Show errors as "not found", counting every coerced cell.
    TreatAsNotFound,
}

/// Report-boundary settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// Okta REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OktaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Organization URL, e.g. `https://example.okta.com`.
    pub org_url: String,

    /// Environment variable holding the SSWS API token.
    pub api_token_env: String,

    /// Resolved API token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub api_token: Option<String>,
}

/// RADIUS server user database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to the FreeRADIUS-style `users` file.
    pub users_file: PathBuf,
}

/// Active Directory (LDAP) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveDirectoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// LDAP URL, e.g. `ldaps://dc01.example.com:636`.
    pub url: String,

    /// Search base DN.
    pub base_dn: String,

    /// Bind DN for authenticated queries.
    pub bind_dn: String,

    /// Environment variable holding the bind password.
    #[serde(default)]
    pub bind_password_env: Option<String>,

    /// Attribute matched against plain usernames.
    #[serde(default = "default_user_attribute")]
    pub user_attribute: String,

    /// Attribute matched against email addresses and listed on enumeration.
    #[serde(default = "default_mail_attribute")]
    pub mail_attribute: String,

    /// Resolved bind password.
    #[serde(skip)]
    pub bind_password: Option<String>,
}

fn default_user_attribute() -> String {
    "sAMAccountName".into()
}
fn default_mail_attribute() -> String {
    "mail".into()
}

/// Slack Web API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API base URL (default `https://slack.com/api`).
    #[serde(default = "default_slack_api_url")]
    pub api_url: String,

    /// Environment variable holding the bot token.
    pub token_env: String,

    /// Resolved bot token.
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_slack_api_url() -> String {
    "https://slack.com/api".into()
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables and populate the
    /// corresponding resolved fields.
    ///
    /// Missing variables log a warning but do not fail; the affected adapter
    /// reports itself misconfigured at registration instead.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        if let Some(ref mut okta) = self.okta {
            okta.api_token = resolve_optional_env(&okta.api_token_env, "okta.api_token_env");
        }

        if let Some(ref mut ad) = self.active_directory {
            if let Some(ref env_name) = ad.bind_password_env {
                ad.bind_password =
                    resolve_optional_env(env_name, "active_directory.bind_password_env");
            }
        }

        if let Some(ref mut slack) = self.slack {
            slack.token = resolve_optional_env(&slack.token_env, "slack.token_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate engine limits. Adapter sections are validated by the
    /// adapters themselves so one bad section never blocks the others.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_in_flight == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.max_in_flight".into(),
                detail: "must be > 0".into(),
            });
        }
        if self.engine.call_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.call_timeout_secs".into(),
                detail: "must be > 0".into(),
            });
        }
        if self.engine.enumeration_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.enumeration_timeout_secs".into(),
                detail: "must be > 0".into(),
            });
        }
        if self.general.alias_file.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "general.alias_file".into(),
                detail: "alias file path must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
