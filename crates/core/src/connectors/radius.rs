//! RADIUS adapter backed by the server's user database.
//!
//! RADIUS itself cannot answer "does this user exist" without credentials,
//! so the adapter reads the FreeRADIUS `users` file that the server
//! authorizes against. Entry lines start in column one with the user name
//! (optionally quoted); indented lines continue the previous entry.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{to_existence, with_timeout, IdentitySource};
use crate::config::RadiusConfig;
use crate::errors::AdapterError;
use crate::models::ExistenceResult;

const SOURCE_ID: &str = "radius";

/// RADIUS user database as an identity source.
pub struct RadiusSource {
    users_file: PathBuf,
    timeout: Duration,
}

impl RadiusSource {
    pub fn new(config: &RadiusConfig, timeout: Duration) -> Self {
        info!(users_file = %config.users_file.display(), "created RadiusSource");
        Self {
            users_file: config.users_file.clone(),
            timeout,
        }
    }

    async fn read_users(&self) -> Result<Vec<String>, AdapterError> {
        let contents = with_timeout(self.timeout, async {
            tokio::fs::read_to_string(&self.users_file)
                .await
                .map_err(AdapterError::Io)
        })
        .await?;
        let users = parse_users_file(&contents);
        debug!(count = users.len(), "parsed RADIUS users file");
        Ok(users)
    }

    async fn lookup(&self, identity: &str) -> Result<bool, AdapterError> {
        let users = self.read_users().await?;
        Ok(users.iter().any(|u| u.eq_ignore_ascii_case(identity)))
    }
}

/// Extract user names from FreeRADIUS `users` file contents.
///
/// Skips comments, continuation lines, `$INCLUDE` directives, and
/// `DEFAULT` entries.
pub fn parse_users_file(contents: &str) -> Vec<String> {
    let mut users = Vec::new();
    for line in contents.lines() {
        if line.is_empty() || line.starts_with(char::is_whitespace) {
            continue;
        }
        let line = line.trim_end();
        if line.starts_with('#') || line.starts_with('$') {
            continue;
        }

        let name = if let Some(rest) = line.strip_prefix('"') {
            match rest.split_once('"') {
                Some((name, _)) => name,
                None => continue,
            }
        } else {
            match line.split_whitespace().next() {
                Some(name) => name,
                None => continue,
            }
        };

        if name.is_empty() || name == "DEFAULT" {
            continue;
        }
        users.push(name.to_string());
    }
    users
}

#[async_trait]
impl IdentitySource for RadiusSource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn display_name(&self) -> &str {
        "RADIUS"
    }

    fn validate_config(&self) -> Result<(), AdapterError> {
        if !self.users_file.is_file() {
            return Err(AdapterError::config(
                SOURCE_ID,
                format!("users file not found: {}", self.users_file.display()),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn exists(&self, identity: &str) -> ExistenceResult {
        to_existence(SOURCE_ID, identity, self.lookup(identity).await)
    }

    fn supports_enumeration(&self) -> bool {
        true
    }

    async fn enumerate(&self) -> Result<Vec<String>, AdapterError> {
        let mut users: Vec<String> = self
            .read_users()
            .await?
            .into_iter()
            .map(|u| u.to_lowercase())
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }
}
