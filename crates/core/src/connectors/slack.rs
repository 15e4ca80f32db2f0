//! Slack workspace adapter using the Slack Web API.
//!
//! Slack has no lookup-by-email for bots without extra scopes, so the
//! adapter fetches `users.list` once per instance and answers existence
//! checks from that list.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::{http_error, to_existence, IdentitySource};
use crate::config::SlackConfig;
use crate::errors::AdapterError;
use crate::models::ExistenceResult;

const SOURCE_ID: &str = "slack";
const PAGE_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
struct UsersListResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    members: Vec<SlackMember>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct SlackMember {
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    profile: SlackProfile,
}

#[derive(Debug, Default, Deserialize)]
struct SlackProfile {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Slack workspace as an identity source.
pub struct SlackSource {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
    timeout: Duration,
    users: OnceCell<BTreeSet<String>>,
}

impl SlackSource {
    pub fn new(config: &SlackConfig, timeout: Duration) -> Result<Self, AdapterError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("authcheck/0.1"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::config(SOURCE_ID, format!("HTTP client: {}", e)))?;
        info!("created SlackSource");
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            timeout,
            users: OnceCell::new(),
        })
    }

    /// Active users' emails, lower-cased. Fetched once, then cached; a
    /// failed fetch is not cached.
    async fn users(&self) -> Result<&BTreeSet<String>, AdapterError> {
        self.users.get_or_try_init(|| self.fetch_all_users()).await
    }

    async fn fetch_all_users(&self) -> Result<BTreeSet<String>, AdapterError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| AdapterError::config(SOURCE_ID, "token is not set"))?;
        let url = format!("{}/users.list", self.api_url);

        let mut emails = BTreeSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![("limit", PAGE_LIMIT.to_string())];
            if let Some(ref c) = cursor {
                query.push(("cursor", c.clone()));
            }

            let resp = self
                .http
                .get(&url)
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .query(&query)
                .send()
                .await
                .map_err(http_error(self.timeout))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(AdapterError::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            let page: UsersListResponse = resp
                .json()
                .await
                .map_err(|e| AdapterError::Malformed(e.to_string()))?;
            if !page.ok {
                let error = page.error.unwrap_or_else(|| "unknown error".into());
                return Err(match error.as_str() {
                    "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked" => {
                        AdapterError::Auth(error)
                    }
                    _ => AdapterError::Malformed(format!("Slack API error: {}", error)),
                });
            }

            debug!(page_size = page.members.len(), "fetched Slack user page");
            emails.extend(
                page.members
                    .into_iter()
                    .filter(|m| !m.deleted)
                    .filter_map(|m| m.profile.email)
                    .filter(|e| !e.is_empty())
                    .map(|e| e.to_lowercase()),
            );

            cursor = page
                .response_metadata
                .and_then(|m| m.next_cursor)
                .filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        info!(count = emails.len(), "fetched Slack users");
        Ok(emails)
    }
}

#[async_trait]
impl IdentitySource for SlackSource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn display_name(&self) -> &str {
        "Slack"
    }

    fn validate_config(&self) -> Result<(), AdapterError> {
        match self.token.as_deref() {
            Some(t) if !t.is_empty() => Ok(()),
            _ => Err(AdapterError::config(SOURCE_ID, "token is not set")),
        }
    }

    #[instrument(skip(self))]
    async fn exists(&self, identity: &str) -> ExistenceResult {
        let lookup = self
            .users()
            .await
            .map(|users| users.contains(&identity.to_lowercase()));
        to_existence(SOURCE_ID, identity, lookup)
    }

    fn supports_enumeration(&self) -> bool {
        true
    }

    async fn enumerate(&self) -> Result<Vec<String>, AdapterError> {
        Ok(self.users().await?.iter().cloned().collect())
    }
}
