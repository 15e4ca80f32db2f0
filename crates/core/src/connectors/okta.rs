//! Okta REST API adapter.
//!
//! Existence checks use `GET /api/v1/users/{login}`; enumeration walks
//! `GET /api/v1/users` over active users, following `Link: rel="next"`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::{http_error, to_existence, IdentitySource};
use crate::config::OktaConfig;
use crate::errors::AdapterError;
use crate::models::ExistenceResult;

const SOURCE_ID: &str = "okta";
const PAGE_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
struct OktaUser {
    #[serde(default)]
    status: Option<String>,
    profile: OktaProfile,
}

#[derive(Debug, Deserialize)]
struct OktaProfile {
    login: String,
}

/// Okta organization as an identity source.
pub struct OktaSource {
    http: reqwest::Client,
    org_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl OktaSource {
    /// Build the adapter. Fails only if the HTTP client cannot be built;
    /// missing settings are reported by `validate_config`.
    pub fn new(config: &OktaConfig, timeout: Duration) -> Result<Self, AdapterError> {
        let org_url = config.org_url.trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("authcheck/0.1"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::config(SOURCE_ID, format!("HTTP client: {}", e)))?;
        info!(org_url = %org_url, "created OktaSource");
        Ok(Self {
            http,
            org_url,
            token: config.api_token.clone(),
            timeout,
        })
    }

    fn token(&self) -> Result<&str, AdapterError> {
        self.token
            .as_deref()
            .ok_or_else(|| AdapterError::config(SOURCE_ID, "API token is not set"))
    }

    fn users_url(&self) -> Result<Url, AdapterError> {
        Url::parse(&format!("{}/api/v1/users", self.org_url))
            .map_err(|e| AdapterError::config(SOURCE_ID, format!("org_url: {}", e)))
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, AdapterError> {
        let resp = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("SSWS {}", self.token()?))
            .send()
            .await
            .map_err(http_error(self.timeout))?;
        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = resp.text().await.unwrap_or_default();
                Err(AdapterError::Auth(body))
            }
            _ => Ok(resp),
        }
    }

    async fn lookup(&self, identity: &str) -> Result<bool, AdapterError> {
        let mut url = self.users_url()?;
        url.path_segments_mut()
            .map_err(|_| AdapterError::config(SOURCE_ID, "org_url cannot be a base URL"))?
            .push(identity);

        let resp = self.get(url).await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AdapterError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let user: OktaUser = resp
            .json()
            .await
            .map_err(|e| AdapterError::Malformed(e.to_string()))?;
        // Deprovisioned users still resolve by login but can no longer sign in.
        Ok(user.status.as_deref() != Some("DEPROVISIONED"))
    }
}

/// Extract the `rel="next"` target from a `Link` header value.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
        if is_next {
            Some(target.trim_start_matches('<').trim_end_matches('>').to_string())
        } else {
            None
        }
    })
}

#[async_trait]
impl IdentitySource for OktaSource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn display_name(&self) -> &str {
        "Okta"
    }

    fn validate_config(&self) -> Result<(), AdapterError> {
        if self.org_url.is_empty() {
            return Err(AdapterError::config(SOURCE_ID, "org_url must not be empty"));
        }
        if !self.org_url.starts_with("https://") && !self.org_url.starts_with("http://") {
            return Err(AdapterError::config(
                SOURCE_ID,
                "org_url must start with http:// or https://",
            ));
        }
        self.token()?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn exists(&self, identity: &str) -> ExistenceResult {
        to_existence(SOURCE_ID, identity, self.lookup(identity).await)
    }

    fn supports_enumeration(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn enumerate(&self) -> Result<Vec<String>, AdapterError> {
        let mut url = self.users_url()?;
        url.query_pairs_mut()
            .append_pair("filter", "status eq \"ACTIVE\"")
            .append_pair("limit", &PAGE_LIMIT.to_string());

        let mut logins = Vec::new();
        let mut next = Some(url);
        while let Some(page_url) = next.take() {
            let resp = self.get(page_url).await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(AdapterError::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            next = resp
                .headers()
                .get_all(LINK)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .find_map(next_link)
                .map(|link| Url::parse(&link))
                .transpose()
                .map_err(|e| AdapterError::Malformed(format!("Link header: {}", e)))?;

            let users: Vec<OktaUser> = resp
                .json()
                .await
                .map_err(|e| AdapterError::Malformed(e.to_string()))?;
            debug!(page_size = users.len(), "fetched Okta user page");
            logins.extend(users.into_iter().map(|u| u.profile.login.to_lowercase()));
        }

        logins.sort();
        logins.dedup();
        info!(count = logins.len(), "enumerated Okta users");
        Ok(logins)
    }
}
