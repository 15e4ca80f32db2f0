//! Active Directory adapter over LDAP (`ldap3`).
//!
//! Every call opens its own connection, binds, runs one search and unbinds.
//! Connect, bind and search each run under the adapter timeout.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, info, instrument, warn};

use super::{to_existence, with_timeout, IdentitySource};
use crate::config::ActiveDirectoryConfig;
use crate::errors::AdapterError;
use crate::models::ExistenceResult;

const SOURCE_ID: &str = "active_directory";
const PAGE_SIZE: i32 = 500;
/// LDAP result code for invalidCredentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Active Directory domain as an identity source.
pub struct ActiveDirectorySource {
    url: String,
    base_dn: String,
    bind_dn: String,
    bind_password: Option<String>,
    user_attribute: String,
    mail_attribute: String,
    timeout: Duration,
}

impl ActiveDirectorySource {
    pub fn new(config: &ActiveDirectoryConfig, timeout: Duration) -> Self {
        info!(url = %config.url, base_dn = %config.base_dn, "created ActiveDirectorySource");
        Self {
            url: config.url.clone(),
            base_dn: config.base_dn.clone(),
            bind_dn: config.bind_dn.clone(),
            bind_password: config.bind_password.clone(),
            user_attribute: config.user_attribute.clone(),
            mail_attribute: config.mail_attribute.clone(),
            timeout,
        }
    }

    /// Search filter matching `identity` as a username, email, or UPN.
    pub fn existence_filter(&self, identity: &str) -> String {
        let value = ldap_escape(identity);
        format!(
            "(&(objectClass=user)(|({}={v})({}={v})(userPrincipalName={v})))",
            self.user_attribute,
            self.mail_attribute,
            v = value
        )
    }

    fn enumeration_filter(&self) -> String {
        format!("(&(objectClass=user)({}=*))", self.mail_attribute)
    }

    async fn connect(&self) -> Result<Ldap, AdapterError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(|e| AdapterError::Ldap(format!("connect to {}: {}", self.url, e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        debug!(bind_dn = %self.bind_dn, "performing LDAP bind");
        let password = self.bind_password.as_deref().unwrap_or("");
        let result = ldap
            .with_timeout(self.timeout)
            .simple_bind(&self.bind_dn, password)
            .await
            .map_err(|e| AdapterError::Ldap(format!("bind: {}", e)))?;

        if result.rc == RC_INVALID_CREDENTIALS {
            return Err(AdapterError::Auth(format!(
                "invalid credentials for {}",
                self.bind_dn
            )));
        }
        if result.rc != 0 {
            return Err(AdapterError::Ldap(format!(
                "bind failed with code {}: {}",
                result.rc, result.text
            )));
        }
        Ok(ldap)
    }

    async fn lookup(&self, identity: &str) -> Result<bool, AdapterError> {
        let mut ldap = self.connect().await?;
        let filter = self.existence_filter(identity);
        let search = ldap
            .with_timeout(self.timeout)
            .search(&self.base_dn, Scope::Subtree, &filter, vec!["dn"])
            .await
            .map_err(|e| AdapterError::Ldap(format!("search: {}", e)))?;
        let (entries, _) = search
            .success()
            .map_err(|e| AdapterError::Ldap(format!("search: {}", e)))?;

        let _ = ldap.unbind().await;
        Ok(!entries.is_empty())
    }

    async fn list_mail(&self) -> Result<Vec<String>, AdapterError> {
        let mut ldap = self.connect().await?;
        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(PAGE_SIZE)),
        ];
        let filter = self.enumeration_filter();
        let mut stream = ldap
            .streaming_search_with(
                adapters,
                &self.base_dn,
                Scope::Subtree,
                &filter,
                vec![self.mail_attribute.as_str()],
            )
            .await
            .map_err(|e| AdapterError::Ldap(format!("search: {}", e)))?;

        let mut mails = Vec::new();
        while let Some(entry) = stream
            .next()
            .await
            .map_err(|e| AdapterError::Ldap(format!("search: {}", e)))?
        {
            let entry = SearchEntry::construct(entry);
            if let Some(values) = entry.attrs.get(&self.mail_attribute) {
                mails.extend(values.iter().map(|v| v.to_lowercase()));
            }
        }
        stream
            .finish()
            .await
            .success()
            .map_err(|e| AdapterError::Ldap(format!("search: {}", e)))?;

        let _ = ldap.unbind().await;
        Ok(mails)
    }
}

#[async_trait]
impl IdentitySource for ActiveDirectorySource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn display_name(&self) -> &str {
        "Active Directory"
    }

    fn validate_config(&self) -> Result<(), AdapterError> {
        if !self.url.starts_with("ldap://") && !self.url.starts_with("ldaps://") {
            return Err(AdapterError::config(
                SOURCE_ID,
                "url must start with ldap:// or ldaps://",
            ));
        }
        if self.base_dn.is_empty() {
            return Err(AdapterError::config(SOURCE_ID, "base_dn must not be empty"));
        }
        if self.bind_dn.is_empty() {
            return Err(AdapterError::config(SOURCE_ID, "bind_dn must not be empty"));
        }
        if self.bind_password.is_none() {
            return Err(AdapterError::config(SOURCE_ID, "bind password is not set"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn exists(&self, identity: &str) -> ExistenceResult {
        let lookup = with_timeout(self.timeout, self.lookup(identity)).await;
        to_existence(SOURCE_ID, identity, lookup)
    }

    fn supports_enumeration(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn enumerate(&self) -> Result<Vec<String>, AdapterError> {
        let mut mails = self.list_mail().await?;
        mails.sort();
        mails.dedup();
        info!(count = mails.len(), "enumerated Active Directory users");
        Ok(mails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str, password: Option<&str>) -> ActiveDirectoryConfig {
        ActiveDirectoryConfig {
            enabled: true,
            url: url.to_string(),
            base_dn: "dc=example,dc=com".into(),
            bind_dn: "cn=svc,dc=example,dc=com".into(),
            bind_password_env: None,
            user_attribute: "sAMAccountName".into(),
            mail_attribute: "mail".into(),
            bind_password: password.map(String::from),
        }
    }

    #[test]
    fn test_existence_filter_escapes_value() {
        let ad = ActiveDirectorySource::new(&config("ldap://dc01", Some("pw")), Duration::from_secs(1));
        assert_eq!(
            ad.existence_filter("jdoe"),
            "(&(objectClass=user)(|(sAMAccountName=jdoe)(mail=jdoe)(userPrincipalName=jdoe)))"
        );
        let filter = ad.existence_filter("x)(objectClass=*");
        assert!(!filter.contains("x)(objectClass=*"));
        assert!(filter.contains(r"x\29\28objectClass="));
    }

    #[test]
    fn test_validate_config() {
        let timeout = Duration::from_secs(1);
        assert!(ActiveDirectorySource::new(&config("ldaps://dc01:636", Some("pw")), timeout)
            .validate_config()
            .is_ok());
        assert!(ActiveDirectorySource::new(&config("dc01", Some("pw")), timeout)
            .validate_config()
            .is_err());
        assert!(ActiveDirectorySource::new(&config("ldap://dc01", None), timeout)
            .validate_config()
            .is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_error() {
        let ad = ActiveDirectorySource::new(
            &config("ldap://127.0.0.1:1", Some("pw")),
            Duration::from_secs(2),
        );
        let result = ad.exists("jdoe").await;
        assert!(result.is_error(), "got {:?}", result);
        assert!(ad.enumerate().await.is_err());
    }
}
