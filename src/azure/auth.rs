//! Azure Authentication
//!
//! Handles bearer tokens for Azure Resource Manager, either supplied directly
//! or obtained with the OAuth2 client-credentials flow for a service principal.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default Azure AD authority for the public cloud
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Token expiry buffer - refresh tokens this much before they actually expire
/// This prevents using tokens that are about to expire during a request
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if the token endpoint doesn't report one
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Azure AD tokens never live longer than a day
const MAX_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a freshly issued token may be served from the cache
fn cache_lifetime(expires_in: Option<u64>) -> Duration {
    expires_in
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TOKEN_TTL)
        .min(MAX_TOKEN_TTL)
        .saturating_sub(TOKEN_EXPIRY_BUFFER)
}

/// Where access tokens come from
#[derive(Clone)]
pub enum CredentialSource {
    /// A pre-acquired bearer token (e.g. `az account get-access-token`)
    StaticToken(String),
    /// Service principal with a client secret
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaticToken(_) => f.write_str("StaticToken(***)"),
            Self::ClientSecret {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ClientSecret")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Azure credentials holder with token caching
#[derive(Clone)]
pub struct AzureCredentials {
    source: CredentialSource,
    authority_host: String,
    scope: String,
    http: reqwest::Client,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    /// Check if this cached token is still valid
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl AzureCredentials {
    /// Create credentials from an explicit source
    ///
    /// `resource_manager_endpoint` determines the token scope, e.g.
    /// `https://management.azure.com` → `https://management.azure.com/.default`.
    pub fn new(
        source: CredentialSource,
        authority_host: &str,
        resource_manager_endpoint: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client for authentication")?;

        Ok(Self {
            source,
            authority_host: authority_host.trim_end_matches('/').to_string(),
            scope: format!("{}/.default", resource_manager_endpoint.trim_end_matches('/')),
            http,
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Credentials that always hand out the same bearer token
    pub fn static_token(token: &str) -> Result<Self> {
        Self::new(
            CredentialSource::StaticToken(token.to_string()),
            DEFAULT_AUTHORITY_HOST,
            super::client::DEFAULT_RESOURCE_MANAGER_ENDPOINT,
        )
    }

    /// Create credentials from the environment
    ///
    /// `AZURE_ACCESS_TOKEN` wins; otherwise `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`
    /// and `AZURE_CLIENT_SECRET` must all be set.
    pub fn from_env(authority_host: &str, resource_manager_endpoint: &str) -> Result<Self> {
        let source = credential_source_from_env().context(
            "No Azure credentials found. Set AZURE_ACCESS_TOKEN, or AZURE_TENANT_ID, \
             AZURE_CLIENT_ID and AZURE_CLIENT_SECRET",
        )?;
        tracing::debug!("Using credential source: {:?}", source);
        Self::new(source, authority_host, resource_manager_endpoint)
    }

    /// Get an access token for API calls
    /// Checks token expiry before returning cached token
    pub async fn get_token(&self) -> Result<String> {
        let (tenant_id, client_id, client_secret) = match &self.source {
            CredentialSource::StaticToken(token) => return Ok(token.clone()),
            CredentialSource::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            } => (tenant_id, client_id, client_secret),
        };

        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.authority_host, tenant_id);
        let form = format!(
            "grant_type=client_credentials&client_id={}&client_secret={}&scope={}",
            urlencoding::encode(client_id),
            urlencoding::encode(client_secret),
            urlencoding::encode(&self.scope),
        );

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .context("Failed to request access token")?;

        let status = response.status();
        if !status.is_success() {
            // The body may echo request details, keep it out of the error
            return Err(anyhow::anyhow!(
                "Failed to get access token: token endpoint returned {}",
                status
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        let lifetime = cache_lifetime(token.expires_in);
        let expires_at = Instant::now() + lifetime;

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: token.access_token.clone(),
                expires_at,
            });
        }

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            lifetime.as_secs() / 60
        );

        Ok(token.access_token)
    }

    /// Force refresh the token
    pub async fn refresh_token(&self) -> Result<String> {
        {
            let mut cache = self.token_cache.write().await;
            *cache = None;
        }

        self.get_token().await
    }
}

fn credential_source_from_env() -> Option<CredentialSource> {
    if let Some(token) = non_empty_env("AZURE_ACCESS_TOKEN") {
        return Some(CredentialSource::StaticToken(token));
    }

    Some(CredentialSource::ClientSecret {
        tenant_id: non_empty_env("AZURE_TENANT_ID")?,
        client_id: non_empty_env("AZURE_CLIENT_ID")?,
        client_secret: non_empty_env("AZURE_CLIENT_SECRET")?,
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get the Azure CLI configuration directory
pub fn get_azure_config_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AZURE_CONFIG_DIR") {
        return Some(PathBuf::from(path));
    }

    dirs::home_dir().map(|p| p.join(".azure"))
}

/// Subscription IDs are GUIDs
pub fn validate_subscription_id(subscription: &str) -> bool {
    uuid::Uuid::parse_str(subscription).is_ok()
}

/// Pick the default subscription out of an `azureProfile.json` document
fn default_subscription_from_profile(content: &str) -> Option<String> {
    // The Azure CLI writes this file with a UTF-8 BOM
    let content = content.trim_start_matches('\u{feff}');
    let profile: serde_json::Value = serde_json::from_str(content).ok()?;

    profile
        .get("subscriptions")?
        .as_array()?
        .iter()
        .find(|s| s.get("isDefault").and_then(|v| v.as_bool()).unwrap_or(false))
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())
        .filter(|id| validate_subscription_id(id))
        .map(str::to_string)
}

/// Read the default subscription from the environment or the Azure CLI profile
/// Validates the ID format before returning
pub fn get_default_subscription() -> Option<String> {
    for key in ["AZURE_SUBSCRIPTION_ID", "ARM_SUBSCRIPTION_ID"] {
        if let Ok(subscription) = std::env::var(key) {
            if validate_subscription_id(&subscription) {
                return Some(subscription);
            }
            tracing::warn!("Invalid subscription ID format in {}", key);
        }
    }

    let profile_path = get_azure_config_dir()?.join("azureProfile.json");
    let content = std::fs::read_to_string(profile_path).ok()?;
    default_subscription_from_profile(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_subscription_id() {
        assert!(validate_subscription_id("00000000-0000-0000-0000-000000000000"));
        assert!(validate_subscription_id("5a4f3e2d-1c0b-4a99-8877-665544332211"));
        assert!(!validate_subscription_id("my-subscription"));
        assert!(!validate_subscription_id(""));
    }

    #[test]
    fn test_default_subscription_from_profile() {
        let profile = "\u{feff}{\"subscriptions\":[\
            {\"id\":\"11111111-1111-1111-1111-111111111111\",\"isDefault\":false},\
            {\"id\":\"22222222-2222-2222-2222-222222222222\",\"isDefault\":true}]}";
        assert_eq!(
            default_subscription_from_profile(profile).as_deref(),
            Some("22222222-2222-2222-2222-222222222222")
        );
    }

    #[test]
    fn test_default_subscription_ignores_invalid_ids() {
        let profile = r#"{"subscriptions":[{"id":"not-a-guid","isDefault":true}]}"#;
        assert_eq!(default_subscription_from_profile(profile), None);
        assert_eq!(default_subscription_from_profile("not json"), None);
    }

    #[test]
    fn test_cache_lifetime() {
        assert_eq!(cache_lifetime(Some(3600)), Duration::from_secs(3540));
        assert_eq!(cache_lifetime(None), Duration::from_secs(29 * 60));
        assert_eq!(cache_lifetime(Some(30)), Duration::ZERO);
        assert_eq!(cache_lifetime(Some(u64::MAX)), MAX_TOKEN_TTL - TOKEN_EXPIRY_BUFFER);
    }

    #[test]
    fn test_static_token_is_returned_verbatim() {
        let credentials = AzureCredentials::static_token("abc").unwrap();
        let token = tokio_test::block_on(credentials.get_token()).unwrap();
        assert_eq!(token, "abc");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let source = CredentialSource::ClientSecret {
            tenant_id: "t".to_string(),
            client_id: "c".to_string(),
            client_secret: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", source).contains("hunter2"));
        assert!(!format!("{:?}", CredentialSource::StaticToken("s3cr3t".into())).contains("s3cr3t"));
    }
}
