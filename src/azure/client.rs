//! Azure Client
//!
//! Main client for interacting with Azure Resource Manager, combining
//! authentication and HTTP functionality.

use super::auth::AzureCredentials;
use super::http::{ApiError, ApiResponse, AzureHttpClient};
use anyhow::{Context, Result};
use serde_json::Value;
use url::Url;

/// Resource Manager endpoint for the public cloud
pub const DEFAULT_RESOURCE_MANAGER_ENDPOINT: &str = "https://management.azure.com";

/// Main Azure client
#[derive(Clone)]
pub struct AzureClient {
    pub credentials: AzureCredentials,
    pub http: AzureHttpClient,
    pub subscription_id: String,
    pub endpoint: String,
}

impl AzureClient {
    /// Create a new Azure client
    pub fn new(credentials: AzureCredentials, subscription_id: &str, endpoint: &str) -> Result<Self> {
        let http = AzureHttpClient::new()?;

        Url::parse(endpoint)
            .with_context(|| format!("Invalid resource manager endpoint: {}", endpoint))?;

        Ok(Self {
            credentials,
            http,
            subscription_id: subscription_id.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    /// Make a GET request
    pub async fn get(&self, url: &str) -> Result<ApiResponse> {
        let token = self.get_token().await?;
        match self.http.get(url, &token).await {
            Err(e) if is_unauthorized(&e) => {
                let token = self.credentials.refresh_token().await?;
                self.http.get(url, &token).await
            }
            other => other,
        }
    }

    /// Make a PUT request
    pub async fn put(&self, url: &str, body: &Value) -> Result<ApiResponse> {
        let token = self.get_token().await?;
        match self.http.put(url, &token, body).await {
            Err(e) if is_unauthorized(&e) => {
                let token = self.credentials.refresh_token().await?;
                self.http.put(url, &token, body).await
            }
            other => other,
        }
    }

    /// Make a DELETE request
    pub async fn delete(&self, url: &str) -> Result<ApiResponse> {
        let token = self.get_token().await?;
        match self.http.delete(url, &token).await {
            Err(e) if is_unauthorized(&e) => {
                let token = self.credentials.refresh_token().await?;
                self.http.delete(url, &token).await
            }
            other => other,
        }
    }

    // =========================================================================
    // Resource Manager URL helpers
    // =========================================================================

    /// Build a URL for an absolute resource ID (`/subscriptions/...`)
    pub fn resource_url(&self, resource_id: &str, api_version: &str) -> String {
        format!(
            "{}/{}?api-version={}",
            self.endpoint,
            resource_id.trim_start_matches('/'),
            urlencoding::encode(api_version)
        )
    }
}

fn is_unauthorized(error: &anyhow::Error) -> bool {
    if !matches!(
        error.downcast_ref::<ApiError>(),
        Some(ApiError { status: 401, .. })
    ) {
        return false;
    }
    tracing::debug!("Request was unauthorized, refreshing token and retrying once");
    true
}

/// Format an ARM API error for display
/// Generic messages avoid leaking API details to the terminal
pub fn format_azure_error(error: &anyhow::Error) -> String {
    if let Some(api) = error.chain().find_map(|e| e.downcast_ref::<ApiError>()) {
        return match api.status {
            401 => "Authentication failed. Run 'az login' or check your service principal.".to_string(),
            403 => "Permission denied. Check your Azure role assignments.".to_string(),
            404 => "Resource not found.".to_string(),
            409 => "Resource conflict. The resource may already exist or be in use.".to_string(),
            429 => "Rate limit exceeded. Please try again later.".to_string(),
            400 => format!("Invalid request ({}): {}", api.code, api.message),
            500..=599 => "Azure service temporarily unavailable. Please try again.".to_string(),
            _ => format!("Request failed with status {}.", api.status),
        };
    }

    format!("{:#}", error)
}
