//! HTTP utilities for Azure Resource Manager REST calls

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const LOCATION_HEADER: &str = "location";
const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Drop control characters, keeping the rest of the text as sent
fn strip_control_characters(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}

/// A non-success response from Azure Resource Manager.
///
/// Carried inside the `anyhow` chain so callers can check the status with
/// [`is_not_found`] without string matching.
#[derive(Debug, Clone, Error)]
#[error("API request failed: {status} ({code}): {message}")]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Build from a status code and the raw response body.
    ///
    /// ARM error bodies look like `{"error": {"code": "...", "message": "..."}}`.
    pub fn from_body(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let error = parsed.as_ref().and_then(|v| v.get("error"));

        let code = error
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_string();
        let message = error
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .map(strip_control_characters)
            .unwrap_or_else(|| "no error details returned".to_string());

        Self {
            status,
            code,
            message,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Whether any error in the chain is an ARM 404
pub fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|e| e.downcast_ref::<ApiError>().is_some_and(ApiError::is_not_found))
}

/// A successful response, with the headers needed to follow long-running operations
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
    /// `Azure-AsyncOperation` header
    pub async_operation: Option<String>,
    /// `Location` header
    pub location: Option<String>,
    /// `Retry-After` header, in seconds
    pub retry_after: Option<Duration>,
}

impl ApiResponse {
    fn from_parts(status: u16, headers: &HeaderMap, body: &str) -> Result<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(body).context("Failed to parse response JSON")?
        };

        Ok(Self {
            status,
            body,
            async_operation: header(ASYNC_OPERATION_HEADER),
            location: header(LOCATION_HEADER),
            retry_after,
        })
    }
}

/// HTTP client wrapper for ARM API calls
#[derive(Clone)]
pub struct AzureHttpClient {
    client: Client,
}

impl AzureHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("azvmss/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request
    pub async fn get(&self, url: &str, token: &str) -> Result<ApiResponse> {
        self.execute(Method::GET, url, token, None).await
    }

    /// Make a PUT request with a JSON body
    pub async fn put(&self, url: &str, token: &str, body: &Value) -> Result<ApiResponse> {
        self.execute(Method::PUT, url, token, Some(body)).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, url: &str, token: &str) -> Result<ApiResponse> {
        self.execute(Method::DELETE, url, token, None).await
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("{} {} [{}]", method, url, request_id);

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header(CLIENT_REQUEST_ID_HEADER, &request_id);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&text));
            return Err(ApiError::from_body(status.as_u16(), &text).into());
        }

        ApiResponse::from_parts(status.as_u16(), &headers, &text)
    }
}
