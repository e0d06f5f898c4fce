//! Long-running operations
//!
//! ARM answers PUT and DELETE on scale sets with an operation that has to be
//! polled until it reaches a terminal state. The operation is followed via the
//! `Azure-AsyncOperation` header when present, then the `Location` header, and
//! finally the resource's own `provisioningState`.

use super::client::AzureClient;
use super::http::ApiResponse;
use anyhow::{Context, Result};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Polling interval used when the service doesn't send `Retry-After`
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Status of a long-running operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Still running, poll again
    Running,
    /// Completed successfully
    Done,
    /// Completed with an error message
    Failed(String),
    /// Cancelled by the service or another caller
    Canceled,
    /// A status string this client doesn't know
    Unknown(String),
}

impl OperationStatus {
    /// Parse an ARM status / provisioning state
    pub fn from_status_str(status: &str, error: Option<&Value>) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "succeeded" => Self::Done,
            "failed" => Self::Failed(error_message(error)),
            "canceled" | "cancelled" => Self::Canceled,
            "inprogress" | "accepted" | "running" | "creating" | "updating" | "deleting" => {
                Self::Running
            }
            _ => Self::Unknown(status.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_) | Self::Canceled)
    }
}

fn error_message(error: Option<&Value>) -> String {
    let Some(error) = error else {
        return "operation failed without error details".to_string();
    };
    let code = error.get("code").and_then(|v| v.as_str()).unwrap_or("Unknown");
    let message = error
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("no message");
    format!("{}: {}", code, message)
}

/// How to find out whether the operation is finished
#[derive(Debug, Clone, PartialEq, Eq)]
enum PollTarget {
    /// `Azure-AsyncOperation` URL returning `{"status": ...}`
    AsyncOperation(String),
    /// `Location` URL returning 202 while running
    Location(String),
    /// The resource itself, checking `properties.provisioningState`
    Resource(String),
    /// Already finished when the initial response came back
    Completed,
}

/// An operation that has been accepted by the service and may need polling
#[derive(Debug, Clone)]
pub struct PendingOperation {
    target: PollTarget,
    retry_after: Option<Duration>,
    pub created_at: Instant,
    pub poll_count: u32,
}

impl PendingOperation {
    /// Build from the initial response of a PUT or DELETE
    ///
    /// `resource_url` is the URL the request was sent to, used when the
    /// service only reports progress through `provisioningState`.
    pub fn from_response(response: &ApiResponse, resource_url: &str) -> Self {
        let target = if let Some(url) = &response.async_operation {
            PollTarget::AsyncOperation(url.clone())
        } else if let Some(url) = &response.location {
            PollTarget::Location(url.clone())
        } else if provisioning_state(&response.body)
            .map(|s| !OperationStatus::from_status_str(s, None).is_terminal())
            .unwrap_or(false)
        {
            PollTarget::Resource(resource_url.to_string())
        } else {
            PollTarget::Completed
        };

        Self {
            target,
            retry_after: response.retry_after,
            created_at: Instant::now(),
            poll_count: 0,
        }
    }

    /// Whether the initial response already completed the operation
    pub fn is_completed(&self) -> bool {
        self.target == PollTarget::Completed
    }

    /// Delay before the next poll
    pub fn next_delay(&self, default: Duration) -> Duration {
        self.retry_after.unwrap_or(default)
    }

    fn mark_polled(&mut self, retry_after: Option<Duration>) {
        self.poll_count += 1;
        self.retry_after = retry_after;
    }
}

fn provisioning_state(body: &Value) -> Option<&str> {
    body.get("properties")
        .and_then(|p| p.get("provisioningState"))
        .and_then(|v| v.as_str())
}

impl AzureClient {
    /// Poll a pending operation once
    pub async fn poll_operation(&self, operation: &mut PendingOperation) -> Result<OperationStatus> {
        let (status, retry_after) = match &operation.target {
            PollTarget::Completed => return Ok(OperationStatus::Done),
            PollTarget::AsyncOperation(url) => {
                let response = self.get(url).await.context("Failed to poll operation")?;
                let status = match response.body.get("status").and_then(|v| v.as_str()) {
                    Some(s) => OperationStatus::from_status_str(s, response.body.get("error")),
                    None => OperationStatus::Unknown("missing status".to_string()),
                };
                (status, response.retry_after)
            }
            PollTarget::Location(url) => {
                let response = self.get(url).await.context("Failed to poll operation")?;
                let status = if response.status == 202 {
                    OperationStatus::Running
                } else {
                    OperationStatus::Done
                };
                (status, response.retry_after)
            }
            PollTarget::Resource(url) => {
                let response = self.get(url).await.context("Failed to poll resource state")?;
                let status = match provisioning_state(&response.body) {
                    Some(s) => OperationStatus::from_status_str(s, None),
                    None => OperationStatus::Done,
                };
                (status, response.retry_after)
            }
        };

        operation.mark_polled(retry_after);
        tracing::debug!(
            "Operation poll #{}: {:?} ({}s elapsed)",
            operation.poll_count,
            status,
            operation.created_at.elapsed().as_secs()
        );
        Ok(status)
    }

    /// Block until the operation finishes, fails or the timeout elapses
    pub async fn wait_for_completion(
        &self,
        mut operation: PendingOperation,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<()> {
        if operation.is_completed() {
            return Ok(());
        }

        tokio::time::timeout(timeout, self.poll_until_done(&mut operation, poll_interval))
            .await
            .map_err(|_| {
                anyhow::anyhow!("Timed out after {}s waiting for operation", timeout.as_secs())
            })?
    }

    async fn poll_until_done(
        &self,
        operation: &mut PendingOperation,
        poll_interval: Duration,
    ) -> Result<()> {
        loop {
            tokio::time::sleep(operation.next_delay(poll_interval)).await;
            match self.poll_operation(operation).await? {
                OperationStatus::Done => return Ok(()),
                OperationStatus::Failed(message) => {
                    return Err(anyhow::anyhow!("Operation failed: {}", message));
                }
                OperationStatus::Canceled => return Err(anyhow::anyhow!("Operation was canceled")),
                OperationStatus::Running => {}
                OperationStatus::Unknown(s) => {
                    tracing::warn!("Unknown operation status: {}", s);
                }
            }
        }
    }
}
