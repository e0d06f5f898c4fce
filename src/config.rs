//! Configuration Management
//!
//! Handles persistent settings storage for azvmss.

use crate::azure::auth::{get_default_subscription, DEFAULT_AUTHORITY_HOST};
use crate::azure::client::DEFAULT_RESOURCE_MANAGER_ENDPOINT;
use crate::azure::operation::DEFAULT_POLL_INTERVAL;
use crate::compute::{HandlerOptions, Timeouts};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-operation timeouts in minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    pub create_minutes: u64,
    pub read_minutes: u64,
    pub update_minutes: u64,
    pub delete_minutes: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            create_minutes: 60,
            read_minutes: 5,
            update_minutes: 60,
            delete_minutes: 60,
        }
    }
}

impl From<TimeoutSettings> for Timeouts {
    fn from(t: TimeoutSettings) -> Self {
        let minutes = |m: u64| Duration::from_secs(m.saturating_mul(60));
        Timeouts {
            create: minutes(t.create_minutes),
            read: minutes(t.read_minutes),
            update: minutes(t.update_minutes),
            delete: minutes(t.delete_minutes),
        }
    }
}

/// User configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Subscription to manage scale sets in
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Resource Manager endpoint, for sovereign clouds
    #[serde(default)]
    pub resource_manager_endpoint: Option<String>,
    /// Azure AD authority used for client-credential logins
    #[serde(default)]
    pub authority_host: Option<String>,
    /// Seconds between polls when the service sends no `Retry-After`
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    /// Refuse to create over an existing scale set (default true)
    #[serde(default)]
    pub require_import: Option<bool>,
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("azvmss").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path, falling back to defaults when unreadable
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Get effective subscription (CLI > config > environment / Azure CLI default)
    pub fn effective_subscription(&self) -> String {
        self.subscription_id
            .clone()
            .or_else(get_default_subscription)
            .unwrap_or_default()
    }

    pub fn effective_endpoint(&self) -> String {
        self.resource_manager_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_RESOURCE_MANAGER_ENDPOINT.to_string())
    }

    pub fn effective_authority_host(&self) -> String {
        self.authority_host
            .clone()
            .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string())
    }

    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    /// Options for the scale set handler
    pub fn handler_options(&self) -> HandlerOptions {
        HandlerOptions {
            timeouts: self.timeouts.into(),
            poll_interval: self.effective_poll_interval(),
            require_import: self.require_import.unwrap_or(true),
        }
    }
}
