//! State file
//!
//! The last known ID and attributes of a managed scale set, written after
//! every successful operation and consumed by read, update and delete.

use crate::compute::{LinuxVirtualMachineScaleSetConfig, ScaleSetState};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub id: String,
    pub attributes: LinuxVirtualMachineScaleSetConfig,
    pub updated_at: DateTime<Utc>,
}

impl From<ScaleSetState> for StateFile {
    fn from(state: ScaleSetState) -> Self {
        Self {
            version: STATE_VERSION,
            id: state.id,
            attributes: state.attributes,
            updated_at: Utc::now(),
        }
    }
}

impl StateFile {
    /// Load state; `None` when the file doesn't exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        let state: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file {}", path.display()))?;
        if state.version != STATE_VERSION {
            bail!(
                "Unsupported state file version {} in {} (expected {})",
                state.version,
                path.display(),
                STATE_VERSION
            );
        }
        Ok(Some(state))
    }

    /// Load state that must exist
    pub fn require(path: &Path) -> Result<Self> {
        Self::load(path)?.with_context(|| {
            format!(
                "No state found at {} - create or import the scale set first",
                path.display()
            )
        })
    }

    /// Fail if `path` already tracks a scale set
    pub fn ensure_vacant(path: &Path) -> Result<()> {
        if let Some(existing) = Self::load(path)? {
            bail!(
                "State at {} already tracks {} - delete it or use another --state path",
                path.display(),
                existing.id
            );
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write state file {}", path.display()))?;
        tracing::debug!("Wrote state for {} to {}", self.id, path.display());
        Ok(())
    }

    /// Delete the state file if present
    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove state file {}", path.display()))
            }
        }
    }
}
