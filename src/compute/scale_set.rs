//! Linux virtual machine scale set lifecycle
//!
//! Create, read, update, delete and import against the compute API. Every
//! remote failure is wrapped with the scale set and resource group it was
//! about, and write operations block until the long-running operation the
//! service hands back has finished.

use super::expand::expand_scale_set;
use super::flatten::flatten_scale_set;
use super::ids::{normalize_location, ScaleSetId};
use super::models::VirtualMachineScaleSet;
use super::schema::LinuxVirtualMachineScaleSetConfig;
use crate::azure::client::AzureClient;
use crate::azure::http::is_not_found;
use crate::azure::operation::{PendingOperation, DEFAULT_POLL_INTERVAL};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

pub const API_VERSION: &str = "2019-07-01";

/// Upper bounds for each operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(60 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(60 * 60),
            delete: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub timeouts: Timeouts,
    pub poll_interval: Duration,
    /// Refuse to create over a scale set that already exists
    pub require_import: bool,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            require_import: true,
        }
    }
}

/// What is known about a scale set after a successful operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleSetState {
    pub id: String,
    pub attributes: LinuxVirtualMachineScaleSetConfig,
}

fn describe(id: &ScaleSetId) -> String {
    format!(
        "Linux Virtual Machine Scale Set {:?} (Resource Group {:?})",
        id.name, id.resource_group
    )
}

/// Run `operation` to completion or fail once `timeout` has elapsed
async fn bounded<T>(
    timeout: Duration,
    what: impl FnOnce() -> String,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("Timed out after {:?} {}", timeout, what())),
    }
}

/// Fields that cannot change without replacing the scale set
pub fn force_new_changes(
    prior: &LinuxVirtualMachineScaleSetConfig,
    desired: &LinuxVirtualMachineScaleSetConfig,
) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if prior.name != desired.name {
        changed.push("name");
    }
    if prior.resource_group_name != desired.resource_group_name {
        changed.push("resource_group_name");
    }
    if normalize_location(&prior.location) != normalize_location(&desired.location) {
        changed.push("location");
    }
    if prior.disable_password_authentication != desired.disable_password_authentication {
        changed.push("disable_password_authentication");
    }
    let nic_names = |c: &LinuxVirtualMachineScaleSetConfig| -> Vec<String> {
        c.network_interface.iter().map(|n| n.name.clone()).collect()
    };
    if nic_names(prior) != nic_names(desired) {
        changed.push("network_interface.name");
    }
    changed
}

pub struct ScaleSetHandler {
    client: AzureClient,
    options: HandlerOptions,
}

impl ScaleSetHandler {
    pub fn new(client: AzureClient, options: HandlerOptions) -> Self {
        Self { client, options }
    }

    pub fn client(&self) -> &AzureClient {
        &self.client
    }

    fn url(&self, id: &ScaleSetId) -> String {
        self.client.resource_url(&id.to_string(), API_VERSION)
    }

    /// GET the scale set, `None` on 404
    async fn get(&self, id: &ScaleSetId) -> Result<Option<VirtualMachineScaleSet>> {
        let response = match self.client.get(&self.url(id)).await {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        let resource = serde_json::from_value(response.body)
            .with_context(|| format!("Failed to parse {}", describe(id)))?;
        Ok(Some(resource))
    }

    /// PUT the scale set and return the operation to wait on
    async fn create_or_update(
        &self,
        id: &ScaleSetId,
        resource: &VirtualMachineScaleSet,
    ) -> Result<PendingOperation> {
        let url = self.url(id);
        let body = serde_json::to_value(resource)?;
        let response = self.client.put(&url, &body).await?;
        Ok(PendingOperation::from_response(&response, &url))
    }

    async fn wait(&self, operation: PendingOperation, timeout: Duration) -> Result<()> {
        self.client
            .wait_for_completion(operation, self.options.poll_interval, timeout)
            .await
    }

    /// Create a scale set and return its state as read back from the service
    pub async fn create(&self, config: &LinuxVirtualMachineScaleSetConfig) -> Result<ScaleSetState> {
        let id = ScaleSetId::new(
            &self.client.subscription_id,
            &config.resource_group_name,
            &config.name,
        );
        let resource = expand_scale_set(config)?;

        bounded(
            self.options.timeouts.create,
            || format!("creating {}", describe(&id)),
            self.create_expanded(&id, &resource, config),
        )
        .await
    }

    async fn create_expanded(
        &self,
        id: &ScaleSetId,
        resource: &VirtualMachineScaleSet,
        config: &LinuxVirtualMachineScaleSetConfig,
    ) -> Result<ScaleSetState> {
        tracing::info!("Creating {}", describe(id));

        if self.options.require_import {
            let existing = self
                .get(id)
                .await
                .with_context(|| format!("Error checking for existing {}", describe(id)))?;
            if let Some(existing) = existing {
                let existing_id = existing.id.unwrap_or_else(|| id.to_string());
                bail!(
                    "A resource with the ID {:?} already exists - to be managed it needs to be \
                     imported into the State",
                    existing_id
                );
            }
        }

        let operation = self
            .create_or_update(id, resource)
            .await
            .with_context(|| format!("Error creating {}", describe(id)))?;
        self.wait(operation, self.options.timeouts.create)
            .await
            .with_context(|| format!("Error waiting for creation of {}", describe(id)))?;

        let created = self
            .get(id)
            .await
            .with_context(|| format!("Error retrieving {}", describe(id)))?
            .ok_or_else(|| anyhow!("Error retrieving {}: not found after creation", describe(id)))?;
        let resource_id = created
            .id
            .ok_or_else(|| anyhow!("Cannot read {} ID was nil", describe(id)))?;
        tracing::info!("Created {}", resource_id);

        self.read(&resource_id, Some(config))
            .await?
            .ok_or_else(|| anyhow!("{} disappeared after creation", describe(id)))
    }

    /// Read a scale set; `None` if it no longer exists
    pub async fn read(
        &self,
        resource_id: &str,
        prior: Option<&LinuxVirtualMachineScaleSetConfig>,
    ) -> Result<Option<ScaleSetState>> {
        let id = ScaleSetId::parse(resource_id)?;
        let timeout = self.options.timeouts.read;

        let resource = bounded(timeout, || format!("retrieving {}", describe(&id)), self.get(&id))
            .await
            .with_context(|| format!("Error retrieving {}", describe(&id)))?;

        let Some(resource) = resource else {
            tracing::debug!("{} was not found - removing from state", describe(&id));
            return Ok(None);
        };

        let attributes = flatten_scale_set(&resource, &id, prior)
            .with_context(|| format!("Error reading {}", describe(&id)))?;

        Ok(Some(ScaleSetState {
            id: resource.id.unwrap_or_else(|| id.to_string()),
            attributes,
        }))
    }

    /// Apply `desired` in place; fields that need replacement are rejected
    pub async fn update(
        &self,
        resource_id: &str,
        prior: &LinuxVirtualMachineScaleSetConfig,
        desired: &LinuxVirtualMachineScaleSetConfig,
    ) -> Result<ScaleSetState> {
        let id = ScaleSetId::parse(resource_id)?;

        let changed = force_new_changes(prior, desired);
        if !changed.is_empty() {
            bail!(
                "Cannot update {} in place, these fields require replacement: {}",
                describe(&id),
                changed.join(", ")
            );
        }

        let resource = expand_scale_set(desired)?;

        bounded(
            self.options.timeouts.update,
            || format!("updating {}", describe(&id)),
            async {
                tracing::info!("Updating {}", describe(&id));
                let operation = self
                    .create_or_update(&id, &resource)
                    .await
                    .with_context(|| format!("Error updating {}", describe(&id)))?;
                self.wait(operation, self.options.timeouts.update)
                    .await
                    .with_context(|| format!("Error waiting for update of {}", describe(&id)))?;

                self.read(resource_id, Some(desired))
                    .await?
                    .ok_or_else(|| anyhow!("{} disappeared after update", describe(&id)))
            },
        )
        .await
    }

    pub async fn delete(&self, resource_id: &str) -> Result<()> {
        let id = ScaleSetId::parse(resource_id)?;
        bounded(
            self.options.timeouts.delete,
            || format!("deleting {}", describe(&id)),
            self.delete_by_id(&id),
        )
        .await
    }

    async fn delete_by_id(&self, id: &ScaleSetId) -> Result<()> {
        let url = self.url(id);
        tracing::info!("Deleting {}", describe(id));

        let response = match self.client.delete(&url).await {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => {
                tracing::debug!("{} was already deleted", describe(id));
                return Ok(());
            }
            Err(e) => return Err(e.context(format!("Error deleting {}", describe(id)))),
        };
        if response.status == 204 {
            return Ok(());
        }

        let operation = PendingOperation::from_response(&response, &url);
        self.wait(operation, self.options.timeouts.delete)
            .await
            .with_context(|| format!("Error waiting for deletion of {}", describe(id)))?;
        tracing::info!("Deleted {}", describe(id));
        Ok(())
    }

    /// Bring an existing scale set under management
    pub async fn import(&self, resource_id: &str) -> Result<ScaleSetState> {
        let id = ScaleSetId::parse(resource_id)
            .with_context(|| format!("Cannot import {:?}", resource_id))?;
        self.read(resource_id, None)
            .await?
            .ok_or_else(|| anyhow!("Cannot import non-existent {}", describe(&id)))
    }
}
