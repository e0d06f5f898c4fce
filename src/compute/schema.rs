//! Flat configuration schema for a Linux virtual machine scale set
//!
//! This is the shape users write (YAML or JSON) and the shape stored in the
//! state file after a read. Defaults mirror what the service would pick for
//! an unset field so a read-back compares equal to the config.

use super::models::{
    Caching, DiffDiskOption, EvictionPolicy, IpVersion, Priority, StorageAccountType, UpgradeMode,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

fn default_true() -> bool {
    true
}

fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinuxVirtualMachineScaleSetConfig {
    // Required
    pub name: String,
    pub resource_group_name: String,
    pub location: String,
    pub admin_username: String,
    pub network_interface: Vec<NetworkInterfaceBlock>,
    #[serde(default)]
    pub os_disk: Option<OsDiskBlock>,
    pub instances: i64,
    pub sku: String,

    // Optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_capabilities: Option<AdditionalCapabilitiesBlock>,
    /// Never returned by the API; carried over from prior state on read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub admin_ssh_key: BTreeSet<SshKeyBlock>,
    /// Defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_name_prefix: Option<String>,
    #[serde(default = "default_true")]
    pub disable_password_authentication: bool,
    #[serde(default)]
    pub do_not_run_extensions_on_overprovisioned_machines: bool,
    /// Only applicable when `priority` is `Low`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_policy: Option<EvictionPolicy>,
    #[serde(default)]
    pub overprovision: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_fault_domain_count: Option<i32>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_true")]
    pub provision_vm_agent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proximity_placement_group_id: Option<String>,
    #[serde(default)]
    pub single_placement_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_reference: Option<SourceImageReferenceBlock>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub upgrade_mode: UpgradeMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic_os_upgrade_policy: Option<AutomaticOsUpgradePolicyBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_upgrade_policy: Option<RollingUpgradePolicyBlock>,
    #[serde(default)]
    pub zone_balance: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,

    // Computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
}

impl LinuxVirtualMachineScaleSetConfig {
    /// Load a config file; `.json` is parsed as JSON, anything else as YAML
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()))
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config {}", path.display()))
        }
    }

    /// Computer name prefix actually sent to the API
    pub fn effective_computer_name_prefix(&self) -> &str {
        match self.computer_name_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => prefix,
            _ => &self.name,
        }
    }

    /// Copy with sensitive values masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.admin_password.is_some() {
            copy.admin_password = Some("(sensitive)".to_string());
        }
        copy
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkInterfaceBlock {
    pub name: String,
    pub ip_configuration: Vec<IpConfigurationBlock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub enable_accelerated_networking: bool,
    #[serde(default)]
    pub enable_ip_forwarding: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_security_group_id: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpConfigurationBlock {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub application_gateway_backend_address_pool_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub application_security_group_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub load_balancer_backend_address_pool_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub load_balancer_inbound_nat_rules_ids: BTreeSet<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip_address: Option<PublicIpAddressBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub version: IpVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublicIpAddressBlock {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_in_minutes: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_tag: Vec<IpTagBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip_prefix_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpTagBlock {
    pub tag: String,
    #[serde(rename = "type")]
    pub tag_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OsDiskBlock {
    pub caching: Caching,
    pub storage_account_type: StorageAccountType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_disk_settings: Option<DiffDiskSettingsBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<i32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write_accelerator_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiffDiskSettingsBlock {
    pub option: DiffDiskOption,
}

/// Ordered so the keys form a set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshKeyBlock {
    pub username: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceImageReferenceBlock {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdditionalCapabilitiesBlock {
    #[serde(default)]
    pub ultra_ssd_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutomaticOsUpgradePolicyBlock {
    pub disable_automatic_rollback: bool,
    pub enable_automatic_os_upgrade: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollingUpgradePolicyBlock {
    pub max_batch_instance_percent: i32,
    pub max_unhealthy_instance_percent: i32,
    pub max_unhealthy_upgraded_instance_percent: i32,
    pub pause_time_between_batches: String,
    pub health_probe_id: String,
}
