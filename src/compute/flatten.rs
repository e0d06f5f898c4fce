//! Flatten: compute API model → flat configuration

use super::ids::{normalize_location, ScaleSetId};
use super::models::*;
use super::schema::{
    AdditionalCapabilitiesBlock, AutomaticOsUpgradePolicyBlock, DiffDiskSettingsBlock,
    IpConfigurationBlock, IpTagBlock, LinuxVirtualMachineScaleSetConfig, NetworkInterfaceBlock,
    OsDiskBlock, PublicIpAddressBlock, RollingUpgradePolicyBlock, SourceImageReferenceBlock,
    SshKeyBlock,
};
use anyhow::{anyhow, bail, Result};
use std::collections::BTreeSet;

fn sub_resource_ids(input: Option<&Vec<SubResource>>) -> BTreeSet<String> {
    input
        .into_iter()
        .flatten()
        .filter_map(|r| r.id.clone())
        .collect()
}

fn sub_resource_id(input: Option<&SubResource>) -> Option<String> {
    input.and_then(|r| r.id.clone())
}

pub fn flatten_additional_capabilities(
    input: Option<&AdditionalCapabilities>,
) -> Option<AdditionalCapabilitiesBlock> {
    input.map(|caps| AdditionalCapabilitiesBlock {
        ultra_ssd_enabled: caps.ultra_ssd_enabled.unwrap_or(false),
    })
}

pub fn flatten_network_interfaces(input: Option<&Vec<NetworkConfiguration>>) -> Vec<NetworkInterfaceBlock> {
    input
        .into_iter()
        .flatten()
        .map(|nic| {
            let props = nic.properties.clone().unwrap_or_default();
            NetworkInterfaceBlock {
                name: nic.name.clone().unwrap_or_default(),
                ip_configuration: props
                    .ip_configurations
                    .iter()
                    .flatten()
                    .map(flatten_ip_configuration)
                    .collect(),
                dns_servers: props
                    .dns_settings
                    .and_then(|d| d.dns_servers)
                    .unwrap_or_default(),
                enable_accelerated_networking: props.enable_accelerated_networking.unwrap_or(false),
                enable_ip_forwarding: props.enable_ip_forwarding.unwrap_or(false),
                network_security_group_id: sub_resource_id(props.network_security_group.as_ref()),
                primary: props.primary.unwrap_or(false),
            }
        })
        .collect()
}

fn flatten_ip_configuration(input: &IpConfiguration) -> IpConfigurationBlock {
    let props = input.properties.clone().unwrap_or_default();
    IpConfigurationBlock {
        name: input.name.clone().unwrap_or_default(),
        application_gateway_backend_address_pool_ids: sub_resource_ids(
            props.application_gateway_backend_address_pools.as_ref(),
        ),
        application_security_group_ids: sub_resource_ids(props.application_security_groups.as_ref()),
        load_balancer_backend_address_pool_ids: sub_resource_ids(
            props.load_balancer_backend_address_pools.as_ref(),
        ),
        load_balancer_inbound_nat_rules_ids: sub_resource_ids(
            props.load_balancer_inbound_nat_pools.as_ref(),
        ),
        primary: props.primary.unwrap_or(false),
        public_ip_address: props
            .public_ip_address_configuration
            .as_ref()
            .map(flatten_public_ip_address),
        subnet_id: sub_resource_id(props.subnet.as_ref()),
        version: props.private_ip_address_version.unwrap_or_default(),
    }
}

fn flatten_public_ip_address(input: &PublicIpAddressConfiguration) -> PublicIpAddressBlock {
    let props = input.properties.clone().unwrap_or_default();
    PublicIpAddressBlock {
        name: input.name.clone().unwrap_or_default(),
        domain_name_label: props.dns_settings.and_then(|d| d.domain_name_label),
        idle_timeout_in_minutes: props.idle_timeout_in_minutes,
        ip_tag: props
            .ip_tags
            .into_iter()
            .flatten()
            .map(|t| IpTagBlock {
                tag: t.tag.unwrap_or_default(),
                tag_type: t.ip_tag_type.unwrap_or_default(),
            })
            .collect(),
        public_ip_prefix_id: sub_resource_id(props.public_ip_prefix.as_ref()),
    }
}

/// Missing caching / storage type fall back to the service defaults
pub fn flatten_os_disk(input: Option<&OsDisk>) -> Option<OsDiskBlock> {
    input.map(|disk| OsDiskBlock {
        caching: disk.caching.unwrap_or_default(),
        storage_account_type: disk
            .managed_disk
            .as_ref()
            .and_then(|m| m.storage_account_type)
            .unwrap_or_default(),
        diff_disk_settings: disk
            .diff_disk_settings
            .as_ref()
            .and_then(|d| d.option)
            .map(|option| DiffDiskSettingsBlock { option }),
        disk_size_gb: disk.disk_size_gb,
        write_accelerator_enabled: disk.write_accelerator_enabled.unwrap_or(false),
    })
}

/// Returns `(source_image_id, source_image_reference)`
///
/// An image with an `id` is a custom image; anything else is a marketplace
/// reference.
pub fn flatten_source_image(
    input: Option<&ImageReference>,
) -> (Option<String>, Option<SourceImageReferenceBlock>) {
    let Some(image) = input else {
        return (None, None);
    };
    if let Some(id) = image.id.as_ref().filter(|id| !id.is_empty()) {
        return (Some(id.clone()), None);
    }
    let reference = SourceImageReferenceBlock {
        publisher: image.publisher.clone().unwrap_or_default(),
        offer: image.offer.clone().unwrap_or_default(),
        sku: image.sku.clone().unwrap_or_default(),
        version: image.version.clone().unwrap_or_default(),
    };
    (None, Some(reference))
}

/// Recover the username from `/home/{username}/.ssh/authorized_keys`
pub fn parse_username_from_authorized_keys_path(path: &str) -> Option<&str> {
    path.strip_prefix("/home/")
        .and_then(|rest| rest.strip_suffix("/.ssh/authorized_keys"))
        .filter(|user| !user.is_empty() && !user.contains('/'))
}

pub fn flatten_ssh_keys(input: Option<&SshConfiguration>) -> Result<BTreeSet<SshKeyBlock>> {
    let mut keys = BTreeSet::new();
    for key in input.and_then(|ssh| ssh.public_keys.as_ref()).into_iter().flatten() {
        let path = key.path.as_deref().unwrap_or_default();
        let username = parse_username_from_authorized_keys_path(path)
            .ok_or_else(|| anyhow!("Error parsing username from SSH key path {:?}", path))?;
        keys.insert(SshKeyBlock {
            username: username.to_string(),
            public_key: key.key_data.clone().unwrap_or_default(),
        });
    }
    Ok(keys)
}

pub fn flatten_automatic_os_upgrade_policy(
    input: Option<&AutomaticOsUpgradePolicy>,
) -> AutomaticOsUpgradePolicyBlock {
    let policy = input.cloned().unwrap_or_default();
    AutomaticOsUpgradePolicyBlock {
        disable_automatic_rollback: policy.disable_automatic_rollback.unwrap_or(false),
        enable_automatic_os_upgrade: policy.enable_automatic_os_upgrade.unwrap_or(false),
    }
}

pub fn flatten_rolling_upgrade_policy(
    input: Option<&RollingUpgradePolicy>,
    health_probe_id: Option<String>,
) -> RollingUpgradePolicyBlock {
    let policy = input.cloned().unwrap_or_default();
    RollingUpgradePolicyBlock {
        max_batch_instance_percent: policy.max_batch_instance_percent.unwrap_or(0),
        max_unhealthy_instance_percent: policy.max_unhealthy_instance_percent.unwrap_or(0),
        max_unhealthy_upgraded_instance_percent: policy
            .max_unhealthy_upgraded_instance_percent
            .unwrap_or(0),
        pause_time_between_batches: policy.pause_time_between_batches.unwrap_or_default(),
        health_probe_id: health_probe_id.unwrap_or_default(),
    }
}

/// Build the flat configuration for a scale set returned by the API
///
/// `prior` supplies values the service never echoes back (`admin_password`).
pub fn flatten_scale_set(
    resource: &VirtualMachineScaleSet,
    id: &ScaleSetId,
    prior: Option<&LinuxVirtualMachineScaleSetConfig>,
) -> Result<LinuxVirtualMachineScaleSetConfig> {
    let Some(props) = resource.properties.as_ref() else {
        bail!("`properties` was nil for Linux Virtual Machine Scale Set {:?}", id.name);
    };

    let sku = resource.sku.clone().unwrap_or_default();
    let profile = props.virtual_machine_profile.clone().unwrap_or_default();
    let os_profile = profile.os_profile.clone().unwrap_or_default();
    let linux = os_profile.linux_configuration.clone().unwrap_or_default();
    let network = profile.network_profile.clone().unwrap_or_default();
    let storage = profile.storage_profile.clone().unwrap_or_default();
    let upgrade = props.upgrade_policy.clone().unwrap_or_default();
    let upgrade_mode = upgrade.mode.unwrap_or_default();

    let (source_image_id, source_image_reference) =
        flatten_source_image(storage.image_reference.as_ref());

    // Only surface the policy belonging to the active mode, the service
    // echoes defaults for the others.
    let automatic_os_upgrade_policy = (upgrade_mode == UpgradeMode::Automatic).then(|| {
        flatten_automatic_os_upgrade_policy(upgrade.automatic_os_upgrade_policy.as_ref())
    });
    let rolling_upgrade_policy = (upgrade_mode == UpgradeMode::Rolling).then(|| {
        flatten_rolling_upgrade_policy(
            upgrade.rolling_upgrade_policy.as_ref(),
            sub_resource_id(network.health_probe.as_ref()),
        )
    });

    Ok(LinuxVirtualMachineScaleSetConfig {
        name: id.name.clone(),
        resource_group_name: id.resource_group.clone(),
        location: resource
            .location
            .as_deref()
            .map(normalize_location)
            .unwrap_or_default(),
        admin_username: os_profile.admin_username.clone().unwrap_or_default(),
        network_interface: flatten_network_interfaces(network.network_interface_configurations.as_ref()),
        os_disk: flatten_os_disk(storage.os_disk.as_ref()),
        instances: sku.capacity.unwrap_or(0),
        sku: sku.name.unwrap_or_default(),

        additional_capabilities: flatten_additional_capabilities(
            props.additional_capabilities.as_ref(),
        ),
        admin_password: prior.and_then(|p| p.admin_password.clone()),
        admin_ssh_key: flatten_ssh_keys(linux.ssh.as_ref())?,
        computer_name_prefix: os_profile.computer_name_prefix.clone(),
        disable_password_authentication: linux.disable_password_authentication.unwrap_or(true),
        do_not_run_extensions_on_overprovisioned_machines: props
            .do_not_run_extensions_on_overprovisioned_vms
            .unwrap_or(false),
        eviction_policy: profile.eviction_policy,
        overprovision: props.overprovision.unwrap_or(false),
        platform_fault_domain_count: props.platform_fault_domain_count,
        priority: profile.priority.unwrap_or_default(),
        provision_vm_agent: linux.provision_vm_agent.unwrap_or(true),
        proximity_placement_group_id: sub_resource_id(props.proximity_placement_group.as_ref()),
        single_placement_group: props.single_placement_group.unwrap_or(false),
        source_image_id,
        source_image_reference,
        tags: resource.tags.clone().unwrap_or_default(),
        upgrade_mode,
        automatic_os_upgrade_policy,
        rolling_upgrade_policy,
        zone_balance: props.zone_balance.unwrap_or(false),
        zones: resource.zones.clone().unwrap_or_default(),

        unique_id: props.unique_id.clone(),
    })
}
