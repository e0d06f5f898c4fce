//! Expand: flat configuration → compute API model

use super::ids::normalize_location;
use super::models::*;
use super::schema::{
    AdditionalCapabilitiesBlock, AutomaticOsUpgradePolicyBlock, IpConfigurationBlock,
    LinuxVirtualMachineScaleSetConfig, NetworkInterfaceBlock, OsDiskBlock, PublicIpAddressBlock,
    RollingUpgradePolicyBlock, SourceImageReferenceBlock, SshKeyBlock,
};
use super::validate::{validate_config, ValidationErrors};
use std::collections::{BTreeMap, BTreeSet};

/// The only tier the service accepts for scale sets, even for promo SKUs
const SKU_TIER: &str = "Standard";

/// Where Linux looks for a user's authorized keys
pub fn ssh_key_path(username: &str) -> String {
    format!("/home/{}/.ssh/authorized_keys", username)
}

fn sub_resources(ids: &BTreeSet<String>) -> Option<Vec<SubResource>> {
    Some(ids.iter().map(|id| SubResource::new(id)).collect())
}

pub fn expand_additional_capabilities(
    input: Option<&AdditionalCapabilitiesBlock>,
) -> Option<AdditionalCapabilities> {
    input.map(|block| AdditionalCapabilities {
        ultra_ssd_enabled: Some(block.ultra_ssd_enabled),
    })
}

pub fn expand_network_interfaces(input: &[NetworkInterfaceBlock]) -> Vec<NetworkConfiguration> {
    input
        .iter()
        .map(|nic| NetworkConfiguration {
            name: Some(nic.name.clone()),
            properties: Some(NetworkConfigurationProperties {
                primary: Some(nic.primary),
                enable_accelerated_networking: Some(nic.enable_accelerated_networking),
                enable_ip_forwarding: Some(nic.enable_ip_forwarding),
                network_security_group: nic.network_security_group_id.as_deref().map(SubResource::new),
                dns_settings: Some(NetworkConfigurationDnsSettings {
                    dns_servers: Some(nic.dns_servers.clone()),
                }),
                ip_configurations: Some(
                    nic.ip_configuration.iter().map(expand_ip_configuration).collect(),
                ),
            }),
        })
        .collect()
}

fn expand_ip_configuration(input: &IpConfigurationBlock) -> IpConfiguration {
    IpConfiguration {
        name: Some(input.name.clone()),
        properties: Some(IpConfigurationProperties {
            subnet: input.subnet_id.as_deref().map(SubResource::new),
            primary: Some(input.primary),
            public_ip_address_configuration: input
                .public_ip_address
                .as_ref()
                .map(expand_public_ip_address),
            private_ip_address_version: Some(input.version),
            application_gateway_backend_address_pools: sub_resources(
                &input.application_gateway_backend_address_pool_ids,
            ),
            application_security_groups: sub_resources(&input.application_security_group_ids),
            load_balancer_backend_address_pools: sub_resources(
                &input.load_balancer_backend_address_pool_ids,
            ),
            load_balancer_inbound_nat_pools: sub_resources(&input.load_balancer_inbound_nat_rules_ids),
        }),
    }
}

fn expand_public_ip_address(input: &PublicIpAddressBlock) -> PublicIpAddressConfiguration {
    let ip_tags = input
        .ip_tag
        .iter()
        .map(|t| IpTag {
            ip_tag_type: Some(t.tag_type.clone()),
            tag: Some(t.tag.clone()),
        })
        .collect();

    PublicIpAddressConfiguration {
        name: Some(input.name.clone()),
        properties: Some(PublicIpAddressConfigurationProperties {
            idle_timeout_in_minutes: input.idle_timeout_in_minutes,
            dns_settings: input
                .domain_name_label
                .as_ref()
                .map(|label| PublicIpDnsSettings {
                    domain_name_label: Some(label.clone()),
                }),
            ip_tags: Some(ip_tags),
            public_ip_prefix: input.public_ip_prefix_id.as_deref().map(SubResource::new),
        }),
    }
}

pub fn expand_os_disk(input: &OsDiskBlock, os_type: OperatingSystemType) -> OsDisk {
    OsDisk {
        caching: Some(input.caching),
        create_option: Some(DiskCreateOption::FromImage),
        diff_disk_settings: input.diff_disk_settings.as_ref().map(|d| DiffDiskSettings {
            option: Some(d.option),
        }),
        disk_size_gb: input.disk_size_gb.filter(|size| *size > 0),
        managed_disk: Some(ManagedDiskParameters {
            storage_account_type: Some(input.storage_account_type),
        }),
        os_type: Some(os_type),
        write_accelerator_enabled: Some(input.write_accelerator_enabled),
    }
}

pub fn expand_source_image_reference(
    input: Option<&SourceImageReferenceBlock>,
) -> Option<ImageReference> {
    input.map(|image| ImageReference {
        id: None,
        publisher: Some(image.publisher.clone()),
        offer: Some(image.offer.clone()),
        sku: Some(image.sku.clone()),
        version: Some(image.version.clone()),
    })
}

pub fn expand_ssh_keys(input: &BTreeSet<SshKeyBlock>) -> Vec<SshPublicKey> {
    input
        .iter()
        .map(|key| SshPublicKey {
            path: Some(ssh_key_path(&key.username)),
            key_data: Some(key.public_key.clone()),
        })
        .collect()
}

pub fn expand_automatic_os_upgrade_policy(
    input: Option<&AutomaticOsUpgradePolicyBlock>,
) -> Option<AutomaticOsUpgradePolicy> {
    input.map(|policy| AutomaticOsUpgradePolicy {
        disable_automatic_rollback: Some(policy.disable_automatic_rollback),
        enable_automatic_os_upgrade: Some(policy.enable_automatic_os_upgrade),
    })
}

/// A rolling upgrade policy plus the health probe it needs on the network profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedRollingUpgradePolicy {
    pub policy: RollingUpgradePolicy,
    pub health_probe_id: String,
}

pub fn expand_rolling_upgrade_policy(
    input: Option<&RollingUpgradePolicyBlock>,
) -> Option<ExpandedRollingUpgradePolicy> {
    input.map(|policy| ExpandedRollingUpgradePolicy {
        policy: RollingUpgradePolicy {
            max_batch_instance_percent: Some(policy.max_batch_instance_percent),
            max_unhealthy_instance_percent: Some(policy.max_unhealthy_instance_percent),
            max_unhealthy_upgraded_instance_percent: Some(
                policy.max_unhealthy_upgraded_instance_percent,
            ),
            pause_time_between_batches: Some(policy.pause_time_between_batches.clone()),
        },
        health_probe_id: policy.health_probe_id.clone(),
    })
}

pub fn expand_zones(input: &[String]) -> Option<Vec<String>> {
    if input.is_empty() {
        None
    } else {
        Some(input.to_vec())
    }
}

pub fn expand_tags(input: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    Some(input.clone())
}

/// Build the `PUT` body for a Linux scale set
///
/// Runs [`validate_config`] first, so every co-requirement between fields is
/// reported before anything is sent.
pub fn expand_scale_set(
    config: &LinuxVirtualMachineScaleSetConfig,
) -> Result<VirtualMachineScaleSet, ValidationErrors> {
    validate_config(config)?;

    let image_reference = expand_source_image_reference(config.source_image_reference.as_ref())
        .or_else(|| {
            config.source_image_id.as_ref().map(|id| ImageReference {
                id: Some(id.clone()),
                ..Default::default()
            })
        });

    let rolling = expand_rolling_upgrade_policy(config.rolling_upgrade_policy.as_ref());

    let network_profile = NetworkProfile {
        health_probe: rolling
            .as_ref()
            .map(|r| SubResource::new(&r.health_probe_id)),
        network_interface_configurations: Some(expand_network_interfaces(&config.network_interface)),
    };

    let upgrade_policy = UpgradePolicy {
        mode: Some(config.upgrade_mode),
        rolling_upgrade_policy: rolling.map(|r| r.policy),
        automatic_os_upgrade_policy: expand_automatic_os_upgrade_policy(
            config.automatic_os_upgrade_policy.as_ref(),
        ),
    };

    let os_profile = OsProfile {
        computer_name_prefix: Some(config.effective_computer_name_prefix().to_string()),
        admin_username: Some(config.admin_username.clone()),
        admin_password: config.admin_password.clone(),
        linux_configuration: Some(LinuxConfiguration {
            disable_password_authentication: Some(config.disable_password_authentication),
            provision_vm_agent: Some(config.provision_vm_agent),
            ssh: Some(SshConfiguration {
                public_keys: Some(expand_ssh_keys(&config.admin_ssh_key)),
            }),
        }),
    };

    let virtual_machine_profile = VirtualMachineProfile {
        priority: Some(config.priority),
        eviction_policy: config.eviction_policy,
        os_profile: Some(os_profile),
        network_profile: Some(network_profile),
        storage_profile: Some(StorageProfile {
            image_reference,
            os_disk: config
                .os_disk
                .as_ref()
                .map(|disk| expand_os_disk(disk, OperatingSystemType::Linux)),
            data_disks: Some(Vec::new()),
        }),
    };

    let properties = VirtualMachineScaleSetProperties {
        additional_capabilities: expand_additional_capabilities(
            config.additional_capabilities.as_ref(),
        ),
        do_not_run_extensions_on_overprovisioned_vms: Some(
            config.do_not_run_extensions_on_overprovisioned_machines,
        ),
        overprovision: Some(config.overprovision),
        single_placement_group: Some(config.single_placement_group),
        virtual_machine_profile: Some(virtual_machine_profile),
        upgrade_policy: Some(upgrade_policy),
        proximity_placement_group: config
            .proximity_placement_group_id
            .as_deref()
            .map(SubResource::new),
        platform_fault_domain_count: config.platform_fault_domain_count.filter(|c| *c > 0),
        zone_balance: config.zone_balance.then_some(true),
        ..Default::default()
    };

    Ok(VirtualMachineScaleSet {
        location: Some(normalize_location(&config.location)),
        sku: Some(Sku {
            name: Some(config.sku.clone()),
            tier: Some(SKU_TIER.to_string()),
            capacity: Some(config.instances),
        }),
        tags: expand_tags(&config.tags),
        zones: expand_zones(&config.zones),
        properties: Some(properties),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::schema::{AdditionalCapabilitiesBlock, SourceImageReferenceBlock};
    use crate::compute::test_support::minimal_config;

    #[test]
    fn test_expand_minimal_config() {
        let config = minimal_config();
        let vmss = expand_scale_set(&config).unwrap();

        assert_eq!(vmss.location.as_deref(), Some("westeurope"));
        let sku = vmss.sku.as_ref().unwrap();
        assert_eq!(sku.tier.as_deref(), Some("Standard"));
        assert_eq!(sku.capacity, Some(2));

        let props = vmss.properties.unwrap();
        assert_eq!(props.zone_balance, None);
        assert_eq!(props.platform_fault_domain_count, None);

        let profile = props.virtual_machine_profile.unwrap();
        assert_eq!(profile.priority, Some(Priority::Regular));
        let os = profile.os_profile.unwrap();
        assert_eq!(os.computer_name_prefix.as_deref(), Some("example-vmss"));
        assert_eq!(os.admin_password, None);
        let keys = os.linux_configuration.unwrap().ssh.unwrap().public_keys.unwrap();
        assert_eq!(keys[0].path.as_deref(), Some("/home/adminuser/.ssh/authorized_keys"));

        let storage = profile.storage_profile.unwrap();
        assert_eq!(storage.data_disks, Some(Vec::new()));
        let os_disk = storage.os_disk.unwrap();
        assert_eq!(os_disk.os_type, Some(OperatingSystemType::Linux));
        assert_eq!(os_disk.create_option, Some(DiskCreateOption::FromImage));
        assert_eq!(storage.image_reference.unwrap().publisher.as_deref(), Some("Canonical"));

        assert_eq!(profile.network_profile.unwrap().health_probe, None);
    }

    #[test]
    fn test_image_id_used_when_no_reference() {
        let mut config = minimal_config();
        config.source_image_reference = None;
        config.source_image_id = Some(
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/images/img".to_string(),
        );
        let vmss = expand_scale_set(&config).unwrap();
        let image = vmss
            .properties
            .unwrap()
            .virtual_machine_profile
            .unwrap()
            .storage_profile
            .unwrap()
            .image_reference
            .unwrap();
        assert_eq!(image.id, config.source_image_id);
        assert_eq!(image.publisher, None);
    }

    #[test]
    fn test_missing_image_is_rejected() {
        let mut config = minimal_config();
        config.source_image_reference = None;
        let errors = expand_scale_set(&config).unwrap_err();
        assert!(errors.has_field("source_image_id"));
    }

    #[test]
    fn test_rolling_policy_sets_health_probe() {
        let mut config = minimal_config();
        let probe = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/loadBalancers/lb/probes/http";
        config.upgrade_mode = UpgradeMode::Rolling;
        config.rolling_upgrade_policy = Some(RollingUpgradePolicyBlock {
            max_batch_instance_percent: 21,
            max_unhealthy_instance_percent: 22,
            max_unhealthy_upgraded_instance_percent: 23,
            pause_time_between_batches: "PT30S".to_string(),
            health_probe_id: probe.to_string(),
        });

        let props = expand_scale_set(&config).unwrap().properties.unwrap();
        let policy = props.upgrade_policy.unwrap();
        assert_eq!(policy.mode, Some(UpgradeMode::Rolling));
        assert_eq!(
            policy.rolling_upgrade_policy.unwrap().max_batch_instance_percent,
            Some(21)
        );
        let health_probe = props
            .virtual_machine_profile
            .unwrap()
            .network_profile
            .unwrap()
            .health_probe
            .unwrap();
        assert_eq!(health_probe.id.as_deref(), Some(probe));
    }

    #[test]
    fn test_upgrade_policy_co_requirements() {
        let mut config = minimal_config();
        config.upgrade_mode = UpgradeMode::Automatic;
        assert!(expand_scale_set(&config)
            .unwrap_err()
            .has_field("automatic_os_upgrade_policy"));

        config.upgrade_mode = UpgradeMode::Manual;
        config.automatic_os_upgrade_policy = Some(AutomaticOsUpgradePolicyBlock {
            disable_automatic_rollback: false,
            enable_automatic_os_upgrade: true,
        });
        assert!(expand_scale_set(&config)
            .unwrap_err()
            .has_field("automatic_os_upgrade_policy"));

        config.upgrade_mode = UpgradeMode::Rolling;
        config.automatic_os_upgrade_policy = None;
        assert!(expand_scale_set(&config)
            .unwrap_err()
            .has_field("rolling_upgrade_policy"));
    }

    #[test]
    fn test_eviction_policy_requires_low_priority() {
        let mut config = minimal_config();
        config.eviction_policy = Some(EvictionPolicy::Delete);
        assert!(expand_scale_set(&config).unwrap_err().has_field("eviction_policy"));

        config.priority = Priority::Low;
        let profile = expand_scale_set(&config)
            .unwrap()
            .properties
            .unwrap()
            .virtual_machine_profile
            .unwrap();
        assert_eq!(profile.priority, Some(Priority::Low));
        assert_eq!(profile.eviction_policy, Some(EvictionPolicy::Delete));
    }

    #[test]
    fn test_zone_balance_requires_zones() {
        let mut config = minimal_config();
        config.zone_balance = true;
        assert!(expand_scale_set(&config).unwrap_err().has_field("zone_balance"));

        config.zones = vec!["1".to_string(), "2".to_string()];
        let vmss = expand_scale_set(&config).unwrap();
        assert_eq!(vmss.zones, Some(config.zones.clone()));
        assert_eq!(vmss.properties.unwrap().zone_balance, Some(true));
    }

    #[test]
    fn test_optional_properties() {
        let mut config = minimal_config();
        config.platform_fault_domain_count = Some(2);
        config.admin_password = Some("P@ssw0rd1234!".to_string());
        config.computer_name_prefix = Some("prefix".to_string());
        config.additional_capabilities = Some(AdditionalCapabilitiesBlock {
            ultra_ssd_enabled: true,
        });
        config.source_image_reference = Some(SourceImageReferenceBlock {
            publisher: "Canonical".into(),
            offer: "UbuntuServer".into(),
            sku: "18.04-LTS".into(),
            version: "latest".into(),
        });

        let props = expand_scale_set(&config).unwrap().properties.unwrap();
        assert_eq!(props.platform_fault_domain_count, Some(2));
        assert_eq!(
            props.additional_capabilities.unwrap().ultra_ssd_enabled,
            Some(true)
        );
        let os = props.virtual_machine_profile.unwrap().os_profile.unwrap();
        assert_eq!(os.admin_password.as_deref(), Some("P@ssw0rd1234!"));
        assert_eq!(os.computer_name_prefix.as_deref(), Some("prefix"));
    }
}
