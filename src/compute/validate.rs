//! Field validation for the scale set configuration
//!
//! All problems are collected and reported together rather than stopping at
//! the first one.

use super::ids::validate_resource_id;
use super::models::{
    Caching, DiffDiskOption, EvictionPolicy, IpVersion, Priority, StorageAccountType, UpgradeMode,
};
use super::schema::{
    IpConfigurationBlock, LinuxVirtualMachineScaleSetConfig, NetworkInterfaceBlock, OsDiskBlock,
    PublicIpAddressBlock, RollingUpgradePolicyBlock,
};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

const LINUX_NAME_MAX_LENGTH: usize = 64;
const LINUX_NAME_SPECIAL_CHARACTERS: &str = "\\/\"[]:|<>+=;,?*@&~!#$%^()_{}'";
const RESOURCE_GROUP_NAME_MAX_LENGTH: usize = 90;
const MAX_TAGS: usize = 50;
const MAX_TAG_KEY_LENGTH: usize = 512;
const MAX_TAG_VALUE_LENGTH: usize = 256;
const MAX_APPLICATION_SECURITY_GROUPS: usize = 20;

/// One invalid field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`: {}", self.field, self.message)
    }
}

/// Every problem found in a configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("invalid configuration:{}", render(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

fn render(errors: &[FieldError]) -> String {
    errors.iter().map(|e| format!("\n  - {}", e)).collect()
}

impl ValidationErrors {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn check(&mut self, field: &str, result: Result<(), String>) {
        if let Err(message) = result {
            self.push(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether a given field was reported
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Linux VM / scale set names: 1-64 characters, no special characters,
/// no leading underscore, no trailing period or dash, not only digits
pub fn linux_name(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("must not be empty".to_string());
    }

    let length = value.chars().count();
    if length > LINUX_NAME_MAX_LENGTH {
        return Err(format!(
            "can be at most {} characters, got {}",
            LINUX_NAME_MAX_LENGTH, length
        ));
    }
    if value.starts_with('_') {
        return Err("cannot begin with an underscore".to_string());
    }
    if value.ends_with('.') || value.ends_with('-') {
        return Err("cannot end with a period or dash".to_string());
    }
    if value.contains(|c| LINUX_NAME_SPECIAL_CHARACTERS.contains(c)) {
        return Err(format!(
            "cannot contain the special characters: `{}`",
            LINUX_NAME_SPECIAL_CHARACTERS
        ));
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        return Err("cannot contain only numbers".to_string());
    }
    Ok(())
}

/// Resource group names: 1-90 of alphanumerics, `-`, `_`, `.`, `(`, `)`, not ending in `.`
pub fn resource_group_name(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("must not be empty".to_string());
    }
    if value.chars().count() > RESOURCE_GROUP_NAME_MAX_LENGTH {
        return Err(format!(
            "may not exceed {} characters in length",
            RESOURCE_GROUP_NAME_MAX_LENGTH
        ));
    }
    if value.ends_with('.') {
        return Err("cannot end in a period".to_string());
    }
    if !value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')'))
    {
        return Err(
            "may only contain alphanumeric characters, dash, underscores, parentheses and periods"
                .to_string(),
        );
    }
    Ok(())
}

pub fn no_empty_string(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("must not be empty".to_string());
    }
    Ok(())
}

pub fn resource_id(value: &str) -> Result<(), String> {
    validate_resource_id(value).map_err(|e| format!("must be a valid resource ID: {}", e))
}

pub fn int_between(value: i64, min: i64, max: i64) -> Result<(), String> {
    if value < min || value > max {
        return Err(format!("must be in the range ({} - {}), got {}", min, max, value));
    }
    Ok(())
}

/// ISO 8601 duration as used by ARM, e.g. `PT0S`, `PT1H30M`, `P1D`
pub fn iso8601_duration(value: &str) -> Result<(), String> {
    let invalid = || Err(format!("{:?} is not a valid ISO 8601 duration", value));

    let Some(rest) = value.strip_prefix('P') else {
        return invalid();
    };
    if rest.is_empty() || rest == "T" {
        return invalid();
    }

    let (date, time) = match rest.split_once('T') {
        Some((date, time)) if !time.is_empty() => (date, Some(time)),
        Some(_) => return invalid(),
        None => (rest, None),
    };

    // Each component is a number with at most one decimal point, then a unit
    let well_formed = |part: &str, units: &str| {
        let (mut digits, mut points, mut pending) = (0, 0, false);
        for c in part.chars() {
            if c.is_ascii_digit() {
                digits += 1;
                pending = true;
            } else if c == '.' {
                points += 1;
                pending = true;
            } else if units.contains(c) && digits > 0 && points <= 1 {
                (digits, points, pending) = (0, 0, false);
            } else {
                return false;
            }
        }
        !pending
    };

    if !well_formed(date, "YMWD") || !time.map_or(true, |t| well_formed(t, "HMS")) {
        return invalid();
    }
    Ok(())
}

pub fn tags(tags: &BTreeMap<String, String>) -> Result<(), String> {
    if tags.len() > MAX_TAGS {
        return Err(format!("a maximum of {} tags can be applied to each ARM resource", MAX_TAGS));
    }
    for (key, value) in tags {
        if key.chars().count() > MAX_TAG_KEY_LENGTH {
            return Err(format!(
                "the maximum length for a tag key is {} characters: {:?}",
                MAX_TAG_KEY_LENGTH, key
            ));
        }
        if value.chars().count() > MAX_TAG_VALUE_LENGTH {
            return Err(format!(
                "the maximum length for a tag value is {} characters: {:?}",
                MAX_TAG_VALUE_LENGTH, key
            ));
        }
    }
    Ok(())
}

/// Validate a scale set configuration, including rules that span fields
pub fn validate_config(config: &LinuxVirtualMachineScaleSetConfig) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    errors.check("name", linux_name(&config.name));
    errors.check("resource_group_name", resource_group_name(&config.resource_group_name));
    errors.check("location", no_empty_string(&config.location));
    errors.check("admin_username", no_empty_string(&config.admin_username));
    errors.check("sku", no_empty_string(&config.sku));
    if config.instances < 0 {
        errors.push("instances", format!("expected to be at least (0), got {}", config.instances));
    }

    if config.network_interface.is_empty() {
        errors.push("network_interface", "at least one `network_interface` block is required");
    }
    for (i, nic) in config.network_interface.iter().enumerate() {
        validate_network_interface(&mut errors, &format!("network_interface.{}", i), nic);
    }

    match &config.os_disk {
        Some(os_disk) => validate_os_disk(&mut errors, os_disk),
        None => errors.push("os_disk", "an `os_disk` block is required"),
    }

    for (i, key) in config.admin_ssh_key.iter().enumerate() {
        errors.check(&format!("admin_ssh_key.{}.username", i), no_empty_string(&key.username));
        errors.check(&format!("admin_ssh_key.{}.public_key", i), no_empty_string(&key.public_key));
    }

    if let Some(prefix) = &config.computer_name_prefix {
        errors.check("computer_name_prefix", linux_name(prefix));
    }
    if let Some(id) = &config.proximity_placement_group_id {
        errors.check("proximity_placement_group_id", resource_id(id));
    }
    if let Some(id) = &config.source_image_id {
        errors.check("source_image_id", resource_id(id));
    }
    if let Some(image) = &config.source_image_reference {
        errors.check("source_image_reference.publisher", no_empty_string(&image.publisher));
        errors.check("source_image_reference.offer", no_empty_string(&image.offer));
        errors.check("source_image_reference.sku", no_empty_string(&image.sku));
        errors.check("source_image_reference.version", no_empty_string(&image.version));
    }
    if matches!(config.priority, Priority::Spot | Priority::Unknown) {
        errors.push(
            "priority",
            format!("expected one of [Low Regular], got {:?}", config.priority),
        );
    }
    if config.upgrade_mode == UpgradeMode::Unknown {
        errors.push("upgrade_mode", "expected one of [Automatic Manual Rolling]");
    }
    if config.eviction_policy == Some(EvictionPolicy::Unknown) {
        errors.push("eviction_policy", "expected one of [Deallocate Delete]");
    }
    if let Some(count) = config.platform_fault_domain_count {
        if count < 0 {
            errors.push("platform_fault_domain_count", "must not be negative");
        }
    }
    errors.check("tags", tags(&config.tags));
    for (i, zone) in config.zones.iter().enumerate() {
        errors.check(&format!("zones.{}", i), no_empty_string(zone));
    }
    if let Some(policy) = &config.rolling_upgrade_policy {
        validate_rolling_upgrade_policy(&mut errors, policy);
    }

    validate_cross_field(&mut errors, config);

    errors.into_result()
}

fn validate_network_interface(errors: &mut ValidationErrors, path: &str, nic: &NetworkInterfaceBlock) {
    errors.check(&format!("{}.name", path), no_empty_string(&nic.name));
    if let Some(id) = &nic.network_security_group_id {
        errors.check(&format!("{}.network_security_group_id", path), resource_id(id));
    }
    if nic.ip_configuration.is_empty() {
        errors.push(
            format!("{}.ip_configuration", path),
            "at least one `ip_configuration` block is required",
        );
    }
    for (i, ip) in nic.ip_configuration.iter().enumerate() {
        validate_ip_configuration(errors, &format!("{}.ip_configuration.{}", path, i), ip);
    }
}

fn validate_ip_configuration(errors: &mut ValidationErrors, path: &str, ip: &IpConfigurationBlock) {
    errors.check(&format!("{}.name", path), no_empty_string(&ip.name));
    if let Some(id) = &ip.subnet_id {
        errors.check(&format!("{}.subnet_id", path), resource_id(id));
    }
    if ip.version == IpVersion::Unknown {
        errors.push(format!("{}.version", path), "expected one of [IPv4 IPv6]");
    }
    if ip.application_security_group_ids.len() > MAX_APPLICATION_SECURITY_GROUPS {
        errors.push(
            format!("{}.application_security_group_ids", path),
            format!("at most {} application security groups", MAX_APPLICATION_SECURITY_GROUPS),
        );
    }
    let id_sets = [
        ("application_gateway_backend_address_pool_ids", &ip.application_gateway_backend_address_pool_ids),
        ("application_security_group_ids", &ip.application_security_group_ids),
        ("load_balancer_backend_address_pool_ids", &ip.load_balancer_backend_address_pool_ids),
        ("load_balancer_inbound_nat_rules_ids", &ip.load_balancer_inbound_nat_rules_ids),
    ];
    for (field, ids) in id_sets {
        for id in ids {
            errors.check(&format!("{}.{}", path, field), resource_id(id));
        }
    }
    if let Some(public_ip) = &ip.public_ip_address {
        validate_public_ip_address(errors, &format!("{}.public_ip_address", path), public_ip);
    }
}

fn validate_public_ip_address(errors: &mut ValidationErrors, path: &str, ip: &PublicIpAddressBlock) {
    errors.check(&format!("{}.name", path), no_empty_string(&ip.name));
    if let Some(label) = &ip.domain_name_label {
        errors.check(&format!("{}.domain_name_label", path), no_empty_string(label));
    }
    if let Some(timeout) = ip.idle_timeout_in_minutes {
        errors.check(
            &format!("{}.idle_timeout_in_minutes", path),
            int_between(timeout.into(), 4, 32),
        );
    }
    if let Some(id) = &ip.public_ip_prefix_id {
        errors.check(&format!("{}.public_ip_prefix_id", path), resource_id(id));
    }
    for (i, tag) in ip.ip_tag.iter().enumerate() {
        errors.check(&format!("{}.ip_tag.{}.tag", path, i), no_empty_string(&tag.tag));
        errors.check(&format!("{}.ip_tag.{}.type", path, i), no_empty_string(&tag.tag_type));
    }
}

fn validate_os_disk(errors: &mut ValidationErrors, os_disk: &OsDiskBlock) {
    if matches!(
        os_disk.storage_account_type,
        StorageAccountType::UltraSsdLrs | StorageAccountType::Unknown
    ) {
        errors.push(
            "os_disk.storage_account_type",
            "expected one of [Premium_LRS Standard_LRS StandardSSD_LRS]",
        );
    }
    if os_disk.caching == Caching::Unknown {
        errors.push("os_disk.caching", "expected one of [None ReadOnly ReadWrite]");
    }
    if let Some(settings) = &os_disk.diff_disk_settings {
        if settings.option == DiffDiskOption::Unknown {
            errors.push("os_disk.diff_disk_settings.option", "expected one of [Local]");
        }
    }
    if let Some(size) = os_disk.disk_size_gb {
        errors.check("os_disk.disk_size_gb", int_between(size.into(), 1, 1023));
    }
}

fn validate_rolling_upgrade_policy(errors: &mut ValidationErrors, policy: &RollingUpgradePolicyBlock) {
    errors.check(
        "rolling_upgrade_policy.max_batch_instance_percent",
        int_between(policy.max_batch_instance_percent.into(), 5, 100),
    );
    errors.check(
        "rolling_upgrade_policy.max_unhealthy_instance_percent",
        int_between(policy.max_unhealthy_instance_percent.into(), 5, 100),
    );
    errors.check(
        "rolling_upgrade_policy.max_unhealthy_upgraded_instance_percent",
        int_between(policy.max_unhealthy_upgraded_instance_percent.into(), 0, 100),
    );
    errors.check(
        "rolling_upgrade_policy.pause_time_between_batches",
        iso8601_duration(&policy.pause_time_between_batches),
    );
    errors.check(
        "rolling_upgrade_policy.health_probe_id",
        resource_id(&policy.health_probe_id),
    );
}

/// Mutually exclusive and co-required fields
fn validate_cross_field(errors: &mut ValidationErrors, config: &LinuxVirtualMachineScaleSetConfig) {
    let has_image_id = config.source_image_id.as_deref().is_some_and(|id| !id.is_empty());
    if config.source_image_reference.is_none() && !has_image_id {
        errors.push(
            "source_image_id",
            "either a `source_image_id` or a `source_image_reference` block must be specified",
        );
    }

    match (config.upgrade_mode, config.automatic_os_upgrade_policy.is_some()) {
        (UpgradeMode::Automatic, false) => errors.push(
            "automatic_os_upgrade_policy",
            "an `automatic_os_upgrade_policy` block must be specified when `upgrade_mode` is set to `Automatic`",
        ),
        (mode, true) if mode != UpgradeMode::Automatic => errors.push(
            "automatic_os_upgrade_policy",
            "an `automatic_os_upgrade_policy` block cannot be specified when `upgrade_mode` is not set to `Automatic`",
        ),
        _ => {}
    }

    match (config.upgrade_mode, config.rolling_upgrade_policy.is_some()) {
        (UpgradeMode::Rolling, false) => errors.push(
            "rolling_upgrade_policy",
            "a `rolling_upgrade_policy` block must be specified when `upgrade_mode` is set to `Rolling`",
        ),
        (mode, true) if mode != UpgradeMode::Rolling => errors.push(
            "rolling_upgrade_policy",
            "a `rolling_upgrade_policy` block cannot be specified when `upgrade_mode` is not set to `Rolling`",
        ),
        _ => {}
    }

    if config.eviction_policy.is_some() && config.priority != Priority::Low {
        errors.push(
            "eviction_policy",
            "an `eviction_policy` can only be specified when `priority` is set to `Low`",
        );
    }

    if config.zone_balance && config.zones.is_empty() {
        errors.push(
            "zone_balance",
            "`zone_balance` can only be set to `true` when zones are specified",
        );
    }

    if config.disable_password_authentication && config.admin_ssh_key.is_empty() {
        errors.push(
            "admin_ssh_key",
            "at least one `admin_ssh_key` must be specified when `disable_password_authentication` is `true`",
        );
    }
    if !config.disable_password_authentication && config.admin_password.is_none() {
        errors.push(
            "admin_password",
            "an `admin_password` must be specified when `disable_password_authentication` is `false`",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::test_support::minimal_config;

    const ASG_ID: &str =
        "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/applicationSecurityGroups";

    fn field_errors(config: &LinuxVirtualMachineScaleSetConfig) -> ValidationErrors {
        validate_config(config).err().unwrap_or_default()
    }

    #[test]
    fn test_linux_name() {
        assert!(linux_name("vmss-1").is_ok());
        assert!(linux_name("").is_err());
        assert!(linux_name("_vmss").is_err());
        assert!(linux_name("vmss-").is_err());
        assert!(linux_name("vmss.").is_err());
        assert!(linux_name("vm@ss").is_err());
        assert!(linux_name("12345").is_err());
        assert!(linux_name(&"a".repeat(64)).is_ok());
        assert!(linux_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_resource_group_name() {
        assert!(resource_group_name("my_rg-(1).prod").is_ok());
        assert!(resource_group_name("rg.").is_err());
        assert!(resource_group_name("rg/1").is_err());
        assert!(resource_group_name(&"r".repeat(91)).is_err());
    }

    #[test]
    fn test_iso8601_duration() {
        for ok in ["PT0S", "PT5M", "PT1H30M", "P1D", "P1DT12H", "PT0.5S"] {
            assert!(iso8601_duration(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "P", "PT", "5M", "PT5", "P1H", "PTM", "P1DT", "PT.S", "PT1.2.3S", "PT1."] {
            assert!(iso8601_duration(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_tags_limits() {
        let mut t = BTreeMap::new();
        t.insert("env".to_string(), "prod".to_string());
        assert!(tags(&t).is_ok());

        t.insert("k".repeat(513), "v".to_string());
        assert!(tags(&t).is_err());

        let many: BTreeMap<String, String> =
            (0..51).map(|i| (format!("k{}", i), "v".to_string())).collect();
        assert!(tags(&many).is_err());
    }

    #[test]
    fn test_validation_errors_display_lists_fields() {
        let mut errors = ValidationErrors::default();
        errors.push("name", "must not be empty");
        errors.push("sku", "must not be empty");
        let text = errors.to_string();
        assert!(text.contains("`name`: must not be empty"));
        assert!(text.contains("`sku`: must not be empty"));
        assert!(errors.has_field("sku"));
    }

    #[test]
    fn test_minimal_config_is_valid() {
        assert!(validate_config(&minimal_config()).is_ok());
    }

    #[test]
    fn test_negative_instances_rejected() {
        let mut config = minimal_config();
        config.instances = 0;
        assert!(!field_errors(&config).has_field("instances"));
        config.instances = -1;
        assert!(field_errors(&config).has_field("instances"));
    }

    #[test]
    fn test_idle_timeout_bounds() {
        let field = "network_interface.0.ip_configuration.0.public_ip_address.idle_timeout_in_minutes";
        let mut config = minimal_config();
        let with_timeout = |config: &mut LinuxVirtualMachineScaleSetConfig, minutes: i32| {
            config.network_interface[0].ip_configuration[0].public_ip_address =
                Some(PublicIpAddressBlock {
                    name: "public".into(),
                    domain_name_label: None,
                    idle_timeout_in_minutes: Some(minutes),
                    ip_tag: Vec::new(),
                    public_ip_prefix_id: None,
                });
        };

        for minutes in [4, 32] {
            with_timeout(&mut config, minutes);
            assert!(!field_errors(&config).has_field(field), "{}", minutes);
        }
        for minutes in [3, 33] {
            with_timeout(&mut config, minutes);
            assert!(field_errors(&config).has_field(field), "{}", minutes);
        }
    }

    #[test]
    fn test_os_disk_size_bounds() {
        let mut config = minimal_config();
        for size in [1, 1023] {
            config.os_disk.as_mut().unwrap().disk_size_gb = Some(size);
            assert!(!field_errors(&config).has_field("os_disk.disk_size_gb"), "{}", size);
        }
        for size in [0, 1024] {
            config.os_disk.as_mut().unwrap().disk_size_gb = Some(size);
            assert!(field_errors(&config).has_field("os_disk.disk_size_gb"), "{}", size);
        }
    }

    #[test]
    fn test_application_security_group_limit() {
        let field = "network_interface.0.ip_configuration.0.application_security_group_ids";
        let mut config = minimal_config();
        let ip = &mut config.network_interface[0].ip_configuration[0];
        ip.application_security_group_ids = (0..20).map(|i| format!("{}/asg{}", ASG_ID, i)).collect();
        assert!(!field_errors(&config).has_field(field));

        config.network_interface[0].ip_configuration[0]
            .application_security_group_ids
            .insert(format!("{}/asg20", ASG_ID));
        assert!(field_errors(&config).has_field(field));
    }

    #[test]
    fn test_password_authentication_co_requirements() {
        let mut config = minimal_config();
        config.admin_ssh_key.clear();
        assert!(field_errors(&config).has_field("admin_ssh_key"));

        config.disable_password_authentication = false;
        assert!(field_errors(&config).has_field("admin_password"));
        config.admin_password = Some("P@ssw0rd1234!".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_unknown_enum_values_rejected_in_config() {
        let mut config = minimal_config();
        config.os_disk.as_mut().unwrap().storage_account_type = StorageAccountType::Unknown;
        config.upgrade_mode = UpgradeMode::Unknown;
        config.network_interface[0].ip_configuration[0].version = IpVersion::Unknown;
        let errors = field_errors(&config);
        assert!(errors.has_field("os_disk.storage_account_type"));
        assert!(errors.has_field("upgrade_mode"));
        assert!(errors.has_field("network_interface.0.ip_configuration.0.version"));
    }
}
