//! Resource IDs and locations

use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;
use std::fmt;

/// A parsed ARM resource ID
///
/// `/subscriptions/{sub}/resourceGroups/{rg}/providers/{ns}/{type}/{name}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: Option<String>,
    pub provider: Option<String>,
    /// Remaining key/value segments, e.g. `virtualMachineScaleSets → name`
    pub path: BTreeMap<String, String>,
}

/// Parse an ARM resource ID into its key/value segments
pub fn parse_resource_id(id: &str) -> Result<ResourceId> {
    let trimmed = id.trim().trim_matches('/');
    if trimmed.is_empty() {
        bail!("Cannot parse an empty resource ID");
    }

    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.len() % 2 != 0 {
        bail!("The number of path segments is not divisible by 2 in {:?}", id);
    }

    let mut subscription_id = None;
    let mut resource_group = None;
    let mut provider = None;
    let mut path = BTreeMap::new();

    for pair in segments.chunks(2) {
        let (key, value) = (pair[0], pair[1]);
        if key.is_empty() || value.is_empty() {
            bail!("Key/Value cannot be empty strings. Key: {:?}, Value: {:?}", key, value);
        }

        match key.to_ascii_lowercase().as_str() {
            "subscriptions" if subscription_id.is_none() => subscription_id = Some(value),
            "resourcegroups" if resource_group.is_none() => resource_group = Some(value),
            "providers" if provider.is_none() => provider = Some(value),
            _ => {
                path.insert(key.to_string(), value.to_string());
            }
        }
    }

    let subscription_id =
        subscription_id.ok_or_else(|| anyhow!("No subscription ID found in: {:?}", id))?;

    Ok(ResourceId {
        subscription_id: subscription_id.to_string(),
        resource_group: resource_group.map(str::to_string),
        provider: provider.map(str::to_string),
        path,
    })
}

/// Validate that a string is a resource-group scoped ARM ID
pub fn validate_resource_id(id: &str) -> Result<()> {
    let parsed = parse_resource_id(id)?;
    if parsed.resource_group.is_none() {
        bail!("No resource group found in: {:?}", id);
    }
    Ok(())
}

/// ID of a `Microsoft.Compute/virtualMachineScaleSets` resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleSetId {
    pub subscription_id: String,
    pub resource_group: String,
    pub name: String,
}

impl ScaleSetId {
    pub fn new(subscription_id: &str, resource_group: &str, name: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            resource_group: resource_group.to_string(),
            name: name.to_string(),
        }
    }

    /// Parse and check that the ID points at a scale set
    pub fn parse(id: &str) -> Result<Self> {
        let parsed = parse_resource_id(id)?;

        let resource_group = parsed
            .resource_group
            .ok_or_else(|| anyhow!("No resource group found in: {:?}", id))?;

        if !parsed
            .provider
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case("Microsoft.Compute"))
        {
            bail!("Expected a Microsoft.Compute resource ID, got {:?}", id);
        }

        let name = parsed
            .path
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("virtualMachineScaleSets"))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| anyhow!("Expected a virtualMachineScaleSets segment in {:?}", id))?;

        if parsed.path.len() != 1 {
            bail!("Expected a Virtual Machine Scale Set ID, got a child resource: {:?}", id);
        }

        Ok(Self {
            subscription_id: parsed.subscription_id,
            resource_group,
            name,
        })
    }
}

impl fmt::Display for ScaleSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}",
            self.subscription_id, self.resource_group, self.name
        )
    }
}

/// Normalize an Azure location: `West Europe` → `westeurope`
pub fn normalize_location(location: &str) -> String {
    location
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}
