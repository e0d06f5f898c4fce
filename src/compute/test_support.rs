//! Shared fixtures for unit tests

use super::schema::LinuxVirtualMachineScaleSetConfig;

pub const MINIMAL_YAML: &str = r#"
name: example-vmss
resource_group_name: example-resources
location: West Europe
admin_username: adminuser
instances: 2
sku: Standard_F2
admin_ssh_key:
  - username: adminuser
    public_key: ssh-rsa AAAAB3Nza
network_interface:
  - name: example
    primary: true
    ip_configuration:
      - name: internal
        primary: true
        subnet_id: /subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vn/subnets/internal
os_disk:
  caching: ReadWrite
  storage_account_type: Standard_LRS
source_image_reference:
  publisher: Canonical
  offer: UbuntuServer
  sku: 16.04-LTS
  version: latest
"#;

pub fn minimal_config() -> LinuxVirtualMachineScaleSetConfig {
    serde_yaml::from_str(MINIMAL_YAML).expect("fixture parses")
}
