//! Lifecycle tests for the scale set handler using wiremock
//!
//! These tests drive create / read / update / delete / import against a mocked
//! Resource Manager endpoint, including long-running operation polling.

use azvmss::azure::auth::AzureCredentials;
use azvmss::azure::client::AzureClient;
use azvmss::compute::expand::expand_scale_set;
use azvmss::compute::models::StorageAccountType;
use azvmss::compute::{
    HandlerOptions, LinuxVirtualMachineScaleSetConfig, ScaleSetHandler, Timeouts,
};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";
const RESOURCE_PATH: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/example-resources/providers/Microsoft.Compute/virtualMachineScaleSets/example-vmss";

const CONFIG: &str = r#"
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
        subnet_id: /subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/example-resources/providers/Microsoft.Network/virtualNetworks/vn/subnets/internal
os_disk:
  caching: ReadWrite
  storage_account_type: Standard_LRS
source_image_reference:
  publisher: Canonical
  offer: UbuntuServer
  sku: 16.04-LTS
  version: latest
"#;

fn config() -> LinuxVirtualMachineScaleSetConfig {
    serde_yaml::from_str(CONFIG).expect("fixture parses")
}

fn handler(server: &MockServer, timeouts: Timeouts) -> ScaleSetHandler {
    let credentials = AzureCredentials::static_token("test-token").unwrap();
    let client = AzureClient::new(credentials, SUBSCRIPTION, &server.uri()).unwrap();
    ScaleSetHandler::new(
        client,
        HandlerOptions {
            timeouts,
            poll_interval: Duration::from_millis(10),
            require_import: true,
        },
    )
}

/// The resource as the service would return it for `config`
fn remote_resource(config: &LinuxVirtualMachineScaleSetConfig) -> Value {
    let mut value = serde_json::to_value(expand_scale_set(config).unwrap()).unwrap();
    value["id"] = json!(RESOURCE_PATH);
    value["name"] = json!(config.name);
    value["properties"]["uniqueId"] = json!("7ab36f0a-1f4a-4b55-9bb0-8e2a9b6b0d1c");
    value["properties"]["provisioningState"] = json!("Succeeded");
    value["properties"]["virtualMachineProfile"]["osProfile"]
        .as_object_mut()
        .unwrap()
        .remove("adminPassword");
    value
}

/// Every operation bounded well below `SLOW_RESPONSE`
fn short_timeouts() -> Timeouts {
    Timeouts {
        create: Duration::from_millis(200),
        read: Duration::from_millis(200),
        update: Duration::from_millis(200),
        delete: Duration::from_millis(200),
    }
}

const SLOW_RESPONSE: Duration = Duration::from_secs(3);

fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "error": {"code": "ResourceNotFound", "message": "The Resource was not found."}
    }))
}

mod create_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_polls_async_operation_then_reads_back() {
        let server = MockServer::start().await;
        let config = config();
        let remote = remote_resource(&config);

        // Import check sees nothing, later reads see the new scale set
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(not_found())
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .and(query_param("api-version", "2019-07-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&remote))
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path(RESOURCE_PATH))
            .and(body_partial_json(json!({
                "location": "westeurope",
                "sku": {"name": "Standard_F2", "tier": "Standard", "capacity": 2},
                "properties": {"virtualMachineProfile": {"storageProfile": {"dataDisks": []}}}
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header(
                        "Azure-AsyncOperation",
                        format!("{}/operations/create-1", server.uri()).as_str(),
                    )
                    .set_body_json(&remote),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/create-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "InProgress"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/create-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
            .mount(&server)
            .await;

        let state = handler(&server, Timeouts::default())
            .create(&config)
            .await
            .expect("create should succeed");

        assert_eq!(state.id, RESOURCE_PATH);
        assert_eq!(state.attributes.instances, 2);
        assert_eq!(state.attributes.location, "westeurope");
        assert_eq!(
            state.attributes.unique_id.as_deref(),
            Some("7ab36f0a-1f4a-4b55-9bb0-8e2a9b6b0d1c")
        );
        assert_eq!(state.attributes.admin_ssh_key, config.admin_ssh_key);
    }

    #[tokio::test]
    async fn test_create_refuses_existing_resource() {
        let server = MockServer::start().await;
        let config = config();

        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_resource(&config)))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = handler(&server, Timeouts::default())
            .create(&config)
            .await
            .unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("already exists"), "{}", message);
        assert!(message.contains(RESOURCE_PATH), "{}", message);
    }

    #[tokio::test]
    async fn test_invalid_config_never_reaches_the_api() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = config();
        config.source_image_reference = None;
        config.zone_balance = true;

        let err = handler(&server, Timeouts::default())
            .create(&config)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("source_image_id"), "{}", message);
        assert!(message.contains("zone_balance"), "{}", message);
    }

    #[tokio::test]
    async fn test_failed_operation_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(not_found())
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(201).insert_header(
                "Azure-AsyncOperation",
                format!("{}/operations/create-2", server.uri()).as_str(),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/create-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Failed",
                "error": {"code": "AllocationFailed", "message": "no capacity in westeurope"}
            })))
            .mount(&server)
            .await;

        let err = handler(&server, Timeouts::default())
            .create(&config())
            .await
            .unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Error waiting for creation of"), "{}", message);
        assert!(message.contains("AllocationFailed"), "{}", message);
    }

    #[tokio::test]
    async fn test_create_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(not_found())
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(201).insert_header(
                "Azure-AsyncOperation",
                format!("{}/operations/slow", server.uri()).as_str(),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "InProgress"})))
            .mount(&server)
            .await;

        let timeouts = Timeouts {
            create: Duration::from_millis(200),
            ..Timeouts::default()
        };
        let err = handler(&server, timeouts).create(&config()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Timed out"));
    }

    #[tokio::test]
    async fn test_create_timeout_covers_slow_put() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(not_found())
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_delay(SLOW_RESPONSE))
            .mount(&server)
            .await;

        let started = Instant::now();
        let err = handler(&server, short_timeouts())
            .create(&config())
            .await
            .unwrap_err();

        assert!(started.elapsed() < SLOW_RESPONSE, "{:?}", started.elapsed());
        let message = format!("{:#}", err);
        assert!(message.contains("Timed out after 200ms creating"), "{}", message);
    }

    #[tokio::test]
    async fn test_create_fails_when_read_back_has_no_id() {
        let server = MockServer::start().await;
        let config = config();
        let mut remote = remote_resource(&config);
        remote.as_object_mut().unwrap().remove("id");

        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(not_found())
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(&remote))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let err = handler(&server, Timeouts::default())
            .create(&config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ID was nil"), "{}", err);
    }
}

mod read_tests {
    use super::*;

    #[tokio::test]
    async fn test_read_missing_resource_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(not_found())
            .mount(&server)
            .await;

        let state = handler(&server, Timeouts::default())
            .read(RESOURCE_PATH, None)
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_read_keeps_password_from_prior_state() {
        let server = MockServer::start().await;
        let mut prior = config();
        prior.admin_password = Some("P@ssw0rd1234!".into());

        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_resource(&prior)))
            .mount(&server)
            .await;

        let state = handler(&server, Timeouts::default())
            .read(RESOURCE_PATH, Some(&prior))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.attributes.admin_password.as_deref(), Some("P@ssw0rd1234!"));
    }

    #[tokio::test]
    async fn test_read_without_properties_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": RESOURCE_PATH, "location": "westeurope"})),
            )
            .mount(&server)
            .await;

        let err = handler(&server, Timeouts::default())
            .read(RESOURCE_PATH, None)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("properties"));
    }

    #[tokio::test]
    async fn test_read_server_error_is_wrapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": {"code": "InternalServerError", "message": "boom"}
            })))
            .mount(&server)
            .await;

        let err = handler(&server, Timeouts::default())
            .read(RESOURCE_PATH, None)
            .await
            .unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains(
            r#"Error retrieving Linux Virtual Machine Scale Set "example-vmss" (Resource Group "example-resources")"#
        ), "{}", message);
    }

    #[tokio::test]
    async fn test_read_times_out_on_slow_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(remote_resource(&config()))
                    .set_delay(SLOW_RESPONSE),
            )
            .mount(&server)
            .await;

        let started = Instant::now();
        let err = handler(&server, short_timeouts())
            .read(RESOURCE_PATH, None)
            .await
            .unwrap_err();

        assert!(started.elapsed() < SLOW_RESPONSE, "{:?}", started.elapsed());
        let message = format!("{:#}", err);
        assert!(message.contains("Error retrieving"), "{}", message);
        assert!(message.contains("Timed out"), "{}", message);
    }

    #[tokio::test]
    async fn test_read_tolerates_unrecognised_enum_values() {
        let server = MockServer::start().await;
        let mut remote = remote_resource(&config());
        remote["properties"]["virtualMachineProfile"]["storageProfile"]["osDisk"]["managedDisk"]
            ["storageAccountType"] = json!("StandardSSD_ZRS");
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(&remote))
            .mount(&server)
            .await;

        let state = handler(&server, Timeouts::default())
            .read(RESOURCE_PATH, None)
            .await
            .unwrap()
            .unwrap();
        let os_disk = state.attributes.os_disk.unwrap();
        assert_eq!(os_disk.storage_account_type, StorageAccountType::Unknown);
    }

    #[tokio::test]
    async fn test_read_rejects_non_scale_set_id() {
        let server = MockServer::start().await;
        let vm = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1";
        assert!(handler(&server, Timeouts::default())
            .read(vm, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_import_missing_resource_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(not_found())
            .mount(&server)
            .await;

        let err = handler(&server, Timeouts::default())
            .import(RESOURCE_PATH)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-existent"));
    }

    #[tokio::test]
    async fn test_import_existing_resource() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_resource(&config())))
            .mount(&server)
            .await;

        let state = handler(&server, Timeouts::default())
            .import(RESOURCE_PATH)
            .await
            .unwrap();
        assert_eq!(state.attributes.name, "example-vmss");
        assert_eq!(state.attributes.resource_group_name, "example-resources");
        assert_eq!(state.attributes.admin_password, None);
    }
}

mod update_tests {
    use super::*;

    #[tokio::test]
    async fn test_update_changes_capacity_in_place() {
        let server = MockServer::start().await;
        let prior = config();
        let mut desired = prior.clone();
        desired.instances = 5;

        Mock::given(method("PUT"))
            .and(path(RESOURCE_PATH))
            .and(body_partial_json(json!({"sku": {"capacity": 5}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_resource(&desired)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_resource(&desired)))
            .mount(&server)
            .await;

        let state = handler(&server, Timeouts::default())
            .update(RESOURCE_PATH, &prior, &desired)
            .await
            .unwrap();
        assert_eq!(state.attributes.instances, 5);
    }

    #[tokio::test]
    async fn test_update_rejects_force_new_changes() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let prior = config();
        let mut desired = prior.clone();
        desired.location = "North Europe".into();

        let err = handler(&server, Timeouts::default())
            .update(RESOURCE_PATH, &prior, &desired)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("location"));
    }

    #[tokio::test]
    async fn test_update_timeout_covers_slow_put() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_delay(SLOW_RESPONSE))
            .mount(&server)
            .await;

        let prior = config();
        let mut desired = prior.clone();
        desired.instances = 3;

        let started = Instant::now();
        let err = handler(&server, short_timeouts())
            .update(RESOURCE_PATH, &prior, &desired)
            .await
            .unwrap_err();
        assert!(started.elapsed() < SLOW_RESPONSE, "{:?}", started.elapsed());
        assert!(format!("{:#}", err).contains("Timed out after 200ms updating"));
    }
}

mod delete_tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_follows_location_header() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(202).insert_header(
                "Location",
                format!("{}/operationResults/delete-1", server.uri()).as_str(),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operationResults/delete-1"))
            .respond_with(ResponseTemplate::new(202))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operationResults/delete-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        handler(&server, Timeouts::default())
            .delete(RESOURCE_PATH)
            .await
            .expect("delete should succeed");
    }

    #[tokio::test]
    async fn test_delete_missing_resource_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(RESOURCE_PATH))
            .respond_with(not_found())
            .mount(&server)
            .await;

        assert!(handler(&server, Timeouts::default())
            .delete(RESOURCE_PATH)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_delete_no_content_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        assert!(handler(&server, Timeouts::default())
            .delete(RESOURCE_PATH)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_delete_conflict_is_wrapped() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": {"code": "Conflict", "message": "operation in progress"}
            })))
            .mount(&server)
            .await;

        let err = handler(&server, Timeouts::default())
            .delete(RESOURCE_PATH)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Error deleting"));
    }

    #[tokio::test]
    async fn test_delete_timeout_covers_slow_delete() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(RESOURCE_PATH))
            .respond_with(ResponseTemplate::new(204).set_delay(SLOW_RESPONSE))
            .mount(&server)
            .await;

        let started = Instant::now();
        let err = handler(&server, short_timeouts())
            .delete(RESOURCE_PATH)
            .await
            .unwrap_err();
        assert!(started.elapsed() < SLOW_RESPONSE, "{:?}", started.elapsed());
        assert!(format!("{:#}", err).contains("Timed out after 200ms deleting"));
    }
}
