//! Azure Resource Manager interaction module
//!
//! This module provides the core functionality for talking to the Azure
//! Resource Manager REST API: authentication, the HTTP client, and
//! long-running operation polling.
//!
//! # Module Structure
//!
//! - [`auth`] - bearer tokens from the environment or a service principal
//! - [`client`] - main Azure client for making API requests
//! - [`http`] - HTTP utilities and typed API errors
//! - [`operation`] - polling of long-running PUT / DELETE operations
//!
//! # Example
//!
//! ```ignore
//! use azvmss::azure::{auth::AzureCredentials, client::AzureClient};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let credentials = AzureCredentials::static_token("token")?;
//!     let client = AzureClient::new(credentials, "subscription-id", "https://management.azure.com")?;
//!     let url = client.resource_url(
//!         "/subscriptions/subscription-id/resourceGroups/my-rg/providers/Microsoft.Compute/virtualMachineScaleSets/vmss1",
//!         "2019-07-01",
//!     );
//!     let scale_set = client.get(&url).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod operation;
