//! # Azure Runner Provider
//!
//! An async provisioning provider that backs ephemeral CI runners with Azure
//! virtual machines. The orchestrating host hands over a bootstrap request;
//! the provider creates a dedicated resource group holding the instance's
//! network, security group, NIC and VM, and later tears the whole group down
//! in one call.
//!
//! ## Core Concepts
//!
//! - **Bootstrap request**: what the orchestrator sends to create a runner
//!   ([`params::BootstrapInstance`]), including optional per-pool overrides
//!   ([`params::ExtraSpecs`])
//! - **Runner spec**: the fully resolved, immutable provisioning plan built
//!   from config defaults plus request overrides ([`spec::RunnerSpec`])
//! - **Resource group per instance**: the instance name doubles as the
//!   resource-group name, making the group the unit of rollback and deletion
//! - **Resource client**: the seam between the pipeline and Azure
//!   ([`client::ResourceClient`]), implemented over the ARM REST API by
//!   [`client::azure::AzureClient`] and by in-memory fakes in tests
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use azure_runner_provider::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_file("/etc/runner-provider/azure.toml")?;
//!     let client = AzureClient::new(config.clone())?;
//!     let provider = AzureProvider::new("controller-id", config, client);
//!
//!     let instance = provider.create_instance(&request).await?;
//!     println!("created {}", instance.provider_id);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod params;
pub mod provider;
pub mod spec;
pub mod util;

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::client::{azure::AzureClient, ResourceClient};
    pub use crate::config::{Config, Credentials};
    pub use crate::error::{Error, ProvisioningStep, Result};
    pub use crate::params::{
        Address, AddressType, BootstrapInstance, ExtraSpecs, InstanceStatus, OsArch, OsType,
        ProviderInstance,
    };
    pub use crate::provider::{AzureProvider, ExternalProvider};
    pub use crate::spec::{ImageDetails, RunnerSpec};
}
