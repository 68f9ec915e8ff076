//! Cloud resource client abstraction.
//!
//! [`ResourceClient`] is the seam between the provisioning orchestrator and
//! Azure: every cloud mutation the pipeline performs goes through this trait,
//! so the orchestrator can be exercised against an in-memory fake while the
//! production implementation ([`azure::AzureClient`]) talks to the Azure
//! Resource Manager REST API.
//!
//! Implementations must be safe for concurrent use: one client handle is
//! shared by every in-flight provisioning run, and each run only touches
//! resources inside its own uniquely named resource group.

pub mod azure;

use crate::error::Result;
use crate::spec::RunnerSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A resource group record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceGroup {
    /// ARM resource id
    pub id: Option<String>,
    /// Group name
    pub name: Option<String>,
}

/// A virtual network record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualNetwork {
    /// ARM resource id
    pub id: Option<String>,
}

/// A subnet record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    /// ARM resource id
    pub id: Option<String>,
}

/// A public IP record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicIpAddress {
    /// ARM resource id
    pub id: Option<String>,
    /// Assigned address, present once allocation completes
    pub ip_address: Option<String>,
}

/// A network security group record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroup {
    /// ARM resource id
    pub id: Option<String>,
}

/// A network interface record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// ARM resource id
    pub id: Option<String>,
}

/// Power/provisioning status entry from a VM's instance view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceViewStatus {
    /// Status code, e.g. "PowerState/running"
    pub code: Option<String>,
}

/// The instance view of a virtual machine (runtime state).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceView {
    /// Status entries; the power state carries a "PowerState/" prefix
    #[serde(default)]
    pub statuses: Vec<InstanceViewStatus>,
}

/// Virtual machine properties relevant to translation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineProperties {
    /// ARM provisioning state (Succeeded, Failed, Deleting, ...)
    pub provisioning_state: Option<String>,
    /// Runtime instance view, present when requested with $expand
    pub instance_view: Option<InstanceView>,
}

/// A provider-native virtual machine record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualMachine {
    /// ARM resource id
    pub id: Option<String>,
    /// VM name
    pub name: Option<String>,
    /// Resource tags
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// VM properties
    pub properties: Option<VirtualMachineProperties>,
}

/// Operations the provisioning pipeline requires from the cloud.
///
/// Every operation applies its own transport-level retry policy and returns
/// a distinguishable not-found condition
/// ([`Error::NotFound`](crate::error::Error::NotFound)). Resource names are
/// always the owning instance's name; the resource group provides the
/// namespace.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Creates (or updates) the resource group scoping one instance.
    async fn create_resource_group(
        &self,
        name: &str,
        tags: &HashMap<String, String>,
    ) -> Result<ResourceGroup>;

    /// Deletes a resource group and, transitively, everything inside it.
    /// `force` also detaches resources that would otherwise block deletion.
    async fn delete_resource_group(&self, name: &str, force: bool) -> Result<()>;

    /// Creates the instance's virtual network with the given address space.
    async fn create_virtual_network(&self, name: &str, cidr: &str) -> Result<VirtualNetwork>;

    /// Creates the single subnet of the instance's virtual network.
    async fn create_subnet(&self, name: &str, cidr: &str) -> Result<Subnet>;

    /// Allocates a public IP for the instance.
    async fn create_public_ip(&self, name: &str) -> Result<PublicIpAddress>;

    /// Creates the instance's network security group with rules derived
    /// from the spec.
    async fn create_network_security_group(
        &self,
        name: &str,
        spec: &RunnerSpec,
    ) -> Result<SecurityGroup>;

    /// Creates the network interface binding subnet, security group and the
    /// optional public IP.
    async fn create_network_interface(
        &self,
        name: &str,
        subnet_id: &str,
        security_group_id: &str,
        public_ip_id: Option<&str>,
        accelerated_networking: bool,
    ) -> Result<NetworkInterface>;

    /// Creates the virtual machine, attaching the NIC and applying the
    /// resolved OS disk size.
    async fn create_virtual_machine(
        &self,
        spec: &RunnerSpec,
        nic_id: &str,
        disk_size_gb: u32,
    ) -> Result<()>;

    /// Fetches one VM including its instance view.
    async fn get_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualMachine>;

    /// Lists VMs carrying the given pool tag. Elements are optional so a
    /// null entry in the provider response stays visible to the caller.
    async fn list_virtual_machines(&self, pool_id: &str) -> Result<Vec<Option<VirtualMachine>>>;

    /// Maximum ephemeral OS disk size in GB supported by a VM size class.
    async fn max_ephemeral_disk_size(&self, vm_size: &str) -> Result<u32>;

    /// Deallocates (stops and releases) a VM.
    async fn deallocate_virtual_machine(&self, resource_group: &str, name: &str) -> Result<()>;

    /// Starts a deallocated VM.
    async fn start_virtual_machine(&self, resource_group: &str, name: &str) -> Result<()>;
}
