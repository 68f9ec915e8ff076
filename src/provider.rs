//! Instance lifecycle provider.
//!
//! [`AzureProvider`] implements the external lifecycle contract on top of a
//! [`ResourceClient`]. Each instance lives in its own resource group named
//! after the instance, which makes the group the unit of rollback and
//! deletion: a failed creation tears the group down again, and deleting an
//! instance is just deleting its group.

use crate::client::ResourceClient;
use crate::config::Config;
use crate::error::{Error, ProvisioningStep, Result};
use crate::params::{
    Address, AddressType, BootstrapInstance, InstanceStatus, OsArch, ProviderInstance,
};
use crate::spec::{resolve_disk_size, RunnerSpec};
use crate::util::vm_to_instance;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// The external lifecycle contract between the orchestrator and a compute
/// provider.
#[async_trait]
pub trait ExternalProvider: Send + Sync {
    /// Creates a runner instance from a bootstrap request.
    async fn create_instance(&self, params: &BootstrapInstance) -> Result<ProviderInstance>;

    /// Deletes an instance and every resource belonging to it. Deleting an
    /// instance that no longer exists succeeds.
    async fn delete_instance(&self, instance: &str) -> Result<()>;

    /// Fetches the current state of one instance.
    async fn get_instance(&self, instance: &str) -> Result<ProviderInstance>;

    /// Lists all instances belonging to a pool.
    async fn list_instances(&self, pool_id: &str) -> Result<Vec<ProviderInstance>>;

    /// Removes every instance owned by this provider's controller.
    async fn remove_all_instances(&self) -> Result<()>;

    /// Stops a running instance. `force` is accepted for contract
    /// compatibility; deallocation is already as forceful as Azure gets.
    async fn stop(&self, instance: &str, force: bool) -> Result<()>;

    /// Starts a stopped instance.
    async fn start(&self, instance: &str) -> Result<()>;
}

/// Azure-backed lifecycle provider.
pub struct AzureProvider<C: ResourceClient> {
    controller_id: String,
    config: Config,
    client: C,
}

impl<C: ResourceClient> AzureProvider<C> {
    /// Creates a provider for one controller over a validated config.
    pub fn new(controller_id: impl Into<String>, config: Config, client: C) -> Self {
        Self {
            controller_id: controller_id.into(),
            config,
            client,
        }
    }

    /// The underlying resource client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Runs the resource creation pipeline inside an already-created
    /// resource group, returning the addresses captured along the way. Each
    /// failure is labeled with the step that caused it; the caller owns
    /// rollback.
    async fn provision_resources(
        &self,
        spec: &RunnerSpec,
        disk_size_gb: u32,
    ) -> Result<Vec<Address>> {
        let name = spec.name.as_str();

        let virtual_network = self
            .client
            .create_virtual_network(name, &spec.virtual_network_cidr)
            .await
            .map_err(|e| Error::provisioning(ProvisioningStep::VirtualNetwork, e))?;
        debug!(instance = name, id = ?virtual_network.id, "virtual network created");

        let subnet = self
            .client
            .create_subnet(name, &spec.virtual_network_cidr)
            .await
            .map_err(|e| Error::provisioning(ProvisioningStep::Subnet, e))?;
        let subnet_id = subnet.id.ok_or_else(|| {
            Error::provisioning(
                ProvisioningStep::Subnet,
                Error::Translation("subnet record has no id".to_string()),
            )
        })?;

        let mut addresses = Vec::new();
        let public_ip_id = if spec.allocate_public_ip {
            let public_ip = self
                .client
                .create_public_ip(name)
                .await
                .map_err(|e| Error::provisioning(ProvisioningStep::PublicIp, e))?;
            // The id is needed by the NIC; the address itself is best-effort
            // since allocation may still be settling.
            if let Some(address) = public_ip.ip_address {
                addresses.push(Address {
                    address,
                    address_type: AddressType::Public,
                });
            }
            let id = public_ip.id.ok_or_else(|| {
                Error::provisioning(
                    ProvisioningStep::PublicIp,
                    Error::Translation("public IP record has no id".to_string()),
                )
            })?;
            Some(id)
        } else {
            None
        };

        let security_group = self
            .client
            .create_network_security_group(name, spec)
            .await
            .map_err(|e| Error::provisioning(ProvisioningStep::SecurityGroup, e))?;
        let security_group_id = security_group.id.ok_or_else(|| {
            Error::provisioning(
                ProvisioningStep::SecurityGroup,
                Error::Translation("security group record has no id".to_string()),
            )
        })?;

        let nic = self
            .client
            .create_network_interface(
                name,
                &subnet_id,
                &security_group_id,
                public_ip_id.as_deref(),
                spec.use_accelerated_networking,
            )
            .await
            .map_err(|e| Error::provisioning(ProvisioningStep::NetworkInterface, e))?;
        let nic_id = nic.id.ok_or_else(|| {
            Error::provisioning(
                ProvisioningStep::NetworkInterface,
                Error::Translation("network interface record has no id".to_string()),
            )
        })?;

        self.client
            .create_virtual_machine(spec, &nic_id, disk_size_gb)
            .await
            .map_err(|e| Error::provisioning(ProvisioningStep::VirtualMachine, e))?;

        Ok(addresses)
    }
}

#[async_trait]
impl<C: ResourceClient> ExternalProvider for AzureProvider<C> {
    async fn create_instance(&self, params: &BootstrapInstance) -> Result<ProviderInstance> {
        if params.os_arch != OsArch::Amd64 {
            return Err(Error::UnsupportedArchitecture {
                requested: params.os_arch.to_string(),
                supported: OsArch::Amd64.to_string(),
            });
        }

        let spec = RunnerSpec::from_bootstrap(params, &self.controller_id, &self.config)?;

        // Resolved before any resource exists so a capacity violation leaves
        // nothing to clean up. Non-ephemeral disks skip the SKU lookup.
        let disk_size_gb = if spec.use_ephemeral_storage {
            let max = self.client.max_ephemeral_disk_size(&spec.vm_size).await?;
            resolve_disk_size(&spec, max)?
        } else {
            spec.disk_size_gb
        };

        info!(
            instance = %spec.name,
            pool = %spec.pool_id,
            vm_size = %spec.vm_size,
            disk_size_gb,
            "creating instance"
        );

        self.client
            .create_resource_group(&spec.name, &spec.tags)
            .await
            .map_err(|e| Error::provisioning(ProvisioningStep::ResourceGroup, e))?;

        // The resource group is the rollback boundary: any failure past this
        // point deletes the whole group, best effort, and the original error
        // wins over any cleanup failure.
        let addresses = match self.provision_resources(&spec, disk_size_gb).await {
            Ok(addresses) => addresses,
            Err(err) => {
                if let Err(cleanup_err) =
                    self.client.delete_resource_group(&spec.name, true).await
                {
                    warn!(
                        instance = %spec.name,
                        error = %cleanup_err,
                        "failed to roll back resource group after provisioning failure"
                    );
                }
                return Err(err);
            }
        };

        info!(instance = %spec.name, "instance created");

        // The VM is reported as running without polling the platform. The
        // runner registers itself with the orchestrator once it boots, which
        // supersedes this status; if boot fails the orchestrator's own
        // timeout reaps the instance.
        Ok(ProviderInstance {
            provider_id: spec.name.clone(),
            name: spec.name.clone(),
            os_type: spec.os_type,
            os_arch: spec.os_arch,
            os_name: spec.image.sku().to_string(),
            os_version: spec.image.version().to_string(),
            status: InstanceStatus::Running,
            addresses,
        })
    }

    async fn delete_instance(&self, instance: &str) -> Result<()> {
        info!(instance, "deleting instance");
        match self.client.delete_resource_group(instance, true).await {
            Ok(()) => Ok(()),
            // Already gone is success; deletion must be safe to repeat.
            Err(err) if err.is_not_found() => {
                debug!(instance, "resource group already deleted");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn get_instance(&self, instance: &str) -> Result<ProviderInstance> {
        let vm = self.client.get_virtual_machine(instance, instance).await?;
        vm_to_instance(&vm)
    }

    async fn list_instances(&self, pool_id: &str) -> Result<Vec<ProviderInstance>> {
        let records = self.client.list_virtual_machines(pool_id).await?;
        let mut instances = Vec::with_capacity(records.len());
        for record in &records {
            match record {
                Some(vm) => instances.push(vm_to_instance(vm)?),
                None => {
                    return Err(Error::Translation(
                        "null instance record in list response".to_string(),
                    ))
                }
            }
        }
        debug!(pool_id, count = instances.len(), "listed instances");
        Ok(instances)
    }

    /// Instances are removed individually by the orchestrator as runners
    /// retire; there is no bulk teardown beyond that.
    async fn remove_all_instances(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, instance: &str, _force: bool) -> Result<()> {
        info!(instance, "stopping instance");
        self.client
            .deallocate_virtual_machine(instance, instance)
            .await
    }

    async fn start(&self, instance: &str) -> Result<()> {
        info!(instance, "starting instance");
        self.client.start_virtual_machine(instance, instance).await
    }
}
