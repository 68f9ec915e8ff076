//! Provisioning specification derived from a bootstrap request.
//!
//! [`RunnerSpec`] is built exactly once per creation request by folding the
//! construction-time [`Config`] defaults with the request's
//! [`ExtraSpecs`](crate::params::ExtraSpecs) overrides. It is a pure,
//! immutable value: everything the provisioning pipeline needs to know,
//! resolved up front, with no I/O.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::params::{self, BootstrapInstance, ExtraSpecs, OsArch, OsType};
use std::collections::HashMap;

/// Image metadata resolved from an image reference string.
///
/// Either a marketplace URN (`publisher:offer:sku:version`) or a gallery /
/// managed-image resource id (a path starting with `/`). For id references
/// the SKU is taken from the last path segment and the version reported as
/// "latest", since the id itself carries no version metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageDetails {
    /// Marketplace image identified by URN components.
    Urn {
        publisher: String,
        offer: String,
        sku: String,
        version: String,
    },
    /// Image identified by an ARM resource id.
    Id {
        id: String,
        sku: String,
    },
}

impl ImageDetails {
    /// Parses an image reference string.
    pub fn parse(image: &str) -> Result<Self> {
        if image.starts_with('/') {
            let sku = image
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    Error::InvalidSpec(format!("invalid image resource id '{image}'"))
                })?;
            return Ok(ImageDetails::Id {
                id: image.to_string(),
                sku: sku.to_string(),
            });
        }

        let parts: Vec<&str> = image.split(':').collect();
        match parts.as_slice() {
            [publisher, offer, sku, version]
                if !publisher.is_empty()
                    && !offer.is_empty()
                    && !sku.is_empty()
                    && !version.is_empty() =>
            {
                Ok(ImageDetails::Urn {
                    publisher: (*publisher).to_string(),
                    offer: (*offer).to_string(),
                    sku: (*sku).to_string(),
                    version: (*version).to_string(),
                })
            }
            _ => Err(Error::InvalidSpec(format!(
                "invalid image reference '{image}' (expected publisher:offer:sku:version or a resource id)"
            ))),
        }
    }

    /// The OS distribution name reported to the orchestrator.
    pub fn sku(&self) -> &str {
        match self {
            ImageDetails::Urn { sku, .. } => sku,
            ImageDetails::Id { sku, .. } => sku,
        }
    }

    /// The image version reported to the orchestrator.
    pub fn version(&self) -> &str {
        match self {
            ImageDetails::Urn { version, .. } => version,
            ImageDetails::Id { .. } => "latest",
        }
    }
}

/// Immutable provisioning specification for one instance creation.
#[derive(Debug, Clone)]
pub struct RunnerSpec {
    /// Instance name; also the resource-group name and stable identifier
    pub name: String,
    /// Pool the instance belongs to
    pub pool_id: String,
    /// Operating system family
    pub os_type: OsType,
    /// CPU architecture
    pub os_arch: OsArch,
    /// VM size class
    pub vm_size: String,
    /// Resolved image reference
    pub image: ImageDetails,
    /// Requested OS disk size in GB (0 = default / ephemeral maximum)
    pub disk_size_gb: u32,
    /// Back the OS disk with VM-local ephemeral storage
    pub use_ephemeral_storage: bool,
    /// Provision a confidential VM
    pub confidential: bool,
    /// CIDR of the instance's virtual network
    pub virtual_network_cidr: String,
    /// Allocate a public IP
    pub allocate_public_ip: bool,
    /// Enable accelerated networking on the NIC
    pub use_accelerated_networking: bool,
    /// Inbound TCP ports opened in the security group
    pub open_inbound_ports: Vec<u16>,
    /// Managed disk storage account type (non-ephemeral disks)
    pub storage_account_type: String,
    /// Admin username in the VM's OS profile
    pub admin_username: String,
    /// SSH public keys authorized on the instance
    pub ssh_public_keys: Vec<String>,
    /// Startup payload passed as custom data
    pub user_data: Option<String>,
    /// Tags applied to every resource of this instance
    pub tags: HashMap<String, String>,
}

impl RunnerSpec {
    /// Derives the spec from a bootstrap request, the provider config, and
    /// the owning controller's identifier. Deterministic; no I/O.
    pub fn from_bootstrap(
        params: &BootstrapInstance,
        controller_id: &str,
        config: &Config,
    ) -> Result<Self> {
        if params.name.is_empty() {
            return Err(Error::InvalidSpec("instance name must not be empty".to_string()));
        }

        let extra = ExtraSpecs::from_bootstrap(params)?;

        let image_ref = if params.image.is_empty() {
            config.default_image.as_str()
        } else {
            params.image.as_str()
        };
        let image = ImageDetails::parse(image_ref)?;

        let vm_size = if params.flavor.is_empty() {
            config.default_vm_size.clone()
        } else {
            params.flavor.clone()
        };

        let virtual_network_cidr = extra
            .virtual_network_cidr
            .clone()
            .unwrap_or_else(|| config.virtual_network_cidr.clone());
        if virtual_network_cidr.is_empty() {
            return Err(Error::InvalidSpec(
                "virtual network CIDR must not be empty".to_string(),
            ));
        }

        let tags = params::build_tags(
            controller_id,
            &params.pool_id,
            params.os_type,
            params.os_arch,
            image.sku(),
            image.version(),
        );

        Ok(Self {
            name: params.name.clone(),
            pool_id: params.pool_id.clone(),
            os_type: params.os_type,
            os_arch: params.os_arch,
            vm_size,
            image,
            disk_size_gb: extra.disk_size_gb.unwrap_or(0),
            use_ephemeral_storage: extra
                .use_ephemeral_storage
                .unwrap_or(config.use_ephemeral_storage),
            confidential: extra.confidential.unwrap_or(config.confidential),
            virtual_network_cidr,
            allocate_public_ip: extra
                .allocate_public_ip
                .unwrap_or(config.allocate_public_ip),
            use_accelerated_networking: extra
                .use_accelerated_networking
                .unwrap_or(config.use_accelerated_networking),
            open_inbound_ports: extra
                .open_inbound_ports
                .unwrap_or_else(|| config.open_inbound_ports.clone()),
            storage_account_type: extra
                .storage_account_type
                .unwrap_or_else(|| config.storage_account_type.clone()),
            admin_username: config.admin_username.clone(),
            ssh_public_keys: extra
                .ssh_public_keys
                .unwrap_or_else(|| config.ssh_public_keys.clone()),
            user_data: params.user_data.clone(),
            tags,
        })
    }
}

/// Overhead in GB reserved by the platform when a confidential VM boots from
/// an ephemeral OS disk.
const CONFIDENTIAL_EPHEMERAL_OVERHEAD_GB: u32 = 1;

/// Computes the effective OS disk size for a spec.
///
/// Without ephemeral storage the spec's explicit size is returned unchanged,
/// whatever the maximum. With ephemeral storage the maximum is first reduced
/// by the confidential-VM overhead; an unset (zero) request resolves to that
/// adjusted maximum, and an explicit request above it is a capacity error.
pub fn resolve_disk_size(spec: &RunnerSpec, max_ephemeral_gb: u32) -> Result<u32> {
    if !spec.use_ephemeral_storage {
        return Ok(spec.disk_size_gb);
    }

    let adjusted_max = if spec.confidential {
        max_ephemeral_gb.saturating_sub(CONFIDENTIAL_EPHEMERAL_OVERHEAD_GB)
    } else {
        max_ephemeral_gb
    };

    if spec.disk_size_gb == 0 {
        return Ok(adjusted_max);
    }

    if spec.disk_size_gb > adjusted_max {
        return Err(Error::CapacityExceeded {
            vm_size: spec.vm_size.clone(),
            max_gb: adjusted_max,
            requested_gb: spec.disk_size_gb,
        });
    }

    Ok(spec.disk_size_gb)
}
