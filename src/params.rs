//! External contract types exchanged with the orchestrating host.
//!
//! [`BootstrapInstance`] is what the orchestrator hands us when it wants a
//! new runner; [`ProviderInstance`] is the normalized record we hand back
//! from create/get/list. Both are plain serde types with no provider-specific
//! fields, so the host never sees Azure resource identifiers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Operating system family of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Windows,
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsType::Linux => f.write_str("linux"),
            OsType::Windows => f.write_str("windows"),
        }
    }
}

/// CPU architecture of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsArch {
    Amd64,
    Arm64,
}

impl std::fmt::Display for OsArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsArch::Amd64 => f.write_str("amd64"),
            OsArch::Arm64 => f.write_str("arm64"),
        }
    }
}

impl std::str::FromStr for OsArch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "amd64" | "x86_64" => Ok(OsArch::Amd64),
            "arm64" | "aarch64" => Ok(OsArch::Arm64),
            other => Err(Error::InvalidSpec(format!("unknown architecture '{other}'"))),
        }
    }
}

/// Lifecycle status of an instance as reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Stopped,
    Error,
    Deleting,
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
            InstanceStatus::Deleting => "deleting",
            InstanceStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Kind of address attached to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Public,
    Private,
}

/// A network address assigned to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// The IP address value
    pub address: String,
    /// Whether the address is publicly routable
    #[serde(rename = "type")]
    pub address_type: AddressType,
}

/// Per-request overrides supplied by the orchestrator alongside a bootstrap
/// request.
///
/// Every field is optional; anything left unset falls back to the
/// construction-time [`Config`](crate::config::Config) defaults. Unknown keys
/// are rejected so a typo in a pool definition surfaces as an error instead
/// of being silently ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtraSpecs {
    /// Allocate a public IP for the instance
    pub allocate_public_ip: Option<bool>,
    /// Inbound TCP ports to open in the security group
    pub open_inbound_ports: Option<Vec<u16>>,
    /// OS disk size in GB (0 or unset = provider default / ephemeral maximum)
    pub disk_size_gb: Option<u32>,
    /// Managed disk storage account type (e.g. "Standard_LRS")
    pub storage_account_type: Option<String>,
    /// Back the OS disk with VM-local ephemeral storage
    pub use_ephemeral_storage: Option<bool>,
    /// CIDR of the instance's virtual network
    pub virtual_network_cidr: Option<String>,
    /// Enable accelerated networking on the NIC
    pub use_accelerated_networking: Option<bool>,
    /// Provision a confidential VM (hardware-backed memory encryption)
    pub confidential: Option<bool>,
    /// SSH public keys authorized on the instance
    pub ssh_public_keys: Option<Vec<String>>,
}

impl ExtraSpecs {
    /// Parses extra specs from the raw JSON blob carried by a bootstrap
    /// request. An absent blob yields the defaults.
    pub fn from_bootstrap(params: &BootstrapInstance) -> Result<Self> {
        match &params.extra_specs {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| Error::InvalidSpec(format!("invalid extra_specs: {e}"))),
            None => Ok(Self::default()),
        }
    }
}

/// A request from the orchestrator to create one runner instance.
///
/// The name doubles as the resource-group name and the stable instance
/// identifier for the whole lifetime of the runner, so it must be unique
/// per creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapInstance {
    /// Unique instance name, also the resource-group namespace
    pub name: String,
    /// Identifier of the pool this runner belongs to
    pub pool_id: String,
    /// VM size class (e.g. "Standard_D2s_v3")
    pub flavor: String,
    /// Image reference: URN "publisher:offer:sku:version" or a gallery /
    /// managed-image resource id
    pub image: String,
    /// Operating system family
    pub os_type: OsType,
    /// CPU architecture
    pub os_arch: OsArch,
    /// Cloud-init / startup payload passed to the instance as custom data
    #[serde(default)]
    pub user_data: Option<String>,
    /// Raw per-pool overrides, parsed into [`ExtraSpecs`]
    #[serde(default)]
    pub extra_specs: Option<serde_json::Value>,
}

/// The normalized instance record returned to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstance {
    /// Provider-assigned identifier (equals the instance name)
    pub provider_id: String,
    /// Display name
    pub name: String,
    /// Operating system family
    pub os_type: OsType,
    /// CPU architecture
    pub os_arch: OsArch,
    /// OS distribution name (image SKU)
    pub os_name: String,
    /// OS version (image version)
    pub os_version: String,
    /// Lifecycle status
    pub status: InstanceStatus,
    /// Addresses assigned to the instance
    #[serde(default)]
    pub addresses: Vec<Address>,
}

/// Tag keys written at creation time and read back when translating
/// provider-native records in get/list.
pub mod tags {
    /// Identifier of the controller that owns this instance.
    pub const CONTROLLER_ID: &str = "runner-controller-id";
    /// Identifier of the pool this instance belongs to.
    pub const POOL_ID: &str = "runner-pool-id";
    /// OS family recorded at creation.
    pub const OS_TYPE: &str = "os-type";
    /// CPU architecture recorded at creation.
    pub const OS_ARCH: &str = "os-arch";
    /// Image SKU recorded at creation.
    pub const OS_NAME: &str = "os-name";
    /// Image version recorded at creation.
    pub const OS_VERSION: &str = "os-version";
}

/// Builds the tag set applied to every resource of one instance.
pub fn build_tags(
    controller_id: &str,
    pool_id: &str,
    os_type: OsType,
    os_arch: OsArch,
    os_name: &str,
    os_version: &str,
) -> HashMap<String, String> {
    let mut out = HashMap::new();
    out.insert(tags::CONTROLLER_ID.to_string(), controller_id.to_string());
    out.insert(tags::POOL_ID.to_string(), pool_id.to_string());
    out.insert(tags::OS_TYPE.to_string(), os_type.to_string());
    out.insert(tags::OS_ARCH.to_string(), os_arch.to_string());
    out.insert(tags::OS_NAME.to_string(), os_name.to_string());
    out.insert(tags::OS_VERSION.to_string(), os_version.to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bootstrap_with_specs(specs: serde_json::Value) -> BootstrapInstance {
        BootstrapInstance {
            name: "runner-01".to_string(),
            pool_id: "pool-1".to_string(),
            flavor: "Standard_D2s_v3".to_string(),
            image: "Canonical:0001-com-ubuntu-server-jammy:22_04-lts-gen2:latest".to_string(),
            os_type: OsType::Linux,
            os_arch: OsArch::Amd64,
            user_data: None,
            extra_specs: Some(specs),
        }
    }

    #[test]
    fn test_extra_specs_parsing() {
        let params = bootstrap_with_specs(json!({
            "allocate_public_ip": true,
            "open_inbound_ports": [22, 443],
            "disk_size_gb": 127
        }));
        let specs = ExtraSpecs::from_bootstrap(&params).unwrap();
        assert_eq!(specs.allocate_public_ip, Some(true));
        assert_eq!(specs.open_inbound_ports, Some(vec![22, 443]));
        assert_eq!(specs.disk_size_gb, Some(127));
        assert!(specs.confidential.is_none());
    }

    #[test]
    fn test_extra_specs_rejects_unknown_keys() {
        let params = bootstrap_with_specs(json!({"disk_size": 127}));
        assert!(ExtraSpecs::from_bootstrap(&params).is_err());
    }

    #[test]
    fn test_extra_specs_absent_yields_defaults() {
        let mut params = bootstrap_with_specs(json!({}));
        params.extra_specs = None;
        let specs = ExtraSpecs::from_bootstrap(&params).unwrap();
        assert!(specs.allocate_public_ip.is_none());
        assert!(specs.open_inbound_ports.is_none());
    }

    #[test]
    fn test_os_arch_from_str() {
        assert_eq!("amd64".parse::<OsArch>().unwrap(), OsArch::Amd64);
        assert_eq!("x86_64".parse::<OsArch>().unwrap(), OsArch::Amd64);
        assert_eq!("arm64".parse::<OsArch>().unwrap(), OsArch::Arm64);
        assert!("mips".parse::<OsArch>().is_err());
    }

    #[test]
    fn test_instance_status_serialization() {
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Deleting).unwrap(),
            "\"deleting\""
        );
    }

    #[test]
    fn test_build_tags_includes_controller_and_pool() {
        let tags = build_tags(
            "ctrl-1",
            "pool-1",
            OsType::Linux,
            OsArch::Amd64,
            "22_04-lts-gen2",
            "latest",
        );
        assert_eq!(tags.get(tags::CONTROLLER_ID).unwrap(), "ctrl-1");
        assert_eq!(tags.get(tags::POOL_ID).unwrap(), "pool-1");
        assert_eq!(tags.get(tags::OS_ARCH).unwrap(), "amd64");
    }
}
