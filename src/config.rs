//! Configuration for the Azure runner provider.
//!
//! Configuration is loaded once at construction time from a TOML file, with
//! credential fields optionally filled from the conventional `AZURE_*`
//! environment variables. Per-request overrides arrive separately as
//! [`ExtraSpecs`](crate::params::ExtraSpecs); this module only holds the
//! defaults they override.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Service-principal credentials for the Azure AD client-credentials flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Azure AD tenant ID (env fallback: AZURE_TENANT_ID)
    pub tenant_id: String,
    /// Service principal client ID (env fallback: AZURE_CLIENT_ID)
    pub client_id: String,
    /// Service principal secret (env fallback: AZURE_CLIENT_SECRET)
    pub client_secret: String,
}

impl Credentials {
    fn fill_from_env(&mut self) {
        if self.tenant_id.is_empty() {
            if let Ok(v) = std::env::var("AZURE_TENANT_ID") {
                self.tenant_id = v;
            }
        }
        if self.client_id.is_empty() {
            if let Ok(v) = std::env::var("AZURE_CLIENT_ID") {
                self.client_id = v;
            }
        }
        if self.client_secret.is_empty() {
            if let Ok(v) = std::env::var("AZURE_CLIENT_SECRET") {
                self.client_secret = v;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.tenant_id.is_empty() {
            return Err(Error::Config(
                "missing tenant_id (set credentials.tenant_id or AZURE_TENANT_ID)".to_string(),
            ));
        }
        if self.client_id.is_empty() {
            return Err(Error::Config(
                "missing client_id (set credentials.client_id or AZURE_CLIENT_ID)".to_string(),
            ));
        }
        if self.client_secret.is_empty() {
            return Err(Error::Config(
                "missing client_secret (set credentials.client_secret or AZURE_CLIENT_SECRET)"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Azure subscription scoping every resource this provider creates
    pub subscription_id: String,

    /// Azure region for all resources (e.g. "westeurope")
    pub location: String,

    /// Service principal credentials
    pub credentials: Credentials,

    /// Default VM size when a pool does not specify a flavor override
    pub default_vm_size: String,

    /// Default image reference (URN or resource id)
    pub default_image: String,

    /// CIDR of the per-instance virtual network
    pub virtual_network_cidr: String,

    /// Back OS disks with VM-local ephemeral storage by default
    pub use_ephemeral_storage: bool,

    /// Enable accelerated networking on NICs by default
    pub use_accelerated_networking: bool,

    /// Allocate a public IP per instance by default
    pub allocate_public_ip: bool,

    /// Provision confidential VMs by default
    pub confidential: bool,

    /// Inbound TCP ports opened in every instance's security group
    pub open_inbound_ports: Vec<u16>,

    /// Managed disk storage account type used when ephemeral storage is off
    pub storage_account_type: String,

    /// Admin username baked into the VM's OS profile
    pub admin_username: String,

    /// SSH public keys authorized on every instance
    pub ssh_public_keys: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            location: String::new(),
            credentials: Credentials::default(),
            default_vm_size: "Standard_D2s_v3".to_string(),
            default_image: String::new(),
            virtual_network_cidr: "10.10.0.0/16".to_string(),
            use_ephemeral_storage: false,
            use_accelerated_networking: false,
            allocate_public_ip: false,
            confidential: false,
            open_inbound_ports: vec![22],
            storage_account_type: "Standard_LRS".to_string(),
            admin_username: "runner".to_string(),
            ssh_public_keys: vec![],
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file, fills credential gaps from the
    /// environment, and validates the result.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        let mut config: Config = toml::from_str(&raw)?;
        config.credentials.fill_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Validates required fields. Called by [`Config::from_file`]; exposed
    /// for programmatically constructed configs.
    pub fn validate(&self) -> Result<()> {
        if self.subscription_id.is_empty() {
            return Err(Error::Config("missing subscription_id".to_string()));
        }
        if self.location.is_empty() {
            return Err(Error::Config("missing location".to_string()));
        }
        if self.virtual_network_cidr.is_empty() {
            return Err(Error::Config("missing virtual_network_cidr".to_string()));
        }
        self.credentials.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            subscription_id: "sub-123".to_string(),
            location: "westeurope".to_string(),
            credentials: Credentials {
                tenant_id: "tenant".to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_subscription_fails() {
        let mut config = valid_config();
        config.subscription_id.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("subscription_id"));
    }

    #[test]
    fn test_empty_cidr_fails() {
        let mut config = valid_config();
        config.virtual_network_cidr.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_credentials_fail() {
        let mut config = valid_config();
        config.credentials.client_secret.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client_secret"));
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
subscription_id = "sub-123"
location = "westeurope"
default_image = "Canonical:0001-com-ubuntu-server-jammy:22_04-lts-gen2:latest"
use_ephemeral_storage = true
open_inbound_ports = [22, 443]

[credentials]
tenant_id = "tenant"
client_id = "client"
client_secret = "secret"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.subscription_id, "sub-123");
        assert!(config.use_ephemeral_storage);
        assert_eq!(config.open_inbound_ports, vec![22, 443]);
        // Untouched fields keep their defaults.
        assert_eq!(config.virtual_network_cidr, "10.10.0.0/16");
        assert_eq!(config.admin_username, "runner");
    }

    #[test]
    fn test_from_file_missing_file() {
        let err = Config::from_file("/nonexistent/provider.toml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
