//! Error types for the Azure runner provider.
//!
//! This module defines the error types used throughout the provider, keeping
//! the failure taxonomy explicit: validation and capacity errors fail fast
//! before any cloud resource is touched, provisioning errors name the
//! pipeline step that failed, and not-found conditions stay distinguishable
//! so idempotent deletion can normalize them.

use thiserror::Error;

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A step of the instance provisioning pipeline.
///
/// Used to label [`Error::Provisioning`] so callers can tell which cloud
/// resource creation failed without parsing message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    /// Resource group creation (the rollback boundary).
    ResourceGroup,
    /// Virtual network creation.
    VirtualNetwork,
    /// Subnet creation.
    Subnet,
    /// Public IP allocation.
    PublicIp,
    /// Network security group creation.
    SecurityGroup,
    /// Network interface creation.
    NetworkInterface,
    /// Virtual machine creation.
    VirtualMachine,
}

impl std::fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProvisioningStep::ResourceGroup => "resource group",
            ProvisioningStep::VirtualNetwork => "virtual network",
            ProvisioningStep::Subnet => "subnet",
            ProvisioningStep::PublicIp => "public IP",
            ProvisioningStep::SecurityGroup => "network security group",
            ProvisioningStep::NetworkInterface => "network interface",
            ProvisioningStep::VirtualMachine => "virtual machine",
        };
        f.write_str(name)
    }
}

/// The main error type for the Azure runner provider.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Validation Errors (fail fast, no resources touched)
    // ========================================================================
    /// The bootstrap request asked for an architecture this provider does
    /// not support.
    #[error("invalid architecture {requested} (supported: {supported})")]
    UnsupportedArchitecture {
        /// Architecture the caller asked for
        requested: String,
        /// The single supported architecture
        supported: String,
    },

    /// A required field of the provisioning spec is missing or malformed.
    #[error("invalid provisioning spec: {0}")]
    InvalidSpec(String),

    /// The requested disk size exceeds the VM size's ephemeral maximum.
    #[error("maximum ephemeral disk size for {vm_size} is {max_gb} GB (requested {requested_gb})")]
    CapacityExceeded {
        /// VM size class being provisioned
        vm_size: String,
        /// Maximum usable ephemeral disk size in GB (after overhead)
        max_gb: u32,
        /// Size the spec asked for in GB
        requested_gb: u32,
    },

    // ========================================================================
    // Provisioning Errors (trigger compensating rollback)
    // ========================================================================
    /// A cloud operation failed partway through instance creation. The
    /// resource group has been deleted (best-effort) before this is returned.
    #[error("failed to create {step}: {source}")]
    Provisioning {
        /// Pipeline step that failed
        step: ProvisioningStep,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },

    // ========================================================================
    // Translation Errors
    // ========================================================================
    /// A provider-native instance record could not be translated into the
    /// normalized form (missing fields, null list entries).
    #[error("failed to translate instance record: {0}")]
    Translation(String),

    // ========================================================================
    // Cloud API Errors
    // ========================================================================
    /// The requested resource does not exist. Normalized to success by
    /// idempotent deletion.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The Azure API rejected a request.
    #[error("azure API error (status {status}): {message}")]
    Api {
        /// HTTP status code returned by the API
        status: u16,
        /// Error body excerpt
        message: String,
    },

    /// Authentication against Azure AD failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transport-level HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a provisioning error for the given pipeline step.
    pub fn provisioning(step: ProvisioningStep, source: Error) -> Self {
        Self::Provisioning {
            step,
            source: Box::new(source),
        }
    }

    /// Returns the failing pipeline step if this is a provisioning error.
    pub fn provisioning_step(&self) -> Option<ProvisioningStep> {
        match self {
            Error::Provisioning { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Returns true if this error represents a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_error_message() {
        let err = Error::CapacityExceeded {
            vm_size: "Standard_D2s_v3".to_string(),
            max_gb: 64,
            requested_gb: 100,
        };
        assert_eq!(
            err.to_string(),
            "maximum ephemeral disk size for Standard_D2s_v3 is 64 GB (requested 100)"
        );
    }

    #[test]
    fn test_provisioning_error_names_step() {
        let err = Error::provisioning(
            ProvisioningStep::NetworkInterface,
            Error::Api {
                status: 409,
                message: "conflict".to_string(),
            },
        );
        assert_eq!(
            err.provisioning_step(),
            Some(ProvisioningStep::NetworkInterface)
        );
        assert!(err.to_string().starts_with("failed to create network interface"));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(Error::NotFound("rg".to_string()).is_not_found());
        assert!(!Error::Translation("x".to_string()).is_not_found());
    }

    #[test]
    fn test_unsupported_architecture_message() {
        let err = Error::UnsupportedArchitecture {
            requested: "arm64".to_string(),
            supported: "amd64".to_string(),
        };
        assert_eq!(err.to_string(), "invalid architecture arm64 (supported: amd64)");
    }
}
