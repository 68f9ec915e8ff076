//! Translation between provider-native VM records and the normalized
//! instance form returned to the orchestrator.

use crate::client::VirtualMachine;
use crate::error::{Error, Result};
use crate::params::{tags, InstanceStatus, OsArch, OsType, ProviderInstance};

/// Translates a VM record into the normalized instance form.
///
/// OS metadata comes from the tags written at creation time; a record
/// missing its name cannot be addressed later and is rejected outright.
pub fn vm_to_instance(vm: &VirtualMachine) -> Result<ProviderInstance> {
    let name = vm
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::Translation("instance record has no name".to_string()))?;

    let os_type = match vm.tags.get(tags::OS_TYPE).map(String::as_str) {
        Some("windows") => OsType::Windows,
        _ => OsType::Linux,
    };
    let os_arch = vm
        .tags
        .get(tags::OS_ARCH)
        .and_then(|v| v.parse().ok())
        .unwrap_or(OsArch::Amd64);
    let os_name = vm.tags.get(tags::OS_NAME).cloned().unwrap_or_default();
    let os_version = vm.tags.get(tags::OS_VERSION).cloned().unwrap_or_default();

    Ok(ProviderInstance {
        provider_id: name.to_string(),
        name: name.to_string(),
        os_type,
        os_arch,
        os_name,
        os_version,
        status: vm_status(vm),
        addresses: Vec::new(),
    })
}

/// Derives the lifecycle status of a VM record.
///
/// The instance view's power state wins when present; otherwise the ARM
/// provisioning state decides, and anything unrecognized maps to unknown.
fn vm_status(vm: &VirtualMachine) -> InstanceStatus {
    let properties = match &vm.properties {
        Some(p) => p,
        None => return InstanceStatus::Unknown,
    };

    if let Some(view) = &properties.instance_view {
        for status in &view.statuses {
            match status.code.as_deref() {
                Some("PowerState/running") => return InstanceStatus::Running,
                Some("PowerState/stopped") | Some("PowerState/deallocated") => {
                    return InstanceStatus::Stopped
                }
                _ => {}
            }
        }
    }

    // "Succeeded" alone says nothing about power state, so without an
    // instance view it stays unknown rather than guessing running.
    match properties.provisioning_state.as_deref() {
        Some("Deleting") => InstanceStatus::Deleting,
        Some("Failed") => InstanceStatus::Error,
        _ => InstanceStatus::Unknown,
    }
}
