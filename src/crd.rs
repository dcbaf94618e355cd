//! Orchestrator resources read by provisioner controllers
//!
//! These types are owned by the orchestrator, which installs their CRDs.
//! Only the fields provisioners consume are modelled; unknown fields are
//! ignored on read.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A virtual machine requested by the orchestrator and realized by a provisioner.
///
/// Example:
/// ```yaml
/// apiVersion: hobbyfarm.io/v1
/// kind: VirtualMachine
/// metadata:
///   name: vm-abc123
/// spec:
///   vm_template_id: ubuntu-22
///   user: u-42
/// status:
///   environment_id: aws-us-east
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hobbyfarm.io",
    version = "v1",
    kind = "VirtualMachine",
    namespaced,
    status = "VirtualMachineStatus"
)]
pub struct VirtualMachineSpec {
    /// Template this machine was created from
    #[serde(default)]
    pub vm_template_id: String,

    /// Owning user
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    /// Username for SSH access
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_username: String,
}

/// Observed state of a VirtualMachine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VirtualMachineStatus {
    /// Environment the machine is placed in
    #[serde(default)]
    pub environment_id: String,

    /// Public address once provisioned
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_ip: String,

    /// Private address once provisioned
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_ip: String,
}

/// An environment: a provider account plus provisioning configuration.
///
/// Config lookups check `template_mapping[<template>]` first and fall back
/// to `environment_specifics`.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(group = "hobbyfarm.io", version = "v1", kind = "Environment", namespaced)]
pub struct EnvironmentSpec {
    /// Provider that realizes machines in this environment
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,

    /// Per-template config items, keyed by template id
    #[serde(default)]
    pub template_mapping: BTreeMap<String, BTreeMap<String, String>>,

    /// Environment-wide config items
    #[serde(default)]
    pub environment_specifics: BTreeMap<String, String>,
}

impl VirtualMachine {
    /// Environment id from status, if set
    pub fn environment_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.environment_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn virtual_machine_reads_orchestrator_json() {
        let vm: VirtualMachine = serde_json::from_value(serde_json::json!({
            "apiVersion": "hobbyfarm.io/v1",
            "kind": "VirtualMachine",
            "metadata": {"name": "vm-abc123", "namespace": "hobbyfarm"},
            "spec": {"vm_template_id": "ubuntu-22", "user": "u-42", "bind_mode": "dynamic"},
            "status": {"environment_id": "aws-us-east", "status": "readyforprovisioning"}
        }))
        .unwrap();

        assert_eq!(vm.spec.vm_template_id, "ubuntu-22");
        assert_eq!(vm.environment_id(), Some("aws-us-east"));
    }

    #[test]
    fn empty_environment_id_is_none() {
        let mut vm = VirtualMachine::new("vm-1", VirtualMachineSpec::default());
        assert_eq!(vm.environment_id(), None);
        vm.status = Some(VirtualMachineStatus::default());
        assert_eq!(vm.environment_id(), None);
    }

    #[test]
    fn api_groups() {
        assert_eq!(VirtualMachine::group(&()), "hobbyfarm.io");
        assert_eq!(VirtualMachine::kind(&()), "VirtualMachine");
        assert_eq!(Environment::kind(&()), "Environment");
        assert_eq!(Environment::version(&()), "v1");
    }
}
