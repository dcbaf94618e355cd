//! Well-known label keys and selectors

use std::collections::BTreeMap;

/// Label identifying which provisioner owns an object
pub const PROVISIONER_LABEL: &str = "hobbyfarm.io/provisioner";

/// Label tying a provisioned object (secret, instance) to its VirtualMachine
pub const VIRTUAL_MACHINE_LABEL: &str = "provisioning.hobbyfarm.io/virtual-machine";

/// Labels marking an object as belonging to the named VirtualMachine
pub fn vm_labels(vm_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(VIRTUAL_MACHINE_LABEL.to_string(), vm_name.to_string())])
}

/// Label selector matching objects that belong to the named VirtualMachine
///
/// Suitable for `ListParams::labels`.
pub fn vm_label_selector(vm_name: &str) -> String {
    format!("{}={}", VIRTUAL_MACHINE_LABEL, vm_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_labels() {
        let labels = vm_labels("vm-abc123");
        let (key, value) = labels.iter().next().unwrap();
        assert_eq!(vm_label_selector("vm-abc123"), format!("{}={}", key, value));
    }

    #[test]
    fn selector_format() {
        assert_eq!(
            vm_label_selector("vm-1"),
            "provisioning.hobbyfarm.io/virtual-machine=vm-1"
        );
    }
}
