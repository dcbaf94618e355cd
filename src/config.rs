//! Hierarchical configuration lookup
//!
//! Provisioners read settings such as instance size, image, or password from
//! the orchestrator's Environment objects. Lookup goes from most to least
//! specific:
//!
//! 1. `template_mapping[<vm template id>][<item>]`
//! 2. `environment_specifics[<item>]`

use async_trait::async_trait;
use kube::api::Api;
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Environment, VirtualMachine};
use crate::{Error, Result};

/// Read access to the objects config lookup depends on.
///
/// Allows mocking the Kubernetes client in tests while using the real
/// client in production. `Ok(None)` means the object does not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Get a VirtualMachine by namespace and name
    async fn get_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>>;

    /// Get an Environment by namespace and name
    async fn get_environment(&self, namespace: &str, name: &str) -> Result<Option<Environment>>;
}

/// Real Kubernetes implementation
pub struct KubeConfigSource {
    client: Client,
}

impl KubeConfigSource {
    /// Create a new KubeConfigSource wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigSource for KubeConfigSource {
    async fn get_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>> {
        let api: Api<VirtualMachine> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_environment(&self, namespace: &str, name: &str) -> Result<Option<Environment>> {
        let api: Api<Environment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

/// Look up a config item in an environment for the given template.
///
/// Template-specific values shadow environment-wide ones.
pub fn lookup_config_item<'a>(env: &'a Environment, template_id: &str, item: &str) -> Option<&'a str> {
    env.spec
        .template_mapping
        .get(template_id)
        .and_then(|items| items.get(item))
        .or_else(|| env.spec.environment_specifics.get(item))
        .map(String::as_str)
}

/// Resolve a config item for a VirtualMachine.
///
/// The machine's Environment is read from the machine's namespace.
///
/// # Errors
/// - `Error::NotFound` if the machine has no environment or it does not exist
/// - `Error::ConfigItem` if neither level defines `item`
pub async fn resolve_config_item(
    source: &dyn ConfigSource,
    vm: &VirtualMachine,
    item: &str,
) -> Result<String> {
    let vm_name = vm.name_any();
    let namespace = vm.namespace().unwrap_or_default();
    let env_id = vm
        .environment_id()
        .ok_or_else(|| Error::not_found("Environment", format!("(unset on {})", vm_name)))?;

    let env = source
        .get_environment(&namespace, env_id)
        .await?
        .ok_or_else(|| Error::not_found("Environment", env_id))?;

    let value = lookup_config_item(&env, &vm.spec.vm_template_id, item).ok_or_else(|| {
        Error::config_item(
            item,
            format!(
                "not set for template {} or in environment {}",
                vm.spec.vm_template_id, env_id
            ),
        )
    })?;

    debug!(vm = %vm_name, environment = %env_id, item, "Resolved config item");
    Ok(value.to_string())
}

/// Resolve a config item for a VirtualMachine given only its name.
///
/// # Errors
/// `Error::NotFound` if the machine does not exist, plus everything
/// [`resolve_config_item`] returns.
pub async fn resolve_config_item_by_name(
    source: &dyn ConfigSource,
    namespace: &str,
    vm_name: &str,
    item: &str,
) -> Result<String> {
    let vm = source
        .get_virtual_machine(namespace, vm_name)
        .await?
        .ok_or_else(|| Error::not_found("VirtualMachine", vm_name))?;

    resolve_config_item(source, &vm, item).await
}
