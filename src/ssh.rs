//! SSH credentials for provisioned virtual machines
//!
//! Each VirtualMachine gets a Secret named `<vm>-keys`, labelled with the VM
//! label, holding a generated key pair and, when the environment configures
//! one, a password. Provisioners gate instance creation on the Secret
//! existing so the public key can be injected at boot.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::config::{resolve_config_item, ConfigSource};
use crate::crd::VirtualMachine;
use crate::labels::{vm_label_selector, VIRTUAL_MACHINE_LABEL};
use crate::{Error, Result};

/// Secret data key for the public key
pub const PUBLIC_KEY: &str = "public_key";
/// Secret data key for the private key
pub const PRIVATE_KEY: &str = "private_key";
/// Secret data key for the optional password
pub const PASSWORD: &str = "password";
/// Config item holding the VM password
pub const PASSWORD_CONFIG_ITEM: &str = "password";

/// Field manager used when applying secrets
const FIELD_MANAGER: &str = "provisioner-ssh";

/// A generated SSH key pair, both halves in OpenSSH text form
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    /// `authorized_keys` line
    pub public_key: String,
    /// PEM-encoded private key
    pub private_key: String,
}

/// Source of fresh SSH key pairs
///
/// Key generation is supplied by the provisioner.
#[cfg_attr(test, automock)]
pub trait KeyPairGenerator: Send + Sync {
    /// Generate a new key pair
    fn generate(&self) -> Result<KeyPair>;
}

/// Secret operations needed to manage VM credentials
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// List Secrets labelled for the given VM
    async fn list_vm_secrets(&self, namespace: &str, vm_name: &str) -> Result<Vec<Secret>>;

    /// Create or update a Secret via server-side apply
    async fn apply_secret(&self, secret: &Secret) -> Result<()>;
}

/// Real Kubernetes implementation
pub struct KubeSecretClient {
    client: Client,
}

impl KubeSecretClient {
    /// Create a new KubeSecretClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretClient for KubeSecretClient {
    async fn list_vm_secrets(&self, namespace: &str, vm_name: &str) -> Result<Vec<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&vm_label_selector(vm_name));
        Ok(api.list(&params).await?.items)
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<()> {
        let name = secret
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::validation_for_field("metadata.name", "secret has no name"))?;
        let namespace = secret.metadata.namespace.as_deref().ok_or_else(|| {
            Error::validation_for_field("metadata.namespace", "secret has no namespace")
        })?;

        let mut applied = secret.clone();
        applied.metadata.managed_fields = None;
        applied.metadata.resource_version = None;

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&applied),
        )
        .await?;
        Ok(())
    }
}

/// Name of the credentials Secret for a VM
pub fn vm_secret_name(vm_name: &str) -> String {
    format!("{}-keys", vm_name)
}

/// Get the credentials Secret for a VM.
///
/// If several Secrets carry the VM label, the first one listed wins.
///
/// # Errors
/// `Error::NotFound` if no labelled Secret exists.
pub async fn get_vm_secret(client: &dyn SecretClient, vm: &VirtualMachine) -> Result<Secret> {
    let vm_name = vm.name_any();
    let namespace = vm.namespace().unwrap_or_default();

    client
        .list_vm_secrets(&namespace, &vm_name)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found("Secret", format!("for VirtualMachine {}", vm_name)))
}

/// Whether the VM's credentials Secret exists.
///
/// Use as a gate before steps that need the key pair.
pub async fn vm_has_secret(client: &dyn SecretClient, vm: &VirtualMachine) -> Result<bool> {
    match get_vm_secret(client, vm).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Build the desired credentials Secret for a VM.
///
/// An existing Secret keeps its keys; otherwise a new pair is generated.
/// The password is refreshed from config on every call and left untouched
/// when no password is configured.
pub async fn build_vm_secret(
    secrets: &dyn SecretClient,
    config: &dyn ConfigSource,
    keygen: &dyn KeyPairGenerator,
    vm: &VirtualMachine,
) -> Result<Secret> {
    let vm_name = vm.name_any();

    let mut secret = match get_vm_secret(secrets, vm).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            let pair = keygen.generate()?;
            debug!(vm = %vm_name, "Generated SSH key pair");
            let mut secret = Secret::default();
            let data = secret.data.get_or_insert_with(Default::default);
            data.insert(PUBLIC_KEY.to_string(), ByteString(pair.public_key.into_bytes()));
            data.insert(PRIVATE_KEY.to_string(), ByteString(pair.private_key.into_bytes()));
            secret
        }
        Err(e) => return Err(e),
    };

    secret.metadata.name = Some(vm_secret_name(&vm_name));
    secret.metadata.namespace = vm.namespace();
    secret
        .labels_mut()
        .insert(VIRTUAL_MACHINE_LABEL.to_string(), vm_name.clone());

    match resolve_config_item(config, vm, PASSWORD_CONFIG_ITEM).await {
        Ok(password) => {
            secret
                .data
                .get_or_insert_with(Default::default)
                .insert(PASSWORD.to_string(), ByteString(password.into_bytes()));
        }
        Err(e) => debug!(vm = %vm_name, reason = %e, "No password configured"),
    }

    Ok(secret)
}

/// Ensure the VM's credentials Secret exists and is current
pub async fn reconcile_vm_secret(
    secrets: &dyn SecretClient,
    config: &dyn ConfigSource,
    keygen: &dyn KeyPairGenerator,
    vm: &VirtualMachine,
) -> Result<Secret> {
    let secret = build_vm_secret(secrets, config, keygen, vm).await?;
    secrets.apply_secret(&secret).await?;
    info!(vm = %vm.name_any(), secret = %secret.name_any(), "SSH secret applied");
    Ok(secret)
}
