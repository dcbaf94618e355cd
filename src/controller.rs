//! Provider controller runtime
//!
//! Installs a provider's CRDs using server-side apply, then runs all of its
//! controllers until every one of them has stopped.

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use crate::namespace::resolve_namespace;
use crate::provider::Provider;
use crate::{Error, Result};

/// Applies CRD definitions to the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CrdInstaller: Send + Sync {
    /// Create or update a CRD under the given field manager
    async fn apply_crd(&self, field_manager: &str, crd: &CustomResourceDefinition) -> Result<()>;
}

/// Real Kubernetes implementation
pub struct KubeCrdInstaller {
    client: Client,
}

impl KubeCrdInstaller {
    /// Create a new KubeCrdInstaller wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CrdInstaller for KubeCrdInstaller {
    async fn apply_crd(&self, field_manager: &str, crd: &CustomResourceDefinition) -> Result<()> {
        let name = crd_name(crd)?;
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let params = PatchParams::apply(field_manager).force();

        crds.patch(name, &params, &Patch::Apply(crd))
            .await
            .map_err(|e| {
                Error::internal_with_context(
                    "crd_install",
                    format!("failed to install {} CRD: {}", name, e),
                )
            })?;
        Ok(())
    }
}

/// Name of a CRD, required for server-side apply
pub fn crd_name(crd: &CustomResourceDefinition) -> Result<&str> {
    crd.metadata
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::validation_for_field("metadata.name", "CRD has no name"))
}

/// Install a set of CRDs, stopping at the first failure
pub async fn install_crds(
    installer: &dyn CrdInstaller,
    field_manager: &str,
    crds: &[CustomResourceDefinition],
) -> Result<()> {
    for crd in crds {
        let name = crd_name(crd)?;
        info!("Installing {} CRD...", name);
        installer.apply_crd(field_manager, crd).await?;
    }
    Ok(())
}

/// Runs a provider: CRD installation followed by its controllers
pub struct ProviderController<P> {
    client: Client,
    provider: P,
    namespace: String,
}

impl<P: Provider> ProviderController<P> {
    /// Create a runner in the namespace from the environment
    pub fn new(client: Client, provider: P) -> Self {
        Self {
            client,
            provider,
            namespace: resolve_namespace(),
        }
    }

    /// Override the namespace controllers operate in
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// The provider being run
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Namespace controllers operate in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Install CRDs, then run every controller to completion
    pub async fn start(self) -> Result<()> {
        let name = self.provider.name().to_string();
        info!(provider = %name, namespace = %self.namespace, "Starting provider controller");

        let installer = KubeCrdInstaller::new(self.client.clone());
        install_crds(&installer, &name, &self.provider.crds()).await?;

        let controllers = self.provider.controllers(self.client, &self.namespace);
        if controllers.is_empty() {
            warn!(provider = %name, "Provider registered no controllers");
            return Ok(());
        }

        info!(provider = %name, count = controllers.len(), "Running controllers");
        futures::future::join_all(controllers).await;
        info!(provider = %name, "Controllers stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn crd(name: Option<&str>) -> CustomResourceDefinition {
        CustomResourceDefinition {
            metadata: ObjectMeta {
                name: name.map(String::from),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn crd_name_requires_name() {
        assert_eq!(crd_name(&crd(Some("instances.aws.example.io"))).unwrap(), "instances.aws.example.io");
        assert!(crd_name(&crd(None)).is_err());
        assert!(crd_name(&crd(Some(""))).is_err());
    }

    #[tokio::test]
    async fn installs_in_order_with_provider_field_manager() {
        let mut seq = Sequence::new();
        let mut installer = MockCrdInstaller::new();
        for name in ["instances.aws.example.io", "keypairs.aws.example.io"] {
            installer
                .expect_apply_crd()
                .with(eq("aws"), eq(crd(Some(name))))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }

        let crds = vec![
            crd(Some("instances.aws.example.io")),
            crd(Some("keypairs.aws.example.io")),
        ];
        install_crds(&installer, "aws", &crds).await.unwrap();
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let mut installer = MockCrdInstaller::new();
        installer
            .expect_apply_crd()
            .times(1)
            .returning(|_, _| Err(Error::internal_with_context("crd_install", "forbidden")));

        let crds = vec![crd(Some("a.example.io")), crd(Some("b.example.io"))];
        let err = install_crds(&installer, "aws", &crds).await.unwrap_err();
        assert_eq!(err.context(), Some("crd_install"));
    }

    #[tokio::test]
    async fn nameless_crd_is_rejected_before_apply() {
        let mut installer = MockCrdInstaller::new();
        installer.expect_apply_crd().never();

        let err = install_crds(&installer, "aws", &[crd(None)]).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
