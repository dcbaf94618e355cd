//! Installation instance id
//!
//! Every installation carries a stable id, stored in a ConfigMap, that
//! provisioners stamp onto external resources (cloud tags, DNS records) so
//! they can tell their own resources apart from another installation's.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, PostParams};
use kube::core::ObjectMeta;
use kube::Client;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Name of the ConfigMap holding the instance id
pub const INSTANCE_ID_CONFIG_MAP: &str = "hobbyfarm-instance-id";

/// Data key of the instance id within the ConfigMap
pub const INSTANCE_ID_KEY: &str = "instance-id";

/// ConfigMap operations needed to manage the instance id
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigMapClient: Send + Sync {
    /// Get a ConfigMap, `Ok(None)` if it does not exist
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Create a ConfigMap
    ///
    /// Fails with `Error::AlreadyExists` if another writer created it first.
    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()>;
}

/// Real Kubernetes implementation
pub struct KubeConfigMapClient {
    client: Client,
}

impl KubeConfigMapClient {
    /// Create a new KubeConfigMapClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigMapClient for KubeConfigMapClient {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), config_map).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::already_exists(
                "ConfigMap",
                config_map.metadata.name.clone().unwrap_or_default(),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read the instance id.
///
/// # Errors
/// - `Error::NotFound` if the ConfigMap does not exist
/// - `Error::Validation` if it exists without an `instance-id` key
pub async fn get_instance_id(client: &dyn ConfigMapClient, namespace: &str) -> Result<String> {
    let config_map = client
        .get_config_map(namespace, INSTANCE_ID_CONFIG_MAP)
        .await?
        .ok_or_else(|| Error::not_found("ConfigMap", INSTANCE_ID_CONFIG_MAP))?;

    config_map
        .data
        .as_ref()
        .and_then(|data| data.get(INSTANCE_ID_KEY))
        .cloned()
        .ok_or_else(|| {
            Error::validation_for_field(
                format!("data.{}", INSTANCE_ID_KEY),
                format!("key {} not found in instance configmap", INSTANCE_ID_KEY),
            )
        })
}

/// Read the instance id, creating it on first use.
///
/// Two controllers starting at once may both try to create the ConfigMap;
/// the loser re-reads and adopts the winner's id.
pub async fn get_or_create_instance_id(
    client: &dyn ConfigMapClient,
    namespace: &str,
) -> Result<String> {
    match get_instance_id(client, namespace).await {
        Ok(id) => return Ok(id),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let id = uuid::Uuid::new_v4().to_string();
    match client
        .create_config_map(namespace, &instance_id_config_map(namespace, &id))
        .await
    {
        Ok(()) => {
            info!(namespace, instance_id = %id, "Created instance id");
            Ok(id)
        }
        Err(e) if e.is_already_exists() => {
            warn!(namespace, "Instance id created concurrently, adopting existing value");
            get_instance_id(client, namespace).await
        }
        Err(e) => Err(e),
    }
}

/// Build the ConfigMap that stores `id`
pub fn instance_id_config_map(namespace: &str, id: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(INSTANCE_ID_CONFIG_MAP.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(INSTANCE_ID_KEY.to_string(), id.to_string())])),
        ..Default::default()
    }
}
