//! Cluster reads needed while loading a provider: the variables Secret and
//! component ConfigMaps

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::debug;

use capi_operator_common::Error;

/// Read access to Secrets and ConfigMaps by namespaced name
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Secret data decoded as UTF-8 strings. A missing Secret is `NotFound`.
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, Error>;

    /// A ConfigMap by name. A missing ConfigMap is `NotFound`.
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, Error>;

    /// ConfigMaps in `namespace` matching a label selector string
    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>, Error>;
}

/// [`ConfigSource`] backed by the Kubernetes API
pub struct KubeConfigSource {
    client: Client,
}

impl KubeConfigSource {
    /// Create a source using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigSource for KubeConfigSource {
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get_opt(name)
            .await?
            .ok_or_else(|| Error::not_found("Secret", format!("{}/{}", namespace, name)))?;

        let data = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
            .collect::<BTreeMap<_, _>>();
        debug!(namespace = %namespace, name = %name, keys = data.len(), "loaded variables secret");
        Ok(data)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await?
            .ok_or_else(|| Error::not_found("ConfigMap", format!("{}/{}", namespace, name)))
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }
}
