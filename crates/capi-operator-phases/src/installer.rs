//! Applying and removing provider components
//!
//! The [`Installer`] trait is the seam between the phase pipeline and the
//! cluster. [`KubeInstaller`] applies rendered objects with server-side apply,
//! waits for their Deployments, and removes everything labelled for a
//! provider identity on deletion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PropagationPolicy};
use kube::discovery::{verbs, ApiResource, Scope};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};
use tracing::{debug, info};

use capi_operator_common::kube_utils::{apply_objects, run_discovery, wait_for_deployments};
use capi_operator_common::{Error, PROVIDER_LABEL};

use crate::components::Components;
use crate::record::{ProviderRecord, ProviderRecordStore, RECORD_KIND, RECORD_PLURAL};

/// Which shared objects deletion leaves in place
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete the provider's Namespace
    pub include_namespace: bool,
    /// Delete CustomResourceDefinitions
    pub include_crds: bool,
}

/// Applies and removes provider components in the target cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Installer: Send + Sync {
    /// Make sure resource types the installer relies on exist
    async fn ensure_prerequisites(&self) -> Result<(), Error>;

    /// Apply `components` and record them as installed.
    ///
    /// Fails with [`Error::InstallTimeout`] when Deployments don't become
    /// available in time.
    async fn install(&self, components: &Components) -> Result<(), Error>;

    /// Remove everything installed for `record`
    async fn delete(&self, record: &ProviderRecord, options: &DeleteOptions) -> Result<(), Error>;
}

/// [`Installer`] backed by the Kubernetes API
pub struct KubeInstaller {
    client: Client,
    records: Arc<dyn ProviderRecordStore>,
    install_timeout: Duration,
}

impl KubeInstaller {
    /// Create an installer that records installs in `records`
    pub fn new(client: Client, records: Arc<dyn ProviderRecordStore>, install_timeout: Duration) -> Self {
        Self {
            client,
            records,
            install_timeout,
        }
    }

    async fn delete_labelled(
        &self,
        api_resource: &ApiResource,
        namespaced: bool,
        selector: &str,
    ) -> Result<usize, kube::Error> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), api_resource);
        let objects = api.list(&ListParams::default().labels(selector)).await?;

        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        let mut deleted = 0;
        for obj in objects {
            let Some(name) = obj.metadata.name.as_deref() else {
                continue;
            };
            let api: Api<DynamicObject> = match (namespaced, obj.metadata.namespace.as_deref()) {
                (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, api_resource),
                _ => Api::all_with(self.client.clone(), api_resource),
            };
            match api.delete(name, &params).await {
                Ok(_) => deleted += 1,
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl Installer for KubeInstaller {
    async fn ensure_prerequisites(&self) -> Result<(), Error> {
        apply_objects(&self.client, &[inventory_crd()]).await?;
        debug!("ensured provider inventory CRD");
        Ok(())
    }

    async fn install(&self, components: &Components) -> Result<(), Error> {
        let identity = components.identity();
        let provider = identity.provider_name.as_str();

        apply_objects(&self.client, components.objects())
            .await
            .map_err(|e| Error::install(provider, e.to_string()))?;

        let deployments = components.deployments();
        wait_for_deployments(&self.client, &deployments, self.install_timeout)
            .await
            .map_err(|e| Error::install_timeout(provider, e.to_string()))?;

        self.records
            .upsert(&ProviderRecord {
                identity: identity.clone(),
                version: components.version().to_string(),
            })
            .await
            .map_err(|e| Error::install(provider, format!("failed to record install: {}", e)))?;

        info!(
            provider = %identity.name,
            namespace = %identity.namespace,
            version = %components.version(),
            objects = components.objects().len(),
            "installed provider components"
        );
        Ok(())
    }

    async fn delete(&self, record: &ProviderRecord, options: &DeleteOptions) -> Result<(), Error> {
        let identity = &record.identity;
        let provider = identity.provider_name.as_str();
        let selector = format!("{}={}", PROVIDER_LABEL, identity.name);

        let discovery = run_discovery(&self.client)
            .await
            .map_err(|e| Error::deletion(provider, e.to_string()))?;

        let mut deleted = 0;
        for group in discovery.groups() {
            for (api_resource, caps) in group.recommended_resources() {
                if !caps.supports_operation(verbs::LIST) || !caps.supports_operation(verbs::DELETE) {
                    continue;
                }
                if !should_delete_kind(&api_resource.kind, options) {
                    continue;
                }
                let namespaced = caps.scope == Scope::Namespaced;
                deleted += self
                    .delete_labelled(&api_resource, namespaced, &selector)
                    .await
                    .map_err(|e| {
                        Error::deletion(
                            provider,
                            format!("failed to delete {}: {}", api_resource.plural, e),
                        )
                    })?;
            }
        }

        self.records
            .delete(identity)
            .await
            .map_err(|e| Error::deletion(provider, format!("failed to remove record: {}", e)))?;

        info!(
            provider = %identity.name,
            version = %record.version,
            deleted,
            "deleted provider components"
        );
        Ok(())
    }
}

/// Whether deletion touches objects of `kind`.
///
/// Inventory records are removed through the record store, never by label.
fn should_delete_kind(kind: &str, options: &DeleteOptions) -> bool {
    match kind {
        "Namespace" => options.include_namespace,
        "CustomResourceDefinition" => options.include_crds,
        RECORD_KIND => false,
        "Event" => false,
        _ => true,
    }
}

/// CRD for the clusterctl inventory the record store writes to
fn inventory_crd() -> Value {
    let version_schema = json!({
        "type": "object",
        "properties": {
            "providerName": {"type": "string"},
            "type": {"type": "string"},
            "version": {"type": "string"},
            "watchedNamespace": {"type": "string"},
        },
        "x-kubernetes-preserve-unknown-fields": true,
    });
    json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {
            "name": format!("{}.clusterctl.cluster.x-k8s.io", RECORD_PLURAL),
            "labels": {
                "clusterctl.cluster.x-k8s.io/core": "inventory",
            },
        },
        "spec": {
            "group": "clusterctl.cluster.x-k8s.io",
            "names": {
                "kind": RECORD_KIND,
                "listKind": "ProviderList",
                "plural": RECORD_PLURAL,
                "singular": "provider",
            },
            "scope": "Namespaced",
            "versions": [{
                "name": "v1alpha3",
                "served": true,
                "storage": true,
                "schema": {"openAPIV3Schema": version_schema},
                "additionalPrinterColumns": [
                    {"name": "Type", "type": "string", "jsonPath": ".type"},
                    {"name": "Provider", "type": "string", "jsonPath": ".providerName"},
                    {"name": "Version", "type": "string", "jsonPath": ".version"},
                ],
            }],
        },
    })
}
