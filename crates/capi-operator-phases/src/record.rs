//! Installed-provider records
//!
//! Each installed provider is tracked by a clusterctl inventory object
//! (`clusterctl.cluster.x-k8s.io/v1alpha3`, kind `Provider`) named after the
//! provider with a kind prefix. Its version is what upgrade detection
//! compares against.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::debug;

use capi_operator_common::crd::ProviderKind;
use capi_operator_common::kube_utils::build_api_resource;
use capi_operator_common::{Error, CLUSTERCTL_LABEL, FIELD_MANAGER, PROVIDER_LABEL};

/// API version of inventory records
pub const RECORD_API_VERSION: &str = "clusterctl.cluster.x-k8s.io/v1alpha3";
/// Kind of inventory records
pub const RECORD_KIND: &str = "Provider";
/// Plural of inventory records
pub const RECORD_PLURAL: &str = "providers";

/// Names a provider installation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderIdentity {
    /// Kind-prefixed record name, e.g. `infrastructure-aws`
    pub name: String,
    /// Namespace the provider is installed in
    pub namespace: String,
    /// Unprefixed provider name, e.g. `aws`
    pub provider_name: String,
    /// Provider kind
    pub kind: ProviderKind,
}

/// The identity of a provider installation.
///
/// Both upgrade detection and deletion go through here so the two can never
/// disagree on the record name.
pub fn identity_for(kind: ProviderKind, name: &str, namespace: &str) -> ProviderIdentity {
    ProviderIdentity {
        name: format!("{}{}", kind.identity_prefix(), name),
        namespace: namespace.to_string(),
        provider_name: name.to_string(),
        kind,
    }
}

/// What is currently installed for an identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderRecord {
    /// Which installation this is
    pub identity: ProviderIdentity,
    /// Installed version; empty when an install never completed
    pub version: String,
}

/// Persistence for installed-provider records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderRecordStore: Send + Sync {
    /// The record for `identity`; `None` when nothing is installed
    async fn get(&self, identity: &ProviderIdentity) -> Result<Option<ProviderRecord>, Error>;

    /// Create or overwrite a record
    async fn upsert(&self, record: &ProviderRecord) -> Result<(), Error>;

    /// Remove a record; removing a missing record succeeds
    async fn delete(&self, identity: &ProviderIdentity) -> Result<(), Error>;
}

/// [`ProviderRecordStore`] over clusterctl inventory objects
pub struct KubeProviderRecordStore {
    client: Client,
    api_resource: ApiResource,
}

impl KubeProviderRecordStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            api_resource: build_api_resource(RECORD_API_VERSION, RECORD_KIND, RECORD_PLURAL),
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.api_resource)
    }
}

#[async_trait]
impl ProviderRecordStore for KubeProviderRecordStore {
    async fn get(&self, identity: &ProviderIdentity) -> Result<Option<ProviderRecord>, Error> {
        let Some(obj) = self.api(&identity.namespace).get_opt(&identity.name).await? else {
            return Ok(None);
        };
        let version = obj
            .data
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Some(ProviderRecord {
            identity: identity.clone(),
            version,
        }))
    }

    async fn upsert(&self, record: &ProviderRecord) -> Result<(), Error> {
        let identity = &record.identity;
        let obj = json!({
            "apiVersion": RECORD_API_VERSION,
            "kind": RECORD_KIND,
            "metadata": {
                "name": identity.name,
                "namespace": identity.namespace,
                "labels": {
                    PROVIDER_LABEL: identity.name,
                    CLUSTERCTL_LABEL: "",
                },
            },
            "providerName": identity.provider_name,
            "type": identity.kind.as_str(),
            "version": record.version,
        });
        self.api(&identity.namespace)
            .patch(
                &identity.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&obj),
            )
            .await?;
        debug!(record = %identity.name, version = %record.version, "upserted provider record");
        Ok(())
    }

    async fn delete(&self, identity: &ProviderIdentity) -> Result<(), Error> {
        match self
            .api(&identity.namespace)
            .delete(&identity.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
