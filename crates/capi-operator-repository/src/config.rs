//! Provider registry and configuration variables
//!
//! [`ConfigClient`] bundles the variables loaded from a provider's Secret
//! with the registry of known providers. The registry starts from the
//! well-known Cluster API providers; a provider's `fetchConfig.url`
//! registers or overrides its own entry.

use std::collections::BTreeMap;

use capi_operator_common::crd::ProviderKind;
use capi_operator_common::Error;

/// Where one provider's releases live
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Provider name (e.g. "aws", "kubeadm", "cluster-api")
    pub name: String,
    /// Provider kind
    pub kind: ProviderKind,
    /// Release URL
    pub url: String,
}

impl ProviderConfig {
    /// Label used for installed objects and records, e.g. `infrastructure-aws`
    pub fn manifest_label(&self) -> String {
        format!("{}{}", self.kind.identity_prefix(), self.name)
    }
}

const CAPI: &str = "https://github.com/kubernetes-sigs/cluster-api/releases/latest";

const BUILTIN_PROVIDERS: &[(&str, ProviderKind, &str)] = &[
    ("cluster-api", ProviderKind::Core, "core-components.yaml"),
    ("kubeadm", ProviderKind::Bootstrap, "bootstrap-components.yaml"),
    ("kubeadm", ProviderKind::ControlPlane, "control-plane-components.yaml"),
    ("docker", ProviderKind::Infrastructure, "infrastructure-components-development.yaml"),
];

const BUILTIN_EXTERNAL: &[(&str, ProviderKind, &str)] = &[
    ("talos", ProviderKind::Bootstrap, "https://github.com/siderolabs/cluster-api-bootstrap-provider-talos/releases/latest/bootstrap-components.yaml"),
    ("talos", ProviderKind::ControlPlane, "https://github.com/siderolabs/cluster-api-control-plane-provider-talos/releases/latest/control-plane-components.yaml"),
    ("microk8s", ProviderKind::Bootstrap, "https://github.com/canonical/cluster-api-bootstrap-provider-microk8s/releases/latest/bootstrap-components.yaml"),
    ("microk8s", ProviderKind::ControlPlane, "https://github.com/canonical/cluster-api-control-plane-provider-microk8s/releases/latest/control-plane-components.yaml"),
    ("aws", ProviderKind::Infrastructure, "https://github.com/kubernetes-sigs/cluster-api-provider-aws/releases/latest/infrastructure-components.yaml"),
    ("azure", ProviderKind::Infrastructure, "https://github.com/kubernetes-sigs/cluster-api-provider-azure/releases/latest/infrastructure-components.yaml"),
    ("gcp", ProviderKind::Infrastructure, "https://github.com/kubernetes-sigs/cluster-api-provider-gcp/releases/latest/infrastructure-components.yaml"),
    ("openstack", ProviderKind::Infrastructure, "https://github.com/kubernetes-sigs/cluster-api-provider-openstack/releases/latest/infrastructure-components.yaml"),
    ("vsphere", ProviderKind::Infrastructure, "https://github.com/kubernetes-sigs/cluster-api-provider-vsphere/releases/latest/infrastructure-components.yaml"),
    ("metal3", ProviderKind::Infrastructure, "https://github.com/metal3-io/cluster-api-provider-metal3/releases/latest/infrastructure-components.yaml"),
    ("digitalocean", ProviderKind::Infrastructure, "https://github.com/kubernetes-sigs/cluster-api-provider-digitalocean/releases/latest/infrastructure-components.yaml"),
    ("hetzner", ProviderKind::Infrastructure, "https://github.com/syself/cluster-api-provider-hetzner/releases/latest/infrastructure-components.yaml"),
    ("ibmcloud", ProviderKind::Infrastructure, "https://github.com/kubernetes-sigs/cluster-api-provider-ibmcloud/releases/latest/infrastructure-components.yaml"),
    ("kubevirt", ProviderKind::Infrastructure, "https://github.com/kubernetes-sigs/cluster-api-provider-kubevirt/releases/latest/infrastructure-components.yaml"),
    ("nutanix", ProviderKind::Infrastructure, "https://github.com/nutanix-cloud-native/cluster-api-provider-nutanix/releases/latest/infrastructure-components.yaml"),
    ("oci", ProviderKind::Infrastructure, "https://github.com/oracle/cluster-api-provider-oci/releases/latest/infrastructure-components.yaml"),
    ("packet", ProviderKind::Infrastructure, "https://github.com/kubernetes-sigs/cluster-api-provider-packet/releases/latest/infrastructure-components.yaml"),
];

/// Known providers by `(name, kind)`
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderConfig>,
}

impl ProviderRegistry {
    /// A registry holding the well-known Cluster API providers
    pub fn builtin() -> Self {
        let capi = BUILTIN_PROVIDERS
            .iter()
            .map(|(name, kind, file)| (*name, *kind, format!("{}/{}", CAPI, file)));
        let external = BUILTIN_EXTERNAL
            .iter()
            .map(|(name, kind, url)| (*name, *kind, url.to_string()));

        let providers = capi
            .chain(external)
            .map(|(name, kind, url)| ProviderConfig {
                name: name.to_string(),
                kind,
                url,
            })
            .collect();
        Self { providers }
    }

    /// Register a provider, replacing any entry with the same name and kind
    pub fn add_provider(
        &mut self,
        name: impl Into<String>,
        kind: ProviderKind,
        url: impl Into<String>,
    ) -> Result<(), Error> {
        let name = name.into();
        let url = url.into();
        if name.is_empty() {
            return Err(Error::validation("provider name must not be empty"));
        }
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(Error::validation_for_field(
                &name,
                "spec.fetchConfig.url",
                format!("invalid provider url {:?}", url),
            ));
        }

        self.providers.retain(|p| !(p.name == name && p.kind == kind));
        self.providers.push(ProviderConfig { name, kind, url });
        Ok(())
    }

    /// Configuration of a provider; unknown providers are `NotFound`
    pub fn get(&self, name: &str, kind: ProviderKind) -> Result<ProviderConfig, Error> {
        self.providers
            .iter()
            .find(|p| p.name == name && p.kind == kind)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{} provider", kind), name))
    }

    /// Every registered provider
    pub fn list(&self) -> &[ProviderConfig] {
        &self.providers
    }
}

/// Configuration variables plus the provider registry
#[derive(Clone, Debug)]
pub struct ConfigClient {
    variables: BTreeMap<String, String>,
    providers: ProviderRegistry,
}

impl ConfigClient {
    /// A client over `variables` with the built-in provider registry
    pub fn from_variables(variables: BTreeMap<String, String>) -> Self {
        Self {
            variables,
            providers: ProviderRegistry::builtin(),
        }
    }

    /// Register or override a provider's release URL
    pub fn add_provider(
        &mut self,
        name: impl Into<String>,
        kind: ProviderKind,
        url: impl Into<String>,
    ) -> Result<(), Error> {
        self.providers.add_provider(name, kind, url)
    }

    /// The provider registry
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// All configuration variables
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// A single configuration variable
    pub fn get_variable(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }
}
