//! Provider CRDs and the kind-erased provider view
//!
//! Example:
//! ```yaml
//! apiVersion: operator.cluster.x-k8s.io/v1alpha1
//! kind: InfrastructureProvider
//! metadata:
//!   name: aws
//!   namespace: capa-system
//! spec:
//!   version: v2.4.0
//!   secretName: aws-variables
//!   deployment:
//!     replicas: 2
//!     containers:
//!       - name: manager
//!         args:
//!           feature-gates: "EKS=true"
//! ```

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements, Toleration};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::NamespaceResourceScope;
use kube::{CustomResource, CustomResourceExt, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::conditions::Condition;

/// Desired state shared by every provider kind
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Version to install. When unset, the repository's default version is
    /// installed and then pinned here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Secret in the provider's namespace holding configuration variables
    /// used when rendering components (e.g. `AWS_B64ENCODED_CREDENTIALS`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Where to fetch components from; defaults to the provider registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_config: Option<FetchConfiguration>,

    /// Overrides applied to the provider's controller Deployments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentSpec>,
}

/// Source of provider components
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchConfiguration {
    /// Release URL, e.g.
    /// `https://github.com/kubernetes-sigs/cluster-api-provider-aws/releases/latest/infrastructure-components.yaml`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Label selector for ConfigMaps holding components.
    /// Mutually exclusive with `matchLabels`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Exact labels for ConfigMaps holding components.
    /// Mutually exclusive with `selector`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    /// A single ConfigMap holding components, addressed by name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapReference>,
}

impl FetchConfiguration {
    /// Whether components come from in-cluster ConfigMaps instead of a registry
    pub fn uses_config_maps(&self) -> bool {
        self.config_map.is_some() || self.selector.is_some() || self.match_labels.is_some()
    }
}

/// Reference to a ConfigMap, defaulting to the provider's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapReference {
    /// ConfigMap name
    pub name: String,

    /// ConfigMap namespace; the provider's namespace when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ConfigMapReference {
    /// Namespace of the ConfigMap, falling back to `default`
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }
}

/// Overrides for the provider's Deployments
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Node selector for the pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Tolerations for the pod template (replace the shipped ones)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Per-container overrides, matched by container name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerOverride>,
}

/// Overrides for one container of a provider Deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverride {
    /// Name of the container to customize
    pub name: String,

    /// Replacement image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Command-line flags as `flag: value`, rendered as `--flag=value`.
    /// A flag already present in the shipped args is replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<BTreeMap<String, String>>,

    /// Environment variables, replacing same-named ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,

    /// Resource requests and limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// Observed state shared by every provider kind
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    /// Conditions (`PreflightCheckPassed`, `ProviderInstalled`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// API contract implemented by the installed release series
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,

    /// Generation of the spec the status reflects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Version that was last installed successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
}

/// The closed set of provider kinds
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Cluster API core controllers
    #[serde(rename = "CoreProvider")]
    Core,
    /// Bootstrap provider (e.g. kubeadm bootstrap)
    #[serde(rename = "BootstrapProvider")]
    Bootstrap,
    /// Control plane provider (e.g. kubeadm control plane)
    #[serde(rename = "ControlPlaneProvider")]
    ControlPlane,
    /// Infrastructure provider (e.g. aws, docker)
    #[serde(rename = "InfrastructureProvider")]
    Infrastructure,
}

impl ProviderKind {
    /// Every kind, in install order
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Core,
        ProviderKind::Bootstrap,
        ProviderKind::ControlPlane,
        ProviderKind::Infrastructure,
    ];

    /// The CRD kind, which is also the clusterctl provider type
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Core => "CoreProvider",
            ProviderKind::Bootstrap => "BootstrapProvider",
            ProviderKind::ControlPlane => "ControlPlaneProvider",
            ProviderKind::Infrastructure => "InfrastructureProvider",
        }
    }

    /// Prefix used when naming the installed-provider record
    pub fn identity_prefix(&self) -> &'static str {
        match self {
            ProviderKind::Core => "",
            ProviderKind::Bootstrap => "bootstrap-",
            ProviderKind::ControlPlane => "control-plane-",
            ProviderKind::Infrastructure => "infrastructure-",
        }
    }

    /// Conventional components file name for this kind
    pub fn components_file(&self) -> &'static str {
        match self {
            ProviderKind::Core => "core-components.yaml",
            ProviderKind::Bootstrap => "bootstrap-components.yaml",
            ProviderKind::ControlPlane => "control-plane-components.yaml",
            ProviderKind::Infrastructure => "infrastructure-components.yaml",
        }
    }

    /// Parse a CRD kind / clusterctl type string
    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-erased view of a provider object
#[derive(Clone, Debug, PartialEq)]
pub struct Provider {
    /// Which CRD the provider came from
    pub kind: ProviderKind,
    /// Object name, which is also the provider name (e.g. "aws")
    pub name: String,
    /// Object namespace, where components are installed
    pub namespace: String,
    /// metadata.generation
    pub generation: Option<i64>,
    /// Whether the object has a deletion timestamp
    pub deleting: bool,
    /// Desired state
    pub spec: ProviderSpec,
    /// Observed state
    pub status: ProviderStatus,
}

impl Provider {
    /// A provider with empty spec and status, mostly useful in tests
    pub fn new(kind: ProviderKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            generation: None,
            deleting: false,
            spec: ProviderSpec::default(),
            status: ProviderStatus::default(),
        }
    }

    /// `namespace/name` for logs and messages
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Common surface of the four provider CRDs
pub trait ProviderResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The kind this CRD represents
    const KIND: ProviderKind;

    /// Shared spec
    fn provider_spec(&self) -> &ProviderSpec;

    /// Shared status, if any was written
    fn provider_status(&self) -> Option<&ProviderStatus>;

    /// Kind-erased view of this object
    fn to_provider(&self) -> Provider {
        Provider {
            kind: Self::KIND,
            name: self.name_any(),
            namespace: self.namespace().unwrap_or_default(),
            generation: self.meta().generation,
            deleting: self.meta().deletion_timestamp.is_some(),
            spec: self.provider_spec().clone(),
            status: self.provider_status().cloned().unwrap_or_default(),
        }
    }
}

macro_rules! provider_crd {
    (
        $(#[$doc:meta])*
        $root:ident, $spec:ident, $kind_variant:expr, kind = $kind:tt, plural = $plural:tt, shortname = $short:tt
    ) => {
        $(#[$doc])*
        #[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
        #[kube(
            group = "operator.cluster.x-k8s.io",
            version = "v1alpha1",
            kind = $kind,
            plural = $plural,
            shortname = $short,
            namespaced,
            status = "ProviderStatus",
            printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
            printcolumn = r#"{"name":"Installed","type":"string","jsonPath":".status.installedVersion"}"#,
            printcolumn = r#"{"name":"Contract","type":"string","jsonPath":".status.contract"}"#,
            printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
        )]
        pub struct $spec {
            /// Shared provider spec
            #[serde(flatten)]
            pub provider: ProviderSpec,
        }

        impl From<ProviderSpec> for $spec {
            fn from(provider: ProviderSpec) -> Self {
                Self { provider }
            }
        }

        impl ProviderResource for $root {
            const KIND: ProviderKind = $kind_variant;

            fn provider_spec(&self) -> &ProviderSpec {
                &self.spec.provider
            }

            fn provider_status(&self) -> Option<&ProviderStatus> {
                self.status.as_ref()
            }
        }
    };
}

provider_crd!(
    /// Cluster API core controllers. At most one may exist in the cluster.
    CoreProvider, CoreProviderSpec, ProviderKind::Core,
    kind = "CoreProvider", plural = "coreproviders", shortname = "cp"
);

provider_crd!(
    /// A bootstrap provider such as kubeadm
    BootstrapProvider, BootstrapProviderSpec, ProviderKind::Bootstrap,
    kind = "BootstrapProvider", plural = "bootstrapproviders", shortname = "bp"
);

provider_crd!(
    /// A control plane provider such as kubeadm
    ControlPlaneProvider, ControlPlaneProviderSpec, ProviderKind::ControlPlane,
    kind = "ControlPlaneProvider", plural = "controlplaneproviders", shortname = "cpp"
);

provider_crd!(
    /// An infrastructure provider such as aws or docker
    InfrastructureProvider, InfrastructureProviderSpec, ProviderKind::Infrastructure,
    kind = "InfrastructureProvider", plural = "infrastructureproviders", shortname = "ip"
);

/// Generated CRDs for every provider kind
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        CoreProvider::crd(),
        BootstrapProvider::crd(),
        ControlPlaneProvider::crd(),
        InfrastructureProvider::crd(),
    ]
}
