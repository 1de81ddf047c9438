//! Common types for the CAPI provider operator: CRDs, errors, versions and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod version;
pub mod yaml;

pub use error::Error;
pub use version::SemanticVersion;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side apply issued by the operator
pub const FIELD_MANAGER: &str = "capi-operator";

/// Label carrying the provider version on ConfigMap-backed repositories
pub const VERSION_LABEL: &str = "cluster.x-k8s.io/version";

/// Label tying installed objects to the provider identity that owns them
pub const PROVIDER_LABEL: &str = "cluster.x-k8s.io/provider";

/// Label marking objects as managed by the clusterctl inventory
pub const CLUSTERCTL_LABEL: &str = "clusterctl.cluster.x-k8s.io";

/// Finalizer held on provider objects until their components are removed
pub const PROVIDER_FINALIZER: &str = "provider.cluster.x-k8s.io";
