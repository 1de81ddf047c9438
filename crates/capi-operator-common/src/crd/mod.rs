//! Custom Resource Definitions for the provider operator
//!
//! Four namespaced kinds (`CoreProvider`, `BootstrapProvider`,
//! `ControlPlaneProvider`, `InfrastructureProvider`) share one spec and one
//! status. The rest of the operator works on the kind-erased [`Provider`]
//! view so the pipeline is written once.

mod conditions;
mod provider;
mod validation;

pub use conditions::{
    get_condition, is_true, reasons, set_condition, Condition, ConditionSeverity,
    ConditionStatus, PREFLIGHT_CHECK_CONDITION, PROVIDER_INSTALLED_CONDITION,
};
pub use provider::{
    all_crds, BootstrapProvider, BootstrapProviderSpec, ConfigMapReference, ContainerOverride,
    ControlPlaneProvider, ControlPlaneProviderSpec, CoreProvider, CoreProviderSpec,
    DeploymentSpec, FetchConfiguration, InfrastructureProvider, InfrastructureProviderSpec,
    Provider, ProviderKind, ProviderResource, ProviderSpec, ProviderStatus,
};
pub use validation::{validate_fetch_config, validate_provider_spec, validate_version};
