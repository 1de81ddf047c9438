//! Phase reconciler for Cluster API providers
//!
//! A provider is installed by running preflight, load, fetch, pre-install
//! and install in order; it is removed by running load then delete. Each
//! phase reports failures as a [`PhaseError`] carrying the condition type,
//! reason and severity the controller publishes on the provider's status.

pub mod components;
pub mod customize;
pub mod error;
pub mod installer;
pub mod phases;
pub mod preflight;
pub mod record;

pub use components::{Components, RenderOptions, Renderer, TemplateRenderer};
pub use customize::customize_components;
pub use error::{wrap_phase_error, PhaseError};
pub use installer::{DeleteOptions, Installer, KubeInstaller};
pub use phases::{
    repository_source, requires_pre_deletion, Phase, PhaseContext, PhaseOutcome, PhaseReconciler,
    RepositorySource, DELETE_PHASES, INSTALL_PHASES,
};
pub use preflight::preflight_checks;
pub use record::{
    identity_for, KubeProviderRecordStore, ProviderIdentity, ProviderRecord, ProviderRecordStore,
};
