//! Where provider components come from
//!
//! A [`Repository`] yields the bytes of a named file for a given version.
//! Two variants exist: [`RemoteRegistryRepository`] for GitHub-style release
//! assets and [`InMemoryRepository`] for components stored in a ConfigMap
//! (air-gapped clusters). This crate also holds the provider registry
//! ([`ConfigClient`]) and the contract check run against a release's
//! `metadata.yaml`.

pub mod config;
pub mod config_map;
pub mod metadata;
pub mod remote;
pub mod source;

use async_trait::async_trait;

use capi_operator_common::Error;

pub use config::{ConfigClient, ProviderConfig, ProviderRegistry};
pub use config_map::{select_config_map, selector_string, InMemoryRepository};
pub use metadata::{resolve_contract, Metadata, ReleaseSeries, COMPATIBLE_CONTRACTS, HOST_CONTRACT};
pub use remote::{HttpReleaseClient, ReleaseClient, ReleaseInfo, RemoteRegistryRepository};
pub use source::{ConfigSource, KubeConfigSource};

/// Name of the release metadata file in every repository
pub const METADATA_FILE: &str = "metadata.yaml";

/// A versioned source of provider files
#[async_trait]
pub trait Repository: Send + Sync {
    /// The version installed when the provider does not pin one
    fn default_version(&self) -> String;

    /// Path of the components file within a release
    fn components_path(&self) -> String;

    /// Bytes of `path` at `version`
    async fn get_file(&self, version: &str, path: &str) -> Result<Vec<u8>, Error>;
}
