//! Release metadata and contract compatibility
//!
//! Every provider release ships a `metadata.yaml` mapping `major.minor`
//! release series to the Cluster API contract they implement. Only providers
//! implementing a contract this operator can drive are installed.

use serde::Deserialize;
use tracing::debug;

use capi_operator_common::yaml::decode_yaml;
use capi_operator_common::{Error, SemanticVersion};

/// Contract implemented by the management cluster
pub const HOST_CONTRACT: &str = "v1beta1";

/// Contracts a provider release may declare and still be installed
pub const COMPATIBLE_CONTRACTS: &[&str] = &["v1alpha4", "v1beta1"];

const METADATA_KIND: &str = "Metadata";

/// A `major.minor` series and the contract it implements
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ReleaseSeries {
    /// Major version of the series
    pub major: u64,
    /// Minor version of the series
    pub minor: u64,
    /// Cluster API contract, e.g. `v1beta1`
    pub contract: String,
}

impl ReleaseSeries {
    /// Whether `version` falls in this series
    pub fn contains(&self, version: &SemanticVersion) -> bool {
        self.major == version.major() && self.minor == version.minor()
    }
}

/// Decoded `metadata.yaml`
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Document apiVersion
    #[serde(default)]
    pub api_version: Option<String>,
    /// Document kind, `Metadata` when present
    #[serde(default)]
    pub kind: Option<String>,
    /// Declared release series
    #[serde(default)]
    pub release_series: Vec<ReleaseSeries>,
}

impl Metadata {
    /// Decode a metadata document
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, Error> {
        let metadata: Metadata = decode_yaml(bytes, METADATA_KIND)?;
        match metadata.kind.as_deref() {
            None | Some(METADATA_KIND) => Ok(metadata),
            Some(other) => Err(Error::serialization_for_kind(
                METADATA_KIND,
                format!("unexpected kind {:?}", other),
            )),
        }
    }

    /// The release series covering `version`, if any
    pub fn release_series_for(&self, version: &SemanticVersion) -> Option<&ReleaseSeries> {
        self.release_series.iter().find(|s| s.contains(version))
    }
}

/// Resolve and check the contract of `version` from a metadata document.
///
/// Fails with `NoMatchingSeries` when no series covers the version and with
/// `ContractIncompatible` when the series' contract is not one this operator
/// can manage.
pub fn resolve_contract(metadata_doc: &[u8], version: &str, provider: &str) -> Result<String, Error> {
    let metadata = Metadata::from_yaml(metadata_doc).map_err(|e| {
        Error::serialization_for_kind(
            METADATA_KIND,
            format!("error decoding metadata.yaml for provider {:?}: {}", provider, e),
        )
    })?;
    let version = SemanticVersion::parse(version)?;

    let series = metadata
        .release_series_for(&version)
        .ok_or_else(|| Error::no_matching_series(provider, version.as_str()))?;

    if !COMPATIBLE_CONTRACTS.contains(&series.contract.as_str()) {
        return Err(Error::contract_incompatible(
            provider,
            HOST_CONTRACT,
            &series.contract,
        ));
    }

    debug!(provider = %provider, version = %version, contract = %series.contract, "resolved contract");
    Ok(series.contract.clone())
}
