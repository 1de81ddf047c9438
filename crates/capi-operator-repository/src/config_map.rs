//! ConfigMap-backed repository for air-gapped installs
//!
//! A components ConfigMap carries two data keys, `metadata` and
//! `components`, and a version taken from the `cluster.x-k8s.io/version`
//! label or, without the label, from the ConfigMap's own name.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use tracing::{debug, warn};

use capi_operator_common::crd::FetchConfiguration;
use capi_operator_common::{Error, SemanticVersion, VERSION_LABEL};

use crate::{Repository, METADATA_FILE};

/// Components path inside a ConfigMap-backed release
pub const CONFIG_MAP_COMPONENTS_PATH: &str = "components.yaml";

/// Data key holding the release metadata
pub const METADATA_KEY: &str = "metadata";

/// Data key holding the components manifest
pub const COMPONENTS_KEY: &str = "components";

/// Repository holding files in memory for a fixed set of versions
#[derive(Clone, Debug)]
pub struct InMemoryRepository {
    default_version: String,
    components_path: String,
    files: Vec<(SemanticVersion, String, Vec<u8>)>,
}

impl InMemoryRepository {
    /// An empty repository whose default version is `default_version`
    pub fn new(default_version: impl Into<String>) -> Self {
        Self {
            default_version: default_version.into(),
            components_path: CONFIG_MAP_COMPONENTS_PATH.to_string(),
            files: Vec::new(),
        }
    }

    /// Add a file at `version`; versions that don't parse are rejected
    pub fn with_file(
        mut self,
        version: &str,
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Result<Self, Error> {
        let version = SemanticVersion::parse(version)?;
        self.files.push((version, path.into(), content.into()));
        Ok(self)
    }

    /// Build a repository from a components ConfigMap.
    ///
    /// Fails with `InvalidVersion` when the version (label, else name) does
    /// not parse, naming where it came from, and with `MissingKey` when
    /// `metadata` or `components` is absent. `metadata` is checked first.
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self, Error> {
        let version = config_map_version(cm)?;
        let source_name = format!(
            "ConfigMap {}/{}",
            cm.namespace().unwrap_or_default(),
            cm.name_any()
        );
        let data = cm.data.as_ref();

        let metadata = data
            .and_then(|d| d.get(METADATA_KEY))
            .ok_or_else(|| Error::missing_key(&source_name, METADATA_KEY))?;
        let components = data
            .and_then(|d| d.get(COMPONENTS_KEY))
            .ok_or_else(|| Error::missing_key(&source_name, COMPONENTS_KEY))?;

        debug!(source = %source_name, version = %version, "loaded components from ConfigMap");
        Self::new(version.as_str())
            .with_file(version.as_str(), METADATA_FILE, metadata.as_bytes())?
            .with_file(version.as_str(), CONFIG_MAP_COMPONENTS_PATH, components.as_bytes())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    fn default_version(&self) -> String {
        self.default_version.clone()
    }

    fn components_path(&self) -> String {
        self.components_path.clone()
    }

    async fn get_file(&self, version: &str, path: &str) -> Result<Vec<u8>, Error> {
        let wanted = SemanticVersion::parse(version)?;
        self.files
            .iter()
            .find(|(v, p, _)| *v == wanted && p == path)
            .map(|(_, _, content)| content.clone())
            .ok_or_else(|| Error::not_found("file", format!("{} for version {}", path, version)))
    }
}

/// The version a components ConfigMap declares.
///
/// The label wins over the name. The error message names the origin so a
/// bad label is not mistaken for a bad name.
pub fn config_map_version(cm: &ConfigMap) -> Result<SemanticVersion, Error> {
    let name = cm.name_any();
    let (version, origin) = match cm.labels().get(VERSION_LABEL) {
        Some(label) => (label.clone(), format!("from the Label {}", VERSION_LABEL)),
        None => (name.clone(), "from the Name".to_string()),
    };

    SemanticVersion::parse(&version).map_err(|_| {
        Error::invalid_version(
            &version,
            format!(
                "ConfigMap {}/{} has invalid version:{} ({})",
                cm.namespace().unwrap_or_default(),
                name,
                version,
                origin
            ),
        )
    })
}

/// Label selector string for the ConfigMap lookup configured on a provider.
///
/// `None` when the provider selects no ConfigMaps by label.
pub fn selector_string(fetch: &FetchConfiguration) -> Option<String> {
    if let Some(selector) = &fetch.selector {
        return Some(label_selector_string(selector));
    }
    fetch.match_labels.as_ref().map(match_labels_string)
}

fn match_labels_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn label_selector_string(selector: &LabelSelector) -> String {
    let mut terms = Vec::new();
    if let Some(labels) = &selector.match_labels {
        if !labels.is_empty() {
            terms.push(match_labels_string(labels));
        }
    }
    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.clone().unwrap_or_default().join(",");
        let term = match expr.operator.as_str() {
            "In" => format!("{} in ({})", expr.key, values),
            "NotIn" => format!("{} notin ({})", expr.key, values),
            "Exists" => expr.key.clone(),
            "DoesNotExist" => format!("!{}", expr.key),
            other => {
                warn!(operator = %other, key = %expr.key, "ignoring unknown selector operator");
                continue;
            }
        };
        terms.push(term);
    }
    terms.join(",")
}

/// Pick the ConfigMap to install from a label-selected set.
///
/// With a pinned version the ConfigMap declaring that version wins;
/// otherwise the highest version does. ConfigMaps with unparseable versions
/// are skipped.
pub fn select_config_map(
    config_maps: Vec<ConfigMap>,
    version: Option<&str>,
    selector: &str,
) -> Result<ConfigMap, Error> {
    let wanted = version.map(SemanticVersion::parse).transpose()?;

    let candidates = config_maps.into_iter().filter_map(|cm| match config_map_version(&cm) {
        Ok(v) => Some((v, cm)),
        Err(e) => {
            warn!(error = %e, "skipping ConfigMap with invalid version");
            None
        }
    });

    let selected = match &wanted {
        Some(wanted) => candidates.into_iter().find(|(v, _)| v == wanted),
        None => candidates.max_by(|(a, _), (b, _)| a.cmp(b)),
    };

    selected.map(|(_, cm)| cm).ok_or_else(|| {
        let what = match version {
            Some(v) => format!("selector {:?} at version {}", selector, v),
            None => format!("selector {:?}", selector),
        };
        Error::not_found("ConfigMap", what)
    })
}
