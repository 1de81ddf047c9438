//! Admission-style validation of provider specs
//!
//! These checks need nothing but the spec itself and run before any phase
//! touches the cluster or a registry.

use super::provider::ProviderSpec;
use crate::version::SemanticVersion;
use crate::Error;

/// `spec.version`, when set, must be a semantic version
pub fn validate_version(provider: &str, spec: &ProviderSpec) -> Result<(), Error> {
    match spec.version.as_deref() {
        Some(version) => SemanticVersion::parse(version).map(|_| ()).map_err(|e| {
            Error::validation_for_field(provider, "spec.version", e.to_string())
        }),
        None => Ok(()),
    }
}

/// `spec.fetchConfig.selector` and `spec.fetchConfig.matchLabels` are exclusive
pub fn validate_fetch_config(provider: &str, spec: &ProviderSpec) -> Result<(), Error> {
    let Some(fetch) = &spec.fetch_config else {
        return Ok(());
    };
    if fetch.selector.is_some() && fetch.match_labels.is_some() {
        return Err(Error::configuration_conflict(
            provider,
            "spec.fetchConfig",
            "can't use selector and matchlabels, only one option is allowed",
        ));
    }
    Ok(())
}

/// Run every spec-level check, returning the first failure
pub fn validate_provider_spec(provider: &str, spec: &ProviderSpec) -> Result<(), Error> {
    validate_version(provider, spec)?;
    validate_fetch_config(provider, spec)
}
