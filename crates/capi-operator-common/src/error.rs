//! Error types for the provider operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the context a status condition or log line needs
//! (provider names, versions, the ConfigMap involved) so callers never have
//! to parse message text.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for provider operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A version string does not follow semantic versioning
    #[error("invalid version {version:?}: {message}")]
    InvalidVersion {
        /// The offending version string
        version: String,
        /// Description of what's wrong, including where the version came from
        message: String,
    },

    /// A required key is absent from a configuration source
    #[error("{source_name} has no {key}")]
    MissingKey {
        /// The object the key was expected in (e.g. "ConfigMap ns/name")
        source_name: String,
        /// The missing key
        key: String,
    },

    /// A configuration source or record does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of object that was looked up
        kind: String,
        /// Name (usually namespace/name) of the object
        name: String,
    },

    /// No release series in the provider metadata covers the version
    #[error("invalid provider metadata: version {version} for the provider {provider} does not match any release series")]
    NoMatchingSeries {
        /// Provider name
        provider: String,
        /// The resolved version that was looked up
        version: String,
    },

    /// The release series declares a contract this operator cannot manage
    #[error("CAPI operator is only compatible with {host_contract} providers, detected {series_contract} for provider {provider}.")]
    ContractIncompatible {
        /// Provider name
        provider: String,
        /// The contract version of the host environment
        host_contract: String,
        /// The contract declared by the matched release series
        series_contract: String,
    },

    /// Provider components could not be retrieved or processed
    #[error("components fetch error for {provider}: {message}")]
    ComponentsFetch {
        /// Provider name
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// Timed out waiting for installed components to become ready
    #[error("install timeout for {provider}: {message}")]
    InstallTimeout {
        /// Provider name
        provider: String,
        /// Description of what was still pending
        message: String,
    },

    /// Applying components to the cluster failed
    #[error("install error for {provider}: {message}")]
    Install {
        /// Provider name
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// Removing previously installed components failed
    #[error("deletion error for {provider}: {message}")]
    Deletion {
        /// Provider name
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// Mutually exclusive configuration fields were set together
    #[error("configuration conflict for {provider} at {field}: {message}")]
    ConfigurationConflict {
        /// Provider name
        provider: String,
        /// Field path of the conflicting configuration
        field: String,
        /// Description of the conflict
        message: String,
    },

    /// Validation error for provider specs
    #[error("validation error for {provider}: {message}")]
    Validation {
        /// Provider name
        provider: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.version")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document or resource kind being decoded (if known)
        kind: Option<String>,
    },

    /// Remote release registry error
    #[error("registry error [{url}]: {message}")]
    Registry {
        /// URL being accessed
        url: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "discovery")
        context: String,
    },
}

impl Error {
    /// Create an invalid version error
    pub fn invalid_version(version: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidVersion {
            version: version.into(),
            message: msg.into(),
        }
    }

    /// Create a missing key error for the named source
    pub fn missing_key(source_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingKey {
            source_name: source_name.into(),
            key: key.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a no matching release series error
    pub fn no_matching_series(provider: impl Into<String>, version: impl Into<String>) -> Self {
        Self::NoMatchingSeries {
            provider: provider.into(),
            version: version.into(),
        }
    }

    /// Create a contract incompatibility error
    pub fn contract_incompatible(
        provider: impl Into<String>,
        host_contract: impl Into<String>,
        series_contract: impl Into<String>,
    ) -> Self {
        Self::ContractIncompatible {
            provider: provider.into(),
            host_contract: host_contract.into(),
            series_contract: series_contract.into(),
        }
    }

    /// Create a components fetch error
    pub fn components_fetch(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ComponentsFetch {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create an install timeout error
    pub fn install_timeout(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InstallTimeout {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create an install error
    pub fn install(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Install {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a deletion error
    pub fn deletion(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Deletion {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration conflict error
    pub fn configuration_conflict(
        provider: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ConfigurationConflict {
            provider: provider.into(),
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without provider context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            provider: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with provider context
    pub fn validation_for(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            provider: provider.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with provider context and field path
    pub fn validation_for_field(
        provider: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            provider: provider.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a registry error for the given URL
    pub fn registry(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Registry {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Only errors in the provider spec itself (validation, conflicting fetch
    /// configuration) are not retryable; editing the spec triggers the next
    /// pass. Bad versions and undecodable documents usually come from
    /// ConfigMaps, release assets or inventory records, which are not
    /// watched, so they are retried like cluster and registry failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 404 && ae.code != 409
            ),
            Error::ConfigurationConflict { .. } | Error::Validation { .. } => false,
            Error::InvalidVersion { .. }
            | Error::Serialization { .. }
            | Error::MissingKey { .. }
            | Error::NotFound { .. }
            | Error::NoMatchingSeries { .. }
            | Error::ContractIncompatible { .. }
            | Error::ComponentsFetch { .. }
            | Error::InstallTimeout { .. }
            | Error::Install { .. }
            | Error::Deletion { .. }
            | Error::Registry { .. }
            | Error::Internal { .. } => true,
        }
    }

    /// Whether this is an install timeout (distinct status reason)
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::InstallTimeout { .. })
    }

    /// Whether this error means the looked-up object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Get the provider name if this error is associated with a specific provider
    pub fn provider(&self) -> Option<&str> {
        match self {
            Error::NoMatchingSeries { provider, .. }
            | Error::ContractIncompatible { provider, .. }
            | Error::ComponentsFetch { provider, .. }
            | Error::InstallTimeout { provider, .. }
            | Error::Install { provider, .. }
            | Error::Deletion { provider, .. }
            | Error::ConfigurationConflict { provider, .. }
            | Error::Validation { provider, .. } => Some(provider),
            _ => None,
        }
    }
}
