//! Status conditions following Cluster API conventions
//!
//! Conditions carry a severity in addition to the usual Kubernetes
//! type/status/reason/message so that a False condition can say how bad it is.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type: preflight checks, load and fetch succeeded
pub const PREFLIGHT_CHECK_CONDITION: &str = "PreflightCheckPassed";

/// Condition type: the provider components are installed
pub const PROVIDER_INSTALLED_CONDITION: &str = "ProviderInstalled";

/// Machine-readable reasons set on False conditions
pub mod reasons {
    /// `spec.version` is not a semantic version
    pub const INCORRECT_VERSION_FORMAT: &str = "IncorrectVersionFormat";
    /// Conflicting fetch configuration
    pub const FETCH_CONFIG_VALIDATION_ERROR: &str = "FetchConfigValidationError";
    /// Another instance of the same provider already exists
    pub const MORE_THAN_ONE_PROVIDER_INSTANCE_EXISTS: &str = "MoreThanOneExists";
    /// Non-core providers wait until the CoreProvider is installed
    pub const WAITING_FOR_CORE_PROVIDER_READY: &str = "WaitingForCoreProviderReady";
    /// The provider is not known to the registry and has no fetch URL
    pub const UNKNOWN_PROVIDER: &str = "UnknownProvider";
    /// The provider's release series declares an unsupported contract
    pub const CAPI_VERSION_INCOMPATIBILITY: &str = "CAPIVersionIncompatibility";
    /// Components could not be retrieved or rendered
    pub const COMPONENTS_FETCH_ERROR: &str = "ComponentsFetchError";
    /// Previously installed components could not be removed
    pub const OLD_COMPONENTS_DELETION_ERROR: &str = "OldComponentsDeletionError";
    /// The value source (secret + fetch URL) could not be loaded
    pub const SECRET_READER_ERROR: &str = "failed to load the secret reader";
    /// The repository could not be constructed
    pub const REPOSITORY_ERROR: &str = "failed to load the repository";
    /// Prerequisite CRDs could not be ensured
    pub const PREREQUISITES_ERROR: &str = "failed installing clusterctl CRDs";
    /// The installed-provider record could not be read
    pub const RECORD_READ_ERROR: &str = "failed getting clusterctl Provider";
    /// Install failed for a reason other than a readiness timeout
    pub const INSTALL_FAILED: &str = "Install failed";
    /// Install timed out waiting for deployment readiness
    pub const INSTALL_TIMED_OUT: &str = "Timedout waiting for deployment to become ready";
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How serious a False condition is
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    /// Reconciliation cannot make progress
    Error,
    /// Something is wrong but may resolve on its own
    Warning,
    /// Informational only
    Info,
}

/// Kubernetes-style condition for provider status
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., ProviderInstalled)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Severity, only meaningful when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// A True condition of the given type
    pub fn true_condition(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::True,
            severity: None,
            reason: String::new(),
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    /// A False condition with reason, severity and message
    pub fn false_condition(
        type_: impl Into<String>,
        reason: impl Into<String>,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::False,
            severity: Some(severity),
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Insert or replace a condition by type.
///
/// The transition time is only moved when the status actually changes, so
/// repeated reconciles of a healthy provider don't churn status.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Find a condition by type
pub fn get_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether the condition of the given type is present and True
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    get_condition(conditions, type_)
        .map(|c| c.status == ConditionStatus::True)
        .unwrap_or(false)
}
