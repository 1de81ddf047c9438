//! Classified phase failures

use thiserror::Error as ThisError;

use capi_operator_common::crd::{Condition, ConditionSeverity};
use capi_operator_common::Error;

/// A failure raised at a phase boundary, tagged with where it should show up
/// on the provider's status
#[derive(Debug, ThisError)]
#[error("{reason}: {cause}")]
pub struct PhaseError {
    /// Underlying error
    #[source]
    pub cause: Error,
    /// Condition reason
    pub reason: String,
    /// Condition type the failure is reported under
    pub condition: &'static str,
    /// How serious the failure is
    pub severity: ConditionSeverity,
}

impl PhaseError {
    /// A phase error with explicit severity
    pub fn new(
        cause: Error,
        reason: impl Into<String>,
        condition: &'static str,
        severity: ConditionSeverity,
    ) -> Self {
        Self {
            cause,
            reason: reason.into(),
            condition,
            severity,
        }
    }

    /// Whether waiting and re-running the pipeline may help.
    ///
    /// False means only a change to the provider spec can fix this.
    pub fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }

    /// The False condition describing this failure
    pub fn to_condition(&self) -> Condition {
        Condition::false_condition(
            self.condition,
            self.reason.clone(),
            self.severity,
            self.cause.to_string(),
        )
    }
}

/// Tag an error with a reason and condition type at warning severity.
///
/// `Ok` passes straight through.
pub fn wrap_phase_error<T>(
    result: Result<T, Error>,
    reason: &str,
    condition: &'static str,
) -> Result<T, PhaseError> {
    result.map_err(|cause| PhaseError::new(cause, reason, condition, ConditionSeverity::Warning))
}
