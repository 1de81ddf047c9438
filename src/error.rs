//! Error type returned by the provider controller

use thiserror::Error;

use capi_operator_phases::PhaseError;

/// Why a reconcile of a provider object failed
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A pipeline phase failed; the matching condition is already on the
    /// provider's status
    #[error("{0}")]
    Phase(#[from] PhaseError),

    /// Reading or writing the provider object failed
    #[error("{0}")]
    Operator(#[from] capi_operator_common::Error),
}

impl ReconcileError {
    /// Whether requeueing without a spec change can help
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Phase(e) => e.is_retryable(),
            Self::Operator(e) => e.is_retryable(),
        }
    }

    /// Condition reason for phase failures
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Phase(e) => Some(&e.reason),
            Self::Operator(_) => None,
        }
    }
}
