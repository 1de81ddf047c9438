//! Checks run before anything is fetched or installed
//!
//! These look only at the provider object and its siblings, never at the
//! cluster or a registry.

use std::time::Duration;

use tracing::{debug, info};

use capi_operator_common::crd::{
    is_true, reasons, set_condition, validate_fetch_config, validate_version, Condition,
    ConditionSeverity, Provider, ProviderKind, PREFLIGHT_CHECK_CONDITION,
    PROVIDER_INSTALLED_CONDITION,
};
use capi_operator_common::Error;

use crate::error::PhaseError;
use crate::phases::PhaseOutcome;

/// How long a non-core provider waits before looking for the core provider again
pub const WAIT_FOR_CORE_PROVIDER: Duration = Duration::from_secs(60);

/// Validate `provider` against its own spec and the other providers in the
/// cluster.
///
/// `providers` lists every provider object of any kind, possibly including
/// `provider` itself. A non-core provider is held back with a requeue until
/// a CoreProvider reports installed; the wait is recorded as an `Info`
/// condition rather than an error.
pub fn preflight_checks(
    provider: &mut Provider,
    providers: &[Provider],
) -> Result<PhaseOutcome, PhaseError> {
    debug!(provider = %provider.key(), kind = %provider.kind, "running preflight checks");

    validate_version(&provider.name, &provider.spec)
        .map_err(|e| preflight_error(e, reasons::INCORRECT_VERSION_FORMAT))?;

    validate_fetch_config(&provider.name, &provider.spec)
        .map_err(|e| preflight_error(e, reasons::FETCH_CONFIG_VALIDATION_ERROR))?;

    let this = &*provider;
    let others = || providers.iter().filter(|p| !is_same_object(p, this));

    if provider.kind == ProviderKind::Core {
        if let Some(other) = others().find(|p| p.kind == ProviderKind::Core) {
            return Err(preflight_error(
                Error::validation_for(
                    &provider.name,
                    format!(
                        "only one instance of CoreProvider is allowed, found {}",
                        other.key()
                    ),
                ),
                reasons::MORE_THAN_ONE_PROVIDER_INSTANCE_EXISTS,
            ));
        }
    }

    if let Some(other) = others()
        .find(|p| p.kind == provider.kind && p.name == provider.name && p.namespace != provider.namespace)
    {
        return Err(preflight_error(
            Error::validation_for(
                &provider.name,
                format!(
                    "only one {} named {} is allowed, also found in namespace {}",
                    provider.kind, provider.name, other.namespace
                ),
            ),
            reasons::MORE_THAN_ONE_PROVIDER_INSTANCE_EXISTS,
        ));
    }

    if provider.kind != ProviderKind::Core && !core_provider_ready(providers) {
        info!(provider = %provider.key(), "waiting for the CoreProvider to be installed");
        set_condition(
            &mut provider.status.conditions,
            Condition::false_condition(
                PREFLIGHT_CHECK_CONDITION,
                reasons::WAITING_FOR_CORE_PROVIDER_READY,
                ConditionSeverity::Info,
                "waiting for the CoreProvider to be installed",
            ),
        );
        return Ok(PhaseOutcome::Requeue(WAIT_FOR_CORE_PROVIDER));
    }

    Ok(PhaseOutcome::Continue)
}

fn core_provider_ready(providers: &[Provider]) -> bool {
    providers
        .iter()
        .any(|p| p.kind == ProviderKind::Core && is_true(&p.status.conditions, PROVIDER_INSTALLED_CONDITION))
}

fn is_same_object(a: &Provider, b: &Provider) -> bool {
    a.kind == b.kind && a.name == b.name && a.namespace == b.namespace
}

fn preflight_error(cause: Error, reason: &str) -> PhaseError {
    PhaseError::new(cause, reason, PREFLIGHT_CHECK_CONDITION, ConditionSeverity::Error)
}
