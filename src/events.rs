//! Kubernetes Events for provider objects
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::warn;

/// Publishes Events about provider objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// [`EventPublisher`] over `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller_name` shows up as the reporting component
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Event reasons (REASON column of `kubectl get events`)
///
/// Failures use the condition reason of the phase that failed.
pub mod reasons {
    /// Components applied and available
    pub const PROVIDER_INSTALLED: &str = "ProviderInstalled";
    /// Components removed and finalizer released
    pub const PROVIDER_DELETED: &str = "ProviderDeleted";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// Install or upgrade pipeline
    pub const INSTALL: &str = "Install";
    /// Deletion pipeline
    pub const DELETE: &str = "Delete";
}
