//! Provider controller
//!
//! One generic reconcile serves all four provider kinds. It owns everything
//! that touches the provider object: the finalizer, persisting the pinned
//! version and the status, Events, and the requeue policy. The install and
//! delete pipelines themselves run in [`PhaseReconciler`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use capi_operator_common::crd::{
    is_true, BootstrapProvider, ControlPlaneProvider, CoreProvider, InfrastructureProvider,
    Provider, ProviderKind, ProviderResource, ProviderStatus, PROVIDER_INSTALLED_CONDITION,
};
use capi_operator_common::{Error, FIELD_MANAGER, PROVIDER_FINALIZER};
use capi_operator_phases::{PhaseContext, PhaseError, PhaseOutcome, PhaseReconciler};

use crate::error::ReconcileError;
use crate::events::{actions, reasons, EventPublisher};

/// Requeue delay after adding the finalizer
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Reads and writes provider objects of any kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Every provider object of every kind, cluster-wide
    async fn list_providers(&self) -> Result<Vec<Provider>, Error>;

    /// Add the provider finalizer; a no-op when already present
    async fn add_finalizer(&self, provider: &Provider) -> Result<(), Error>;

    /// Remove the provider finalizer
    async fn remove_finalizer(&self, provider: &Provider) -> Result<(), Error>;

    /// Set `spec.version`, returning the resulting generation
    async fn patch_version(&self, provider: &Provider, version: &str) -> Result<Option<i64>, Error>;

    /// Replace the status subresource
    async fn patch_status(&self, provider: &Provider, status: &ProviderStatus) -> Result<(), Error>;
}

/// Run `$body` with `$k` bound to the CRD type for `$kind`
macro_rules! with_kind {
    ($kind:expr, $k:ident => $body:expr) => {
        match $kind {
            ProviderKind::Core => {
                type $k = CoreProvider;
                $body
            }
            ProviderKind::Bootstrap => {
                type $k = BootstrapProvider;
                $body
            }
            ProviderKind::ControlPlane => {
                type $k = ControlPlaneProvider;
                $body
            }
            ProviderKind::Infrastructure => {
                type $k = InfrastructureProvider;
                $body
            }
        }
    };
}

/// [`ProviderClient`] backed by the Kubernetes API
pub struct KubeProviderClient {
    client: Client,
}

impl KubeProviderClient {
    /// Create a provider client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: ProviderResource>(&self, provider: &Provider) -> Api<K> {
        Api::namespaced(self.client.clone(), &provider.namespace)
    }

    async fn list_kind<K: ProviderResource>(&self) -> Result<Vec<Provider>, Error> {
        let api: Api<K> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(|obj| obj.to_provider()).collect())
    }

    async fn set_finalizers<K: ProviderResource>(
        &self,
        provider: &Provider,
        edit: impl FnOnce(&mut Vec<String>) -> bool + Send,
    ) -> Result<(), Error> {
        let api = self.api::<K>(provider);
        let obj = api.get(&provider.name).await?;
        let mut finalizers = obj.meta().finalizers.clone().unwrap_or_default();
        if !edit(&mut finalizers) {
            return Ok(());
        }

        let patch = json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(&provider.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn edit_finalizers(
        &self,
        provider: &Provider,
        edit: impl FnOnce(&mut Vec<String>) -> bool + Send,
    ) -> Result<(), Error> {
        with_kind!(provider.kind, K => self.set_finalizers::<K>(provider, edit).await)
    }

    async fn patch_spec_version(&self, provider: &Provider, version: &str) -> Result<Option<i64>, Error> {
        with_kind!(provider.kind, K => self.patch_version_as::<K>(provider, version).await)
    }

    async fn patch_provider_status(&self, provider: &Provider, status: &ProviderStatus) -> Result<(), Error> {
        with_kind!(provider.kind, K => self.patch_status_as::<K>(provider, status).await)
    }

    async fn patch_version_as<K: ProviderResource>(
        &self,
        provider: &Provider,
        version: &str,
    ) -> Result<Option<i64>, Error> {
        let patch = json!({
            "spec": {
                "version": version
            }
        });
        let obj = self
            .api::<K>(provider)
            .patch(&provider.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(obj.meta().generation)
    }

    async fn patch_status_as<K: ProviderResource>(
        &self,
        provider: &Provider,
        status: &ProviderStatus,
    ) -> Result<(), Error> {
        let patch = json!({
            "status": status
        });
        self.api::<K>(provider)
            .patch_status(&provider.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProviderClient for KubeProviderClient {
    async fn list_providers(&self) -> Result<Vec<Provider>, Error> {
        let mut providers = self.list_kind::<CoreProvider>().await?;
        providers.extend(self.list_kind::<BootstrapProvider>().await?);
        providers.extend(self.list_kind::<ControlPlaneProvider>().await?);
        providers.extend(self.list_kind::<InfrastructureProvider>().await?);
        Ok(providers)
    }

    async fn add_finalizer(&self, provider: &Provider) -> Result<(), Error> {
        self.edit_finalizers(provider, |finalizers| {
            if finalizers.iter().any(|f| f == PROVIDER_FINALIZER) {
                return false;
            }
            finalizers.push(PROVIDER_FINALIZER.to_string());
            true
        })
        .await
    }

    async fn remove_finalizer(&self, provider: &Provider) -> Result<(), Error> {
        self.edit_finalizers(provider, |finalizers| {
            let before = finalizers.len();
            finalizers.retain(|f| f != PROVIDER_FINALIZER);
            finalizers.len() != before
        })
        .await
    }

    async fn patch_version(&self, provider: &Provider, version: &str) -> Result<Option<i64>, Error> {
        self.patch_spec_version(provider, version).await
    }

    async fn patch_status(&self, provider: &Provider, status: &ProviderStatus) -> Result<(), Error> {
        self.patch_provider_status(provider, status).await
    }
}

/// Requeue and scoping settings
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Only watch providers in this namespace
    pub watch_namespace: Option<String>,
    /// Resync interval for healthy providers
    pub requeue_after: Duration,
    /// Retry interval after a transient failure
    pub error_requeue_after: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            requeue_after: Duration::from_secs(300),
            error_requeue_after: Duration::from_secs(30),
        }
    }
}

/// Shared state for every provider controller
pub struct Context {
    /// Provider object access
    pub kube: Arc<dyn ProviderClient>,
    /// Event publishing
    pub events: Arc<dyn EventPublisher>,
    /// Collaborators for the phase pipeline
    pub phases: PhaseContext,
    /// Requeue and scoping settings
    pub settings: ControllerSettings,
}

/// Reconcile one provider object of any kind
#[instrument(skip(obj, ctx), fields(provider = %obj.name_any(), kind = %K::KIND))]
pub async fn reconcile<K: ProviderResource>(
    obj: Arc<K>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let provider = obj.to_provider();

    if provider.deleting {
        return reconcile_deletion(obj.as_ref(), provider, &ctx).await;
    }

    if !has_finalizer(obj.as_ref()) {
        info!("adding finalizer");
        ctx.kube.add_finalizer(&provider).await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    if is_up_to_date(&provider) {
        debug!(version = ?provider.spec.version, "provider up to date");
        return Ok(Action::requeue(ctx.settings.requeue_after));
    }

    info!("reconciling provider");
    let pinned_version = provider.spec.version.clone();
    let providers = ctx.kube.list_providers().await?;

    let mut phases = PhaseReconciler::new(ctx.phases.clone(), provider, providers);
    let result = phases.reconcile().await;
    let mut provider = phases.into_provider();

    match result {
        Ok(PhaseOutcome::Continue) => {
            if pinned_version.is_none() {
                if let Some(version) = provider.spec.version.clone() {
                    info!(version = %version, "pinning provider version");
                    let generation = ctx.kube.patch_version(&provider, &version).await?;
                    if generation.is_some() {
                        provider.status.observed_generation = generation;
                    }
                }
            }
            ctx.kube.patch_status(&provider, &provider.status).await?;

            let version = provider.status.installed_version.clone().unwrap_or_default();
            info!(version = %version, "provider installed");
            ctx.events
                .publish(
                    &obj.object_ref(&()),
                    EventType::Normal,
                    reasons::PROVIDER_INSTALLED,
                    actions::INSTALL,
                    Some(format!("installed version {}", version)),
                )
                .await;
            Ok(Action::requeue(ctx.settings.requeue_after))
        }
        Ok(PhaseOutcome::Requeue(after)) => {
            ctx.kube.patch_status(&provider, &provider.status).await?;
            Ok(Action::requeue(after))
        }
        Err(err) => Err(persist_failure(obj.as_ref(), &provider, err, actions::INSTALL, &ctx).await),
    }
}

async fn reconcile_deletion<K: ProviderResource>(
    obj: &K,
    provider: Provider,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    if !has_finalizer(obj) {
        return Ok(Action::await_change());
    }

    info!("deleting provider");
    let mut phases = PhaseReconciler::new(ctx.phases.clone(), provider, Vec::new());
    let result = phases.reconcile_delete().await;
    let provider = phases.into_provider();

    match result {
        Ok(PhaseOutcome::Continue) => {
            ctx.kube.remove_finalizer(&provider).await?;
            ctx.events
                .publish(
                    &obj.object_ref(&()),
                    EventType::Normal,
                    reasons::PROVIDER_DELETED,
                    actions::DELETE,
                    None,
                )
                .await;
            Ok(Action::await_change())
        }
        Ok(PhaseOutcome::Requeue(after)) => Ok(Action::requeue(after)),
        Err(err) => Err(persist_failure(obj, &provider, err, actions::DELETE, ctx).await),
    }
}

/// Write the failed condition and publish a Warning. A failed status write
/// is logged; the phase error is what gets reported.
async fn persist_failure<K: ProviderResource>(
    obj: &K,
    provider: &Provider,
    err: PhaseError,
    action: &str,
    ctx: &Context,
) -> ReconcileError {
    warn!(reason = %err.reason, retryable = err.is_retryable(), error = %err.cause, "phase failed");

    if let Err(e) = ctx.kube.patch_status(provider, &provider.status).await {
        warn!(error = %e, "failed to record failure on provider status");
    }
    ctx.events
        .publish(
            &obj.object_ref(&()),
            EventType::Warning,
            &err.reason,
            action,
            Some(err.cause.to_string()),
        )
        .await;
    err.into()
}

fn has_finalizer<K: ProviderResource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == PROVIDER_FINALIZER)
}

/// Generation-gated: only a spec change or a lost install re-runs the pipeline
fn is_up_to_date(provider: &Provider) -> bool {
    let status = &provider.status;
    provider.generation.is_some()
        && status.observed_generation == provider.generation
        && is_true(&status.conditions, PROVIDER_INSTALLED_CONDITION)
        && status.installed_version.is_some()
        && status.installed_version == provider.spec.version
}

/// Requeue policy after a failed reconcile.
///
/// Transient failures retry after `error_requeue_after`; anything that
/// needs a spec change waits for one.
pub fn error_policy<K: ProviderResource>(
    obj: Arc<K>,
    error: &ReconcileError,
    ctx: Arc<Context>,
) -> Action {
    error!(
        ?error,
        provider = %obj.name_any(),
        kind = %K::KIND,
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.settings.error_requeue_after)
    } else {
        Action::await_change()
    }
}

/// Run a controller for each provider kind until shutdown is signalled
pub async fn run(client: Client, ctx: Arc<Context>) {
    let namespace = ctx.settings.watch_namespace.clone();
    let namespace = namespace.as_deref();

    tokio::join!(
        run_kind::<CoreProvider>(client.clone(), namespace, ctx.clone()),
        run_kind::<BootstrapProvider>(client.clone(), namespace, ctx.clone()),
        run_kind::<ControlPlaneProvider>(client.clone(), namespace, ctx.clone()),
        run_kind::<InfrastructureProvider>(client, namespace, ctx),
    );
}

async fn run_kind<K: ProviderResource>(client: Client, namespace: Option<&str>, ctx: Arc<Context>) {
    let api: Api<K> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    info!(kind = %K::KIND, namespace = namespace.unwrap_or("<all>"), "starting provider controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(provider = %obj.name, ?action, "reconciliation completed");
                }
                Err(e) => {
                    error!(error = ?e, "controller error");
                }
            }
        })
        .await;

    info!(kind = %K::KIND, "provider controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use capi_operator_common::crd::{
        get_condition, reasons as condition_reasons, set_condition, Condition, ConditionSeverity,
        CoreProviderSpec, InfrastructureProviderSpec, ProviderSpec, PREFLIGHT_CHECK_CONDITION,
    };
    use capi_operator_phases::{
        Components, DeleteOptions, Installer, ProviderIdentity, ProviderRecord,
        ProviderRecordStore, RenderOptions, Renderer,
    };
    use capi_operator_repository::{ConfigSource, ReleaseClient, ReleaseInfo};
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::chrono::Utc;

    use crate::events::MockEventPublisher;

    /// Stands in for every pipeline collaborator in tests that never get
    /// past preflight
    struct Unreachable;

    fn unexpected<T>() -> Result<T, Error> {
        Err(Error::internal("unexpected collaborator call"))
    }

    #[async_trait]
    impl ConfigSource for Unreachable {
        async fn get_secret_data(&self, _: &str, _: &str) -> Result<BTreeMap<String, String>, Error> {
            unexpected()
        }
        async fn get_config_map(&self, _: &str, _: &str) -> Result<ConfigMap, Error> {
            unexpected()
        }
        async fn list_config_maps(&self, _: &str, _: &str) -> Result<Vec<ConfigMap>, Error> {
            unexpected()
        }
    }

    #[async_trait]
    impl ReleaseClient for Unreachable {
        async fn list_releases(&self, _: &str, _: &str) -> Result<Vec<ReleaseInfo>, Error> {
            unexpected()
        }
        async fn download(&self, _: &str) -> Result<Vec<u8>, Error> {
            unexpected()
        }
    }

    impl Renderer for Unreachable {
        fn render(
            &self,
            _: &[u8],
            _: &RenderOptions,
            _: &BTreeMap<String, String>,
        ) -> Result<Components, Error> {
            unexpected()
        }
    }

    #[async_trait]
    impl Installer for Unreachable {
        async fn ensure_prerequisites(&self) -> Result<(), Error> {
            unexpected()
        }
        async fn install(&self, _: &Components) -> Result<(), Error> {
            unexpected()
        }
        async fn delete(&self, _: &ProviderRecord, _: &DeleteOptions) -> Result<(), Error> {
            unexpected()
        }
    }

    #[async_trait]
    impl ProviderRecordStore for Unreachable {
        async fn get(&self, _: &ProviderIdentity) -> Result<Option<ProviderRecord>, Error> {
            unexpected()
        }
        async fn upsert(&self, _: &ProviderRecord) -> Result<(), Error> {
            unexpected()
        }
        async fn delete(&self, _: &ProviderIdentity) -> Result<(), Error> {
            unexpected()
        }
    }

    fn phase_context() -> PhaseContext {
        let stub = Arc::new(Unreachable);
        PhaseContext {
            config_source: stub.clone(),
            release_client: stub.clone(),
            renderer: stub.clone(),
            installer: stub.clone(),
            records: stub,
        }
    }

    fn context(kube: MockProviderClient, events: MockEventPublisher) -> Arc<Context> {
        Arc::new(Context {
            kube: Arc::new(kube),
            events: Arc::new(events),
            phases: phase_context(),
            settings: ControllerSettings::default(),
        })
    }

    fn core_provider(spec: ProviderSpec) -> CoreProvider {
        let mut obj = CoreProvider::new("cluster-api", CoreProviderSpec::from(spec));
        obj.metadata.namespace = Some("capi-system".to_string());
        obj.metadata.generation = Some(1);
        obj.metadata.finalizers = Some(vec![PROVIDER_FINALIZER.to_string()]);
        obj
    }

    fn installed_status(version: &str, generation: i64) -> ProviderStatus {
        let mut status = ProviderStatus {
            installed_version: Some(version.to_string()),
            observed_generation: Some(generation),
            contract: Some("v1beta1".to_string()),
            ..Default::default()
        };
        set_condition(
            &mut status.conditions,
            Condition::true_condition(PROVIDER_INSTALLED_CONDITION),
        );
        status
    }

    /// Captures every status written through the mock client
    fn capture_status(kube: &mut MockProviderClient) -> Arc<Mutex<Vec<ProviderStatus>>> {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        kube.expect_patch_status().returning(move |_, status| {
            sink.lock().unwrap().push(status.clone());
            Ok(())
        });
        captured
    }

    #[tokio::test]
    async fn new_provider_gets_finalizer_first() {
        let mut obj = core_provider(ProviderSpec::default());
        obj.metadata.finalizers = None;

        let mut kube = MockProviderClient::new();
        kube.expect_add_finalizer()
            .withf(|p| p.name == "cluster-api" && p.kind == ProviderKind::Core)
            .times(1)
            .returning(|_| Ok(()));

        let action = reconcile(Arc::new(obj), context(kube, MockEventPublisher::new()))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(FINALIZER_REQUEUE));
    }

    #[tokio::test]
    async fn up_to_date_provider_is_not_reinstalled() {
        let mut obj = core_provider(ProviderSpec {
            version: Some("v1.9.0".to_string()),
            ..Default::default()
        });
        obj.status = Some(installed_status("v1.9.0", 1));

        // No expectations: any client call would panic
        let ctx = context(MockProviderClient::new(), MockEventPublisher::new());
        let action = reconcile(Arc::new(obj), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.settings.requeue_after));
    }

    #[test]
    fn spec_change_invalidates_up_to_date() {
        let mut provider = Provider::new(ProviderKind::Core, "cluster-api", "capi-system");
        provider.generation = Some(2);
        provider.spec.version = Some("v1.10.0".to_string());
        provider.status = installed_status("v1.9.0", 1);
        assert!(!is_up_to_date(&provider));

        provider.status = installed_status("v1.9.0", 2);
        assert!(!is_up_to_date(&provider), "installed version still differs");

        provider.status = installed_status("v1.10.0", 2);
        assert!(is_up_to_date(&provider));
    }

    #[tokio::test]
    async fn story_malformed_version_is_reported_on_status() {
        let obj = core_provider(ProviderSpec {
            version: Some("latest-and-greatest".to_string()),
            ..Default::default()
        });

        let mut kube = MockProviderClient::new();
        kube.expect_list_providers().returning(|| Ok(Vec::new()));
        let statuses = capture_status(&mut kube);

        let mut events = MockEventPublisher::new();
        events
            .expect_publish()
            .withf(|_, type_, reason, action, _| {
                *type_ == EventType::Warning
                    && reason == condition_reasons::INCORRECT_VERSION_FORMAT
                    && action == actions::INSTALL
            })
            .times(1)
            .returning(|_, _, _, _, _| ());

        let err = reconcile(Arc::new(obj), context(kube, events)).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.reason(), Some(condition_reasons::INCORRECT_VERSION_FORMAT));

        let statuses = statuses.lock().unwrap();
        let condition = get_condition(&statuses[0].conditions, PREFLIGHT_CHECK_CONDITION).unwrap();
        assert_eq!(condition.reason, condition_reasons::INCORRECT_VERSION_FORMAT);
        assert_eq!(condition.severity, Some(ConditionSeverity::Error));
    }

    #[tokio::test]
    async fn story_failed_status_write_still_reports_phase_error() {
        let obj = core_provider(ProviderSpec {
            version: Some("nope".to_string()),
            ..Default::default()
        });

        let mut kube = MockProviderClient::new();
        kube.expect_list_providers().returning(|| Ok(Vec::new()));
        kube.expect_patch_status()
            .returning(|_, _| Err(Error::internal("apiserver unavailable")));
        let mut events = MockEventPublisher::new();
        events.expect_publish().returning(|_, _, _, _, _| ());

        let err = reconcile(Arc::new(obj), context(kube, events)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Phase(_)));
    }

    #[tokio::test]
    async fn infrastructure_provider_waits_for_core() {
        let mut obj = InfrastructureProvider::new("aws", InfrastructureProviderSpec::default());
        obj.metadata.namespace = Some("capa-system".to_string());
        obj.metadata.generation = Some(1);
        obj.metadata.finalizers = Some(vec![PROVIDER_FINALIZER.to_string()]);

        let mut kube = MockProviderClient::new();
        kube.expect_list_providers().returning(|| {
            Ok(vec![Provider::new(ProviderKind::Core, "cluster-api", "capi-system")])
        });
        let statuses = capture_status(&mut kube);

        let action = reconcile(Arc::new(obj), context(kube, MockEventPublisher::new()))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));

        let statuses = statuses.lock().unwrap();
        let condition = get_condition(&statuses[0].conditions, PREFLIGHT_CHECK_CONDITION).unwrap();
        assert_eq!(condition.reason, condition_reasons::WAITING_FOR_CORE_PROVIDER_READY);
    }

    #[tokio::test]
    async fn deleted_provider_without_finalizer_is_left_alone() {
        let mut obj = core_provider(ProviderSpec::default());
        obj.metadata.finalizers = None;
        obj.metadata.deletion_timestamp = Some(Time(Utc::now()));

        let ctx = context(MockProviderClient::new(), MockEventPublisher::new());
        let action = reconcile(Arc::new(obj), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[test]
    fn transient_failures_retry_quickly() {
        let ctx = context(MockProviderClient::new(), MockEventPublisher::new());
        let err = ReconcileError::Operator(Error::internal("connection refused"));

        let action = error_policy(Arc::new(core_provider(ProviderSpec::default())), &err, ctx.clone());
        assert_eq!(action, Action::requeue(ctx.settings.error_requeue_after));
    }

    #[test]
    fn validation_failures_wait_for_spec_change() {
        let ctx = context(MockProviderClient::new(), MockEventPublisher::new());
        let err = ReconcileError::Phase(PhaseError::new(
            Error::validation_for("cluster-api", "bad version"),
            condition_reasons::INCORRECT_VERSION_FORMAT,
            PREFLIGHT_CHECK_CONDITION,
            ConditionSeverity::Error,
        ));

        let action = error_policy(Arc::new(core_provider(ProviderSpec::default())), &err, ctx);
        assert_eq!(action, Action::await_change());
    }
}
