//! The phase pipeline
//!
//! A [`PhaseReconciler`] drives one provider through an ordered list of
//! phases over shared state. Each phase returns [`PhaseOutcome::Continue`],
//! a requeue, or a [`PhaseError`] naming the condition it should be reported
//! under. Nothing is cached across passes: every pass starts again from
//! preflight (or load, when deleting).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use capi_operator_common::crd::{
    reasons, set_condition, Condition, ConditionSeverity, Provider,
    PREFLIGHT_CHECK_CONDITION, PROVIDER_INSTALLED_CONDITION,
};
use capi_operator_common::{Error, SemanticVersion};
use capi_operator_repository::{
    resolve_contract, select_config_map, selector_string, ConfigClient, ConfigSource,
    InMemoryRepository, ProviderConfig, ReleaseClient, RemoteRegistryRepository, Repository,
    METADATA_FILE,
};

use crate::components::{Components, RenderOptions, Renderer};
use crate::customize::customize_components;
use crate::error::{wrap_phase_error, PhaseError};
use crate::installer::{DeleteOptions, Installer};
use crate::preflight;
use crate::record::{identity_for, ProviderIdentity, ProviderRecord, ProviderRecordStore};

/// One step of the pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Spec and sibling validation
    PreflightChecks,
    /// Variables, registry entry, repository, target version and contract
    Load,
    /// Components download, rendering and customization
    Fetch,
    /// Prerequisites and upgrade detection
    PreInstall,
    /// Apply components
    Install,
    /// Remove installed components
    Delete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::PreflightChecks => "preflight",
            Phase::Load => "load",
            Phase::Fetch => "fetch",
            Phase::PreInstall => "pre-install",
            Phase::Install => "install",
            Phase::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Phases run to install or upgrade a provider
pub const INSTALL_PHASES: [Phase; 5] = [
    Phase::PreflightChecks,
    Phase::Load,
    Phase::Fetch,
    Phase::PreInstall,
    Phase::Install,
];

/// Phases run when a provider is deleted
pub const DELETE_PHASES: [Phase; 2] = [Phase::Load, Phase::Delete];

/// What a successful phase asks of the pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Go on to the next phase; from a whole pipeline, everything ran
    Continue,
    /// Stop here and try the whole pipeline again later
    Requeue(Duration),
}

/// Collaborators shared by every pipeline run
#[derive(Clone)]
pub struct PhaseContext {
    /// Secrets and ConfigMaps
    pub config_source: Arc<dyn ConfigSource>,
    /// HTTP access to release registries
    pub release_client: Arc<dyn ReleaseClient>,
    /// Manifest renderer
    pub renderer: Arc<dyn Renderer>,
    /// Applies and removes components
    pub installer: Arc<dyn Installer>,
    /// Installed-provider records
    pub records: Arc<dyn ProviderRecordStore>,
}

/// Where a provider's repository comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepositorySource {
    /// One ConfigMap addressed by name
    ConfigMap {
        /// ConfigMap namespace
        namespace: String,
        /// ConfigMap name
        name: String,
    },
    /// ConfigMaps in the provider's namespace matching a label selector
    LabelSelector(String),
    /// Release assets from the provider's registry URL
    Remote,
}

/// Pick the repository variant for `provider` from its fetch configuration
pub fn repository_source(provider: &Provider) -> RepositorySource {
    let Some(fetch) = &provider.spec.fetch_config else {
        return RepositorySource::Remote;
    };
    if let Some(cm) = &fetch.config_map {
        return RepositorySource::ConfigMap {
            namespace: cm.namespace_or(&provider.namespace).to_string(),
            name: cm.name.clone(),
        };
    }
    match selector_string(fetch) {
        Some(selector) => RepositorySource::LabelSelector(selector),
        None => RepositorySource::Remote,
    }
}

/// Whether installing `next` over `record` needs the old components removed
/// first.
///
/// Only a strict upgrade does. A missing record, a record without a
/// version, an equal version and a downgrade all install in place.
pub fn requires_pre_deletion(record: Option<&ProviderRecord>, next: &str) -> Result<bool, Error> {
    let Some(record) = record else {
        return Ok(false);
    };
    if record.version.is_empty() {
        return Ok(false);
    }
    let next = SemanticVersion::parse(next)?;
    let current = SemanticVersion::parse(&record.version)?;
    Ok(current.less_than(&next))
}

/// Drives one provider through the pipeline
pub struct PhaseReconciler {
    ctx: PhaseContext,
    provider: Provider,
    providers: Vec<Provider>,
    config: Option<ConfigClient>,
    provider_config: Option<ProviderConfig>,
    repo: Option<Arc<dyn Repository>>,
    version: Option<String>,
    contract: Option<String>,
    components: Option<Components>,
    record: Option<ProviderRecord>,
}

impl PhaseReconciler {
    /// A reconciler for `provider`; `providers` is every provider in the
    /// cluster, used by preflight checks
    pub fn new(ctx: PhaseContext, provider: Provider, providers: Vec<Provider>) -> Self {
        Self {
            ctx,
            provider,
            providers,
            config: None,
            provider_config: None,
            repo: None,
            version: None,
            contract: None,
            components: None,
            record: None,
        }
    }

    /// The provider, with whatever spec and status changes phases made
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Consume the reconciler, returning the updated provider
    pub fn into_provider(self) -> Provider {
        self.provider
    }

    /// Target version resolved by load
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Contract resolved by load
    pub fn contract(&self) -> Option<&str> {
        self.contract.as_deref()
    }

    /// Components produced by fetch
    pub fn components(&self) -> Option<&Components> {
        self.components.as_ref()
    }

    /// The installation this provider maps to
    pub fn identity(&self) -> ProviderIdentity {
        identity_for(self.provider.kind, &self.provider.name, &self.provider.namespace)
    }

    /// Run the install pipeline.
    ///
    /// On failure the matching False condition is already set on the
    /// provider.
    #[instrument(skip(self), fields(provider = %self.provider.key(), kind = %self.provider.kind))]
    pub async fn reconcile(&mut self) -> Result<PhaseOutcome, PhaseError> {
        self.run(&INSTALL_PHASES).await
    }

    /// Run the deletion pipeline
    #[instrument(skip(self), fields(provider = %self.provider.key(), kind = %self.provider.kind))]
    pub async fn reconcile_delete(&mut self) -> Result<PhaseOutcome, PhaseError> {
        self.run(&DELETE_PHASES).await
    }

    async fn run(&mut self, phases: &[Phase]) -> Result<PhaseOutcome, PhaseError> {
        for phase in phases {
            debug!(phase = %phase, "running phase");
            match self.run_phase(*phase).await {
                Ok(PhaseOutcome::Continue) => {}
                Ok(requeue @ PhaseOutcome::Requeue(after)) => {
                    debug!(phase = %phase, after = ?after, "phase requested requeue");
                    return Ok(requeue);
                }
                Err(err) => {
                    self.mark_failed(&err);
                    return Err(err);
                }
            }
        }
        Ok(PhaseOutcome::Continue)
    }

    async fn run_phase(&mut self, phase: Phase) -> Result<PhaseOutcome, PhaseError> {
        match phase {
            Phase::PreflightChecks => self.preflight_checks(),
            Phase::Load => self.load().await,
            Phase::Fetch => self.fetch().await,
            Phase::PreInstall => self.pre_install().await,
            Phase::Install => self.install().await,
            Phase::Delete => self.delete().await,
        }
    }

    /// Record `err` as a False condition on the provider
    pub fn mark_failed(&mut self, err: &PhaseError) {
        set_condition(&mut self.provider.status.conditions, err.to_condition());
    }

    /// Validate the provider spec and its siblings
    pub fn preflight_checks(&mut self) -> Result<PhaseOutcome, PhaseError> {
        preflight::preflight_checks(&mut self.provider, &self.providers)
    }

    /// Resolve variables, registry entry, repository, target version and
    /// contract
    pub async fn load(&mut self) -> Result<PhaseOutcome, PhaseError> {
        debug!(provider = %self.provider.name, "loading provider");

        let config = wrap_phase_error(
            self.config_client().await,
            reasons::SECRET_READER_ERROR,
            PREFLIGHT_CHECK_CONDITION,
        )?;

        let provider_config = wrap_phase_error(
            config.providers().get(&self.provider.name, self.provider.kind),
            reasons::UNKNOWN_PROVIDER,
            PREFLIGHT_CHECK_CONDITION,
        )?;

        let repo = wrap_phase_error(
            self.repository(&provider_config).await,
            reasons::REPOSITORY_ERROR,
            PREFLIGHT_CHECK_CONDITION,
        )?;

        let version = self
            .provider
            .spec
            .version
            .clone()
            .unwrap_or_else(|| repo.default_version());

        let contract = wrap_phase_error(
            self.validate_contract(repo.as_ref(), &version).await,
            reasons::CAPI_VERSION_INCOMPATIBILITY,
            PREFLIGHT_CHECK_CONDITION,
        )?;

        debug!(
            provider = %self.provider.name,
            version = %version,
            contract = %contract,
            "loaded provider"
        );
        self.config = Some(config);
        self.provider_config = Some(provider_config);
        self.repo = Some(repo);
        self.version = Some(version);
        self.contract = Some(contract);
        Ok(PhaseOutcome::Continue)
    }

    /// Configuration variables from the provider's Secret, plus its fetch URL
    /// registered in the provider registry
    async fn config_client(&self) -> Result<ConfigClient, Error> {
        let spec = &self.provider.spec;
        let variables = match &spec.secret_name {
            Some(secret) => {
                self.ctx
                    .config_source
                    .get_secret_data(&self.provider.namespace, secret)
                    .await?
            }
            None => {
                debug!(provider = %self.provider.name, "no configuration secret specified");
                Default::default()
            }
        };

        let mut config = ConfigClient::from_variables(variables);
        if let Some(url) = spec.fetch_config.as_ref().and_then(|f| f.url.as_deref()) {
            debug!(provider = %self.provider.name, url = %url, "using custom fetch url");
            config.add_provider(&self.provider.name, self.provider.kind, url)?;
        }
        Ok(config)
    }

    async fn repository(&self, provider_config: &ProviderConfig) -> Result<Arc<dyn Repository>, Error> {
        match repository_source(&self.provider) {
            RepositorySource::ConfigMap { namespace, name } => {
                debug!(provider = %self.provider.name, configmap = %name, "fetching components from ConfigMap");
                let cm = self.ctx.config_source.get_config_map(&namespace, &name).await?;
                Ok(Arc::new(InMemoryRepository::from_config_map(&cm)?))
            }
            RepositorySource::LabelSelector(selector) => {
                debug!(provider = %self.provider.name, selector = %selector, "selecting components ConfigMap");
                let candidates = self
                    .ctx
                    .config_source
                    .list_config_maps(&self.provider.namespace, &selector)
                    .await?;
                let cm = select_config_map(candidates, self.provider.spec.version.as_deref(), &selector)?;
                Ok(Arc::new(InMemoryRepository::from_config_map(&cm)?))
            }
            RepositorySource::Remote => {
                let repo =
                    RemoteRegistryRepository::new(&provider_config.url, self.ctx.release_client.clone())
                        .await?;
                Ok(Arc::new(repo))
            }
        }
    }

    async fn validate_contract(&self, repo: &dyn Repository, version: &str) -> Result<String, Error> {
        let name = &self.provider.name;
        let metadata = repo.get_file(version, METADATA_FILE).await.map_err(|e| {
            Error::components_fetch(
                name,
                format!(
                    "failed to read {:?} from the repository for provider {:?}: {}",
                    METADATA_FILE, name, e
                ),
            )
        })?;
        resolve_contract(&metadata, version, name)
    }

    /// Download, render and customize the components at the target version
    pub async fn fetch(&mut self) -> Result<PhaseOutcome, PhaseError> {
        info!(provider = %self.provider.name, "fetching provider");

        let fetched = self.fetch_components().await;
        let components = wrap_phase_error(
            fetched,
            reasons::COMPONENTS_FETCH_ERROR,
            PREFLIGHT_CHECK_CONDITION,
        )?;

        self.components = Some(components);
        set_condition(
            &mut self.provider.status.conditions,
            Condition::true_condition(PREFLIGHT_CHECK_CONDITION),
        );
        Ok(PhaseOutcome::Continue)
    }

    async fn fetch_components(&self) -> Result<Components, Error> {
        let (Some(config), Some(provider_config), Some(repo), Some(version)) = (
            &self.config,
            &self.provider_config,
            &self.repo,
            &self.version,
        ) else {
            return Err(not_loaded(Phase::Fetch));
        };

        let path = repo.components_path();
        let raw = repo.get_file(version, &path).await.map_err(|e| {
            Error::components_fetch(
                &self.provider.name,
                format!(
                    "failed to read {:?} from provider's repository {:?}: {}",
                    path,
                    provider_config.manifest_label(),
                    e
                ),
            )
        })?;

        let options = RenderOptions {
            version: version.clone(),
            identity: self.identity(),
            manifest_path: path,
        };
        let components = self.ctx.renderer.render(&raw, &options, config.variables())?;
        customize_components(components, &self.provider.spec)
    }

    /// Ensure prerequisites, then remove the old components when this is an
    /// upgrade
    pub async fn pre_install(&mut self) -> Result<PhaseOutcome, PhaseError> {
        debug!(provider = %self.provider.name, "ensuring prerequisites");
        wrap_phase_error(
            self.ctx.installer.ensure_prerequisites().await,
            reasons::PREREQUISITES_ERROR,
            PROVIDER_INSTALLED_CONDITION,
        )?;

        let needs_pre_delete = wrap_phase_error(
            self.update_requires_pre_deletion().await,
            reasons::RECORD_READ_ERROR,
            PROVIDER_INSTALLED_CONDITION,
        )?;
        if !needs_pre_delete {
            return Ok(PhaseOutcome::Continue);
        }

        info!(
            provider = %self.provider.name,
            from = self.record.as_ref().map(|r| r.version.as_str()).unwrap_or_default(),
            to = self.version.as_deref().unwrap_or_default(),
            "upgrade detected, removing old components"
        );
        self.delete().await
    }

    /// Read the installed record and decide whether the fetched version is
    /// an upgrade over it
    pub async fn update_requires_pre_deletion(&mut self) -> Result<bool, Error> {
        let Some(components) = &self.components else {
            return Err(not_loaded(Phase::PreInstall));
        };
        let next = components.version().to_string();

        let record = self.ctx.records.get(&self.identity()).await?;
        let required = requires_pre_deletion(record.as_ref(), &next)?;
        self.record = record;
        Ok(required)
    }

    /// Apply the components, then pin the version and record contract and
    /// generation on the provider
    pub async fn install(&mut self) -> Result<PhaseOutcome, PhaseError> {
        let Some(components) = &self.components else {
            return Err(PhaseError::new(
                not_loaded(Phase::Install),
                reasons::INSTALL_FAILED,
                PROVIDER_INSTALLED_CONDITION,
                ConditionSeverity::Warning,
            ));
        };

        info!(provider = %self.provider.name, version = %components.version(), "installing provider");
        if let Err(e) = self.ctx.installer.install(components).await {
            let reason = if e.is_timeout() {
                reasons::INSTALL_TIMED_OUT
            } else {
                reasons::INSTALL_FAILED
            };
            return wrap_phase_error(Err(e), reason, PROVIDER_INSTALLED_CONDITION);
        }

        let version = components.version().to_string();
        if self.provider.spec.version.is_none() {
            self.provider.spec.version = Some(version.clone());
        }
        let status = &mut self.provider.status;
        status.contract = self.contract.clone();
        status.observed_generation = self.provider.generation;
        status.installed_version = Some(version);
        set_condition(
            &mut status.conditions,
            Condition::true_condition(PROVIDER_INSTALLED_CONDITION),
        );

        info!(provider = %self.provider.name, "provider successfully installed");
        Ok(PhaseOutcome::Continue)
    }

    /// Remove the provider's components, keeping its namespace and CRDs.
    ///
    /// Uses the record read during pre-install when there is one; otherwise
    /// deletes under this provider's identity at the target version.
    pub async fn delete(&mut self) -> Result<PhaseOutcome, PhaseError> {
        let record = match &self.record {
            Some(record) => record.clone(),
            None => ProviderRecord {
                identity: self.identity(),
                version: self.version.clone().unwrap_or_default(),
            },
        };

        info!(provider = %record.identity.name, version = %record.version, "deleting provider");
        let options = DeleteOptions {
            include_namespace: false,
            include_crds: false,
        };
        wrap_phase_error(
            self.ctx.installer.delete(&record, &options).await,
            reasons::OLD_COMPONENTS_DELETION_ERROR,
            PROVIDER_INSTALLED_CONDITION,
        )?;
        Ok(PhaseOutcome::Continue)
    }
}

fn not_loaded(phase: Phase) -> Error {
    Error::internal_with_context(phase.to_string(), "provider was not loaded")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use capi_operator_common::crd::{
        get_condition, is_true, ConditionStatus, ConfigMapReference, FetchConfiguration,
        ProviderKind,
    };
    use capi_operator_common::VERSION_LABEL;
    use capi_operator_repository::ReleaseInfo;

    use crate::components::TemplateRenderer;
    use crate::installer::MockInstaller;
    use crate::record::MockProviderRecordStore;

    const METADATA: &str = r#"
apiVersion: clusterctl.cluster.x-k8s.io/v1alpha3
kind: Metadata
releaseSeries:
  - major: 0
    minor: 9
    contract: v1alpha4
  - major: 1
    minor: 0
    contract: v1beta1
  - major: 2
    minor: 0
    contract: v1beta1
  - major: 3
    minor: 0
    contract: v1beta2
"#;

    const COMPONENTS: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: capi-system
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: capi-controller-manager
  namespace: capi-system
spec:
  selector:
    matchLabels:
      app: capi
  template:
    metadata:
      labels:
        app: capi
    spec:
      containers:
        - name: manager
          image: registry.k8s.io/cluster-api/cluster-api-controller:v2.0.0
          args:
            - --feature-gates=MachinePool=${EXP_MACHINE_POOL:=false}
"#;

    const CAPI_RELEASES: &str = "https://github.com/kubernetes-sigs/cluster-api/releases/download";

    #[derive(Default)]
    struct FakeConfigSource {
        secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
        config_maps: Vec<ConfigMap>,
    }

    #[async_trait]
    impl ConfigSource for FakeConfigSource {
        async fn get_secret_data(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<BTreeMap<String, String>, Error> {
            self.secrets
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
                .ok_or_else(|| Error::not_found("Secret", format!("{}/{}", namespace, name)))
        }

        async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, Error> {
            self.config_maps
                .iter()
                .find(|cm| {
                    cm.metadata.namespace.as_deref() == Some(namespace)
                        && cm.metadata.name.as_deref() == Some(name)
                })
                .cloned()
                .ok_or_else(|| Error::not_found("ConfigMap", format!("{}/{}", namespace, name)))
        }

        async fn list_config_maps(
            &self,
            namespace: &str,
            _label_selector: &str,
        ) -> Result<Vec<ConfigMap>, Error> {
            Ok(self
                .config_maps
                .iter()
                .filter(|cm| cm.metadata.namespace.as_deref() == Some(namespace))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeReleaseClient {
        releases: Vec<ReleaseInfo>,
        assets: BTreeMap<String, Vec<u8>>,
    }

    impl FakeReleaseClient {
        fn capi(versions: &[&str]) -> Self {
            let mut client = Self::default();
            for version in versions {
                client.releases.push(ReleaseInfo {
                    tag_name: version.to_string(),
                    prerelease: version.contains('-'),
                    draft: false,
                });
                client.assets.insert(
                    format!("{}/{}/metadata.yaml", CAPI_RELEASES, version),
                    METADATA.as_bytes().to_vec(),
                );
                client.assets.insert(
                    format!("{}/{}/core-components.yaml", CAPI_RELEASES, version),
                    COMPONENTS.as_bytes().to_vec(),
                );
            }
            client
        }
    }

    #[async_trait]
    impl ReleaseClient for FakeReleaseClient {
        async fn list_releases(&self, _owner: &str, _repo: &str) -> Result<Vec<ReleaseInfo>, Error> {
            Ok(self.releases.clone())
        }

        async fn download(&self, url: &str) -> Result<Vec<u8>, Error> {
            self.assets
                .get(url)
                .cloned()
                .ok_or_else(|| Error::not_found("release asset", url))
        }
    }

    fn components_config_map(namespace: &str, name: &str, version: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: version.map(|v| BTreeMap::from([(VERSION_LABEL.to_string(), v.to_string())])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                ("metadata".to_string(), METADATA.to_string()),
                ("components".to_string(), COMPONENTS.to_string()),
            ])),
            ..Default::default()
        }
    }

    fn context(
        source: FakeConfigSource,
        releases: FakeReleaseClient,
        installer: MockInstaller,
        records: MockProviderRecordStore,
    ) -> PhaseContext {
        PhaseContext {
            config_source: Arc::new(source),
            release_client: Arc::new(releases),
            renderer: Arc::new(TemplateRenderer),
            installer: Arc::new(installer),
            records: Arc::new(records),
        }
    }

    fn core_provider() -> Provider {
        let mut provider = Provider::new(ProviderKind::Core, "cluster-api", "capi-system");
        provider.generation = Some(1);
        provider
    }

    fn reconciler(ctx: PhaseContext, provider: Provider) -> PhaseReconciler {
        let providers = vec![provider.clone()];
        PhaseReconciler::new(ctx, provider, providers)
    }

    fn record(version: &str) -> ProviderRecord {
        ProviderRecord {
            identity: identity_for(ProviderKind::Core, "cluster-api", "capi-system"),
            version: version.to_string(),
        }
    }

    #[test]
    fn repository_source_follows_fetch_config() {
        let mut provider = core_provider();
        assert_eq!(repository_source(&provider), RepositorySource::Remote);

        provider.spec.fetch_config = Some(FetchConfiguration {
            url: Some("https://github.com/acme/capi/releases/latest/core-components.yaml".to_string()),
            ..Default::default()
        });
        assert_eq!(repository_source(&provider), RepositorySource::Remote);

        provider.spec.fetch_config = Some(FetchConfiguration {
            match_labels: Some(BTreeMap::from([("provider".to_string(), "capi".to_string())])),
            ..Default::default()
        });
        assert_eq!(
            repository_source(&provider),
            RepositorySource::LabelSelector("provider=capi".to_string())
        );

        provider.spec.fetch_config = Some(FetchConfiguration {
            config_map: Some(ConfigMapReference {
                name: "capi-v1".to_string(),
                namespace: None,
            }),
            ..Default::default()
        });
        assert_eq!(
            repository_source(&provider),
            RepositorySource::ConfigMap {
                namespace: "capi-system".to_string(),
                name: "capi-v1".to_string(),
            }
        );
    }

    #[test]
    fn pre_deletion_only_on_strict_upgrade() {
        let cases = [
            (None, "v1.0.0", false),
            (Some(record("")), "v1.0.0", false),
            (Some(record("v0.9.0")), "v1.0.0", true),
            (Some(record("v1.0.0")), "v1.0.0", false),
            (Some(record("v1.1.0")), "v1.0.0", false),
            (Some(record("v1.0.0-rc.1")), "v1.0.0", true),
        ];
        for (current, next, expected) in cases {
            assert_eq!(
                requires_pre_deletion(current.as_ref(), next).unwrap(),
                expected,
                "{:?} -> {}",
                current.map(|r| r.version),
                next
            );
        }
    }

    #[test]
    fn pre_deletion_rejects_unparseable_record_version() {
        let err = requires_pre_deletion(Some(&record("latest")), "v1.0.0").unwrap_err();
        assert!(matches!(err, Error::InvalidVersion { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn fresh_install_pins_default_version() {
        let mut installer = MockInstaller::new();
        installer.expect_ensure_prerequisites().times(1).returning(|| Ok(()));
        installer
            .expect_install()
            .withf(|c: &Components| c.version() == "v2.0.0" && c.deployments().len() == 1)
            .times(1)
            .returning(|_| Ok(()));
        installer.expect_delete().never();
        let mut records = MockProviderRecordStore::new();
        records.expect_get().times(1).returning(|_| Ok(None));

        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::capi(&["v1.0.0", "v2.0.0", "v2.1.0-rc.1"]),
            installer,
            records,
        );
        let mut phases = reconciler(ctx, core_provider());

        assert_eq!(phases.reconcile().await.unwrap(), PhaseOutcome::Continue);

        let provider = phases.into_provider();
        assert_eq!(provider.spec.version.as_deref(), Some("v2.0.0"));
        assert_eq!(provider.status.contract.as_deref(), Some("v1beta1"));
        assert_eq!(provider.status.installed_version.as_deref(), Some("v2.0.0"));
        assert_eq!(provider.status.observed_generation, Some(1));
        assert!(is_true(&provider.status.conditions, PREFLIGHT_CHECK_CONDITION));
        assert!(is_true(&provider.status.conditions, PROVIDER_INSTALLED_CONDITION));
    }

    #[tokio::test]
    async fn pinned_version_is_kept() {
        let mut installer = MockInstaller::new();
        installer.expect_ensure_prerequisites().returning(|| Ok(()));
        installer
            .expect_install()
            .withf(|c: &Components| c.version() == "v1.0.0")
            .returning(|_| Ok(()));
        let mut records = MockProviderRecordStore::new();
        records.expect_get().returning(|_| Ok(None));

        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::capi(&["v1.0.0", "v2.0.0"]),
            installer,
            records,
        );
        let mut provider = core_provider();
        provider.spec.version = Some("v1.0.0".to_string());
        let mut phases = reconciler(ctx, provider);

        phases.reconcile().await.unwrap();
        assert_eq!(phases.provider().spec.version.as_deref(), Some("v1.0.0"));
    }

    #[tokio::test]
    async fn pinned_prerelease_loads_when_nothing_is_stable() {
        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::capi(&["v2.0.0-rc.1"]),
            MockInstaller::new(),
            MockProviderRecordStore::new(),
        );
        let mut provider = core_provider();
        provider.spec.version = Some("v2.0.0-rc.1".to_string());
        let mut phases = reconciler(ctx, provider);

        phases.load().await.unwrap();
        assert_eq!(phases.version(), Some("v2.0.0-rc.1"));
        assert_eq!(phases.contract(), Some("v1beta1"));
    }

    #[tokio::test]
    async fn upgrade_deletes_old_components_first() {
        let mut installer = MockInstaller::new();
        installer.expect_ensure_prerequisites().returning(|| Ok(()));
        installer
            .expect_delete()
            .withf(|record: &ProviderRecord, options: &DeleteOptions| {
                record.version == "v1.0.0"
                    && record.identity.name == "cluster-api"
                    && !options.include_namespace
                    && !options.include_crds
            })
            .times(1)
            .returning(|_, _| Ok(()));
        installer.expect_install().times(1).returning(|_| Ok(()));
        let mut records = MockProviderRecordStore::new();
        records
            .expect_get()
            .returning(|identity| {
                Ok(Some(ProviderRecord {
                    identity: identity.clone(),
                    version: "v1.0.0".to_string(),
                }))
            });

        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::capi(&["v1.0.0", "v2.0.0"]),
            installer,
            records,
        );
        let mut phases = reconciler(ctx, core_provider());
        phases.reconcile().await.unwrap();
        assert_eq!(phases.provider().status.installed_version.as_deref(), Some("v2.0.0"));
    }

    #[tokio::test]
    async fn same_version_reinstalls_in_place() {
        let mut installer = MockInstaller::new();
        installer.expect_ensure_prerequisites().returning(|| Ok(()));
        installer.expect_delete().never();
        installer.expect_install().times(1).returning(|_| Ok(()));
        let mut records = MockProviderRecordStore::new();
        records
            .expect_get()
            .returning(|identity| {
                Ok(Some(ProviderRecord {
                    identity: identity.clone(),
                    version: "v2.0.0".to_string(),
                }))
            });

        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::capi(&["v2.0.0"]),
            installer,
            records,
        );
        let mut phases = reconciler(ctx, core_provider());
        phases.reconcile().await.unwrap();
    }

    #[tokio::test]
    async fn story_install_timeout_has_distinct_reason() {
        let mut installer = MockInstaller::new();
        installer.expect_ensure_prerequisites().returning(|| Ok(()));
        installer
            .expect_install()
            .returning(|_| Err(Error::install_timeout("cluster-api", "deployments not available")));
        let mut records = MockProviderRecordStore::new();
        records.expect_get().returning(|_| Ok(None));

        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::capi(&["v2.0.0"]),
            installer,
            records,
        );
        let mut phases = reconciler(ctx, core_provider());
        let err = phases.reconcile().await.unwrap_err();

        assert_eq!(err.reason, reasons::INSTALL_TIMED_OUT);
        assert_eq!(err.condition, PROVIDER_INSTALLED_CONDITION);
        assert_eq!(err.severity, ConditionSeverity::Warning);
        assert!(err.is_retryable());

        let provider = phases.into_provider();
        assert_eq!(provider.spec.version, None);
        let condition = get_condition(&provider.status.conditions, PROVIDER_INSTALLED_CONDITION).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, reasons::INSTALL_TIMED_OUT);
        assert!(is_true(&provider.status.conditions, PREFLIGHT_CHECK_CONDITION));
    }

    #[tokio::test]
    async fn story_generic_install_failure() {
        let mut installer = MockInstaller::new();
        installer.expect_ensure_prerequisites().returning(|| Ok(()));
        installer
            .expect_install()
            .returning(|_| Err(Error::install("cluster-api", "apply rejected")));
        let mut records = MockProviderRecordStore::new();
        records.expect_get().returning(|_| Ok(None));

        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::capi(&["v2.0.0"]),
            installer,
            records,
        );
        let err = reconciler(ctx, core_provider()).reconcile().await.unwrap_err();
        assert_eq!(err.reason, reasons::INSTALL_FAILED);
    }

    #[tokio::test]
    async fn story_missing_secret_fails_load() {
        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::capi(&["v2.0.0"]),
            MockInstaller::new(),
            MockProviderRecordStore::new(),
        );
        let mut provider = core_provider();
        provider.spec.secret_name = Some("capi-variables".to_string());

        let err = reconciler(ctx, provider).load().await.unwrap_err();
        assert_eq!(err.reason, reasons::SECRET_READER_ERROR);
        assert_eq!(err.condition, PREFLIGHT_CHECK_CONDITION);
        assert!(err.cause.is_not_found());
    }

    #[tokio::test]
    async fn story_unknown_provider_fails_load() {
        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::default(),
            MockInstaller::new(),
            MockProviderRecordStore::new(),
        );
        let provider = Provider::new(ProviderKind::Infrastructure, "acme-cloud", "acme-system");

        let err = reconciler(ctx, provider).load().await.unwrap_err();
        assert_eq!(err.reason, reasons::UNKNOWN_PROVIDER);
    }

    #[tokio::test]
    async fn fetch_url_registers_unknown_provider() {
        let mut releases = FakeReleaseClient::default();
        releases.assets.insert(
            "https://github.com/acme/cluster-api-provider-acme/releases/download/v1.0.0/metadata.yaml"
                .to_string(),
            METADATA.as_bytes().to_vec(),
        );
        let ctx = context(
            FakeConfigSource::default(),
            releases,
            MockInstaller::new(),
            MockProviderRecordStore::new(),
        );
        let mut provider = Provider::new(ProviderKind::Infrastructure, "acme", "acme-system");
        provider.spec.fetch_config = Some(FetchConfiguration {
            url: Some(
                "https://github.com/acme/cluster-api-provider-acme/releases/download/v1.0.0/infrastructure-components.yaml"
                    .to_string(),
            ),
            ..Default::default()
        });

        let mut phases = reconciler(ctx, provider);
        phases.load().await.unwrap();
        assert_eq!(phases.version(), Some("v1.0.0"));
        assert_eq!(phases.contract(), Some("v1beta1"));
    }

    #[tokio::test]
    async fn story_incompatible_contract_fails_load() {
        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::capi(&["v3.0.0"]),
            MockInstaller::new(),
            MockProviderRecordStore::new(),
        );
        let err = reconciler(ctx, core_provider()).load().await.unwrap_err();
        assert_eq!(err.reason, reasons::CAPI_VERSION_INCOMPATIBILITY);
        assert!(err.cause.to_string().contains("v1beta2"));
    }

    #[tokio::test]
    async fn config_map_repository_by_name() {
        let source = FakeConfigSource {
            config_maps: vec![components_config_map("capi-system", "v1.0.0", None)],
            ..Default::default()
        };
        let ctx = context(source, FakeReleaseClient::default(), MockInstaller::new(), MockProviderRecordStore::new());
        let mut provider = core_provider();
        provider.spec.fetch_config = Some(FetchConfiguration {
            config_map: Some(ConfigMapReference {
                name: "v1.0.0".to_string(),
                namespace: None,
            }),
            ..Default::default()
        });

        let mut phases = reconciler(ctx, provider);
        phases.load().await.unwrap();
        phases.fetch().await.unwrap();

        assert_eq!(phases.version(), Some("v1.0.0"));
        let components = phases.components().unwrap();
        assert_eq!(components.manifest_path(), "components.yaml");
        assert_eq!(components.target_namespace(), "capi-system");
        assert!(is_true(&phases.provider().status.conditions, PREFLIGHT_CHECK_CONDITION));
    }

    #[tokio::test]
    async fn config_map_selection_picks_highest_version() {
        let source = FakeConfigSource {
            config_maps: vec![
                components_config_map("capi-system", "capi-old", Some("v1.0.0")),
                components_config_map("capi-system", "capi-new", Some("v2.0.0")),
            ],
            ..Default::default()
        };
        let ctx = context(source, FakeReleaseClient::default(), MockInstaller::new(), MockProviderRecordStore::new());
        let mut provider = core_provider();
        provider.spec.fetch_config = Some(FetchConfiguration {
            match_labels: Some(BTreeMap::from([("provider".to_string(), "capi".to_string())])),
            ..Default::default()
        });

        let mut phases = reconciler(ctx, provider);
        phases.load().await.unwrap();
        assert_eq!(phases.version(), Some("v2.0.0"));
    }

    #[tokio::test]
    async fn story_config_map_without_metadata_fails_load() {
        let mut cm = components_config_map("capi-system", "v1.0.0", None);
        if let Some(data) = cm.data.as_mut() {
            data.remove("metadata");
        }
        let source = FakeConfigSource {
            config_maps: vec![cm],
            ..Default::default()
        };
        let ctx = context(source, FakeReleaseClient::default(), MockInstaller::new(), MockProviderRecordStore::new());
        let mut provider = core_provider();
        provider.spec.fetch_config = Some(FetchConfiguration {
            config_map: Some(ConfigMapReference {
                name: "v1.0.0".to_string(),
                namespace: None,
            }),
            ..Default::default()
        });

        let err = reconciler(ctx, provider).load().await.unwrap_err();
        assert_eq!(err.reason, reasons::REPOSITORY_ERROR);
        assert!(matches!(err.cause, Error::MissingKey { .. }));
        assert!(err.cause.to_string().contains("metadata"));
    }

    #[tokio::test]
    async fn story_bad_config_map_version_label_is_retried() {
        let mut cm = components_config_map("capi-system", "v1.0.0", None);
        cm.metadata.labels = Some(BTreeMap::from([(VERSION_LABEL.to_string(), "next".to_string())]));
        let source = FakeConfigSource {
            config_maps: vec![cm],
            ..Default::default()
        };
        let ctx = context(source, FakeReleaseClient::default(), MockInstaller::new(), MockProviderRecordStore::new());
        let mut provider = core_provider();
        provider.spec.fetch_config = Some(FetchConfiguration {
            config_map: Some(ConfigMapReference {
                name: "v1.0.0".to_string(),
                namespace: None,
            }),
            ..Default::default()
        });

        let err = reconciler(ctx, provider).load().await.unwrap_err();
        assert_eq!(err.reason, reasons::REPOSITORY_ERROR);
        assert!(matches!(err.cause, Error::InvalidVersion { .. }));
        assert!(err.cause.to_string().contains("from the Label"));
        assert!(err.is_retryable(), "relabelling the ConfigMap is not a provider change");
    }

    #[tokio::test]
    async fn story_corrupt_release_metadata_is_retried() {
        let mut releases = FakeReleaseClient::capi(&["v2.0.0"]);
        releases.assets.insert(
            format!("{}/v2.0.0/metadata.yaml", CAPI_RELEASES),
            b"releaseSeries: [unterminated".to_vec(),
        );
        let ctx = context(FakeConfigSource::default(), releases, MockInstaller::new(), MockProviderRecordStore::new());

        let err = reconciler(ctx, core_provider()).load().await.unwrap_err();
        assert_eq!(err.reason, reasons::CAPI_VERSION_INCOMPATIBILITY);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn story_missing_components_file_fails_fetch() {
        let mut releases = FakeReleaseClient::capi(&["v2.0.0"]);
        releases
            .assets
            .retain(|url, _| !url.ends_with("core-components.yaml"));
        let ctx = context(FakeConfigSource::default(), releases, MockInstaller::new(), MockProviderRecordStore::new());

        let mut phases = reconciler(ctx, core_provider());
        phases.load().await.unwrap();
        let err = phases.fetch().await.unwrap_err();

        assert_eq!(err.reason, reasons::COMPONENTS_FETCH_ERROR);
        assert_eq!(err.condition, PREFLIGHT_CHECK_CONDITION);
        let message = err.cause.to_string();
        assert!(message.contains("core-components.yaml"), "{message}");
        assert!(message.contains("cluster-api"), "{message}");
    }

    #[tokio::test]
    async fn delete_without_record_uses_target_version() {
        let mut installer = MockInstaller::new();
        installer
            .expect_delete()
            .withf(|record: &ProviderRecord, options: &DeleteOptions| {
                record.version == "v2.0.0"
                    && record.identity == identity_for(ProviderKind::Core, "cluster-api", "capi-system")
                    && *options == DeleteOptions::default()
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let mut records = MockProviderRecordStore::new();
        records.expect_get().never();

        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::capi(&["v2.0.0"]),
            installer,
            records,
        );
        let mut phases = reconciler(ctx, core_provider());
        assert_eq!(phases.reconcile_delete().await.unwrap(), PhaseOutcome::Continue);
    }

    #[tokio::test]
    async fn story_delete_failure_is_reported_on_installed_condition() {
        let mut installer = MockInstaller::new();
        installer
            .expect_delete()
            .returning(|_, _| Err(Error::deletion("cluster-api", "forbidden")));

        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::capi(&["v2.0.0"]),
            installer,
            MockProviderRecordStore::new(),
        );
        let mut phases = reconciler(ctx, core_provider());
        let err = phases.reconcile_delete().await.unwrap_err();
        assert_eq!(err.reason, reasons::OLD_COMPONENTS_DELETION_ERROR);
        assert_eq!(err.condition, PROVIDER_INSTALLED_CONDITION);
    }

    #[tokio::test]
    async fn waiting_for_core_stops_before_load() {
        let ctx = context(
            FakeConfigSource::default(),
            FakeReleaseClient::default(),
            MockInstaller::new(),
            MockProviderRecordStore::new(),
        );
        let aws = Provider::new(ProviderKind::Infrastructure, "aws", "capa-system");
        let providers = vec![core_provider(), aws.clone()];
        let mut phases = PhaseReconciler::new(ctx, aws, providers);

        let outcome = phases.reconcile().await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Requeue(preflight::WAIT_FOR_CORE_PROVIDER));
        assert_eq!(phases.version(), None);
    }
}
