//! CAPI provider operator - installs and upgrades Cluster API providers

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use capi_operator::controller::{self, Context, ControllerSettings, KubeProviderClient};
use capi_operator::events::KubeEventPublisher;
use capi_operator::CONTROLLER_NAME;
use capi_operator_common::crd::all_crds;
use capi_operator_phases::{KubeInstaller, KubeProviderRecordStore, PhaseContext, TemplateRenderer};
use capi_operator_repository::{HttpReleaseClient, KubeConfigSource};

/// Operator that manages Cluster API providers declaratively
#[derive(Parser, Debug)]
#[command(name = "capi-operator", version, about, long_about = None)]
struct OperatorConfig {
    /// Print the provider CRDs as YAML and exit
    #[arg(long)]
    crd: bool,

    /// Only reconcile providers in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Seconds to wait for provider Deployments to become available
    #[arg(long, env = "INSTALL_TIMEOUT", default_value = "300")]
    install_timeout: u64,

    /// Resync interval in seconds for healthy providers
    #[arg(long, env = "REQUEUE_AFTER", default_value = "300")]
    requeue_after: u64,

    /// Retry interval in seconds after a transient failure
    #[arg(long, env = "ERROR_REQUEUE_AFTER", default_value = "30")]
    error_requeue_after: u64,

    /// Log as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    if config.crd {
        for crd in all_crds() {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_tracing(config.log_json);

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create kube client: {}", e))?;

    let records = Arc::new(KubeProviderRecordStore::new(client.clone()));
    let installer = KubeInstaller::new(
        client.clone(),
        records.clone(),
        Duration::from_secs(config.install_timeout),
    );
    let release_client =
        HttpReleaseClient::new().map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

    let ctx = Arc::new(Context {
        kube: Arc::new(KubeProviderClient::new(client.clone())),
        events: Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
        phases: PhaseContext {
            config_source: Arc::new(KubeConfigSource::new(client.clone())),
            release_client: Arc::new(release_client),
            renderer: Arc::new(TemplateRenderer),
            installer: Arc::new(installer),
            records,
        },
        settings: ControllerSettings {
            watch_namespace: config.watch_namespace,
            requeue_after: Duration::from_secs(config.requeue_after),
            error_requeue_after: Duration::from_secs(config.error_requeue_after),
        },
    });

    tracing::info!(
        watch_namespace = ?ctx.settings.watch_namespace,
        install_timeout = config.install_timeout,
        "starting capi-operator"
    );
    controller::run(client, ctx).await;
    tracing::info!("capi-operator stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}
