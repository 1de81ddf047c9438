//! Shared Kubernetes utilities using kube-rs
//!
//! Provides the kubectl-equivalent operations the installer needs: server-side
//! apply of arbitrary objects through API discovery, ordered by kind, and
//! polling for Deployment availability.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition};
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::{ApiResource, Discovery};
use kube::Client;
use serde_json::Value;
use tracing::{debug, trace};

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, FIELD_MANAGER};

/// The "Available" condition type for deployments
pub const CONDITION_AVAILABLE: &str = "Available";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default polling interval for wait operations
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Check if a Deployment condition of the given type has status "True"
pub fn has_condition(conditions: Option<&[DeploymentCondition]>, condition_type: &str) -> bool {
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == condition_type && c.status == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Poll until a condition is met or timeout is reached
///
/// `check_fn` returns `Ok(true)` when the condition is met and `Ok(false)` to
/// keep polling. Errors from `check_fn` are treated as "not yet" so transient
/// API failures don't abort the wait. On expiry an `Internal` error with
/// context `poll_until` carries `timeout_msg`.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = std::time::Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!("Polling condition not yet met, retrying..."),
            Err(e) => trace!("Polling check returned error (retrying): {}", e),
        }

        if start.elapsed() + poll_interval > timeout {
            return Err(Error::internal_with_context("poll_until", timeout_msg));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Wait for every listed Deployment (`namespace`, `name`) to be available
pub async fn wait_for_deployments(
    client: &Client,
    deployments: &[(String, String)],
    timeout: Duration,
) -> Result<(), Error> {
    if deployments.is_empty() {
        return Ok(());
    }

    let names: Vec<String> = deployments
        .iter()
        .map(|(ns, name)| format!("{}/{}", ns, name))
        .collect();

    poll_until(
        timeout,
        DEFAULT_POLL_INTERVAL,
        format!(
            "Timeout waiting for deployments {} to be available",
            names.join(", ")
        ),
        || {
            let client = client.clone();
            let deployments = deployments.to_vec();
            async move {
                for (namespace, name) in &deployments {
                    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
                    let Some(deployment) = api.get_opt(name).await? else {
                        trace!(namespace = %namespace, name = %name, "deployment not found yet");
                        return Ok(false);
                    };
                    let conditions = deployment
                        .status
                        .as_ref()
                        .and_then(|s| s.conditions.as_deref());
                    if !has_condition(conditions, CONDITION_AVAILABLE) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        },
    )
    .await
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use capi_operator_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from an apiVersion and kind without discovery
pub fn build_api_resource(api_version: &str, kind: &str, plural: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

/// Get priority for a Kubernetes resource kind (lower = apply first)
///
/// Namespaces and CRDs land before anything that lives in or instantiates
/// them. Webhook configurations go last: their backing Service has no
/// endpoints until the provider Deployment is running.
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "Issuer" | "Certificate" => 6,
        "Service" => 7,
        "Deployment" | "DaemonSet" | "StatefulSet" => 8,
        "MutatingWebhookConfiguration" | "ValidatingWebhookConfiguration" => 10,
        _ => 9,
    }
}

/// Kind of a JSON object, or "" when absent
pub fn object_kind(obj: &Value) -> &str {
    obj.get("kind").and_then(Value::as_str).unwrap_or_default()
}

/// Run API discovery with retry.
///
/// Discovery can transiently fail while aggregated API endpoints from a
/// freshly installed provider register. Retries are bounded; the controller
/// requeues on persistent failure.
pub async fn run_discovery(client: &Client) -> Result<Discovery, Error> {
    let config = RetryConfig {
        max_attempts: 5,
        initial_delay: Duration::from_secs(1),
        ..RetryConfig::default()
    };
    retry_with_backoff(&config, "api-discovery", || {
        let client = client.clone();
        async move {
            Discovery::new(client)
                .run()
                .await
                .map_err(|e| Error::internal_with_context("api-discovery", e.to_string()))
        }
    })
    .await
}

/// Server-side apply one object resolved through discovery
pub async fn apply_object(
    client: &Client,
    discovery: &Discovery,
    obj: &Value,
) -> Result<(), Error> {
    let kind = object_kind(obj);
    let api_version = obj
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::internal_with_context("apply_object", "missing apiVersion"))?;
    let name = obj
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::internal_with_context("apply_object", "missing metadata.name"))?;
    let namespace = obj.pointer("/metadata/namespace").and_then(Value::as_str);

    let (group, version) = parse_api_version(api_version);
    let gvk = GroupVersionKind {
        group,
        version,
        kind: kind.to_string(),
    };
    let Some((api_resource, _)) = discovery.resolve_gvk(&gvk) else {
        return Err(Error::internal_with_context(
            "apply_object",
            format!("unknown resource type: {}/{}", api_version, kind),
        ));
    };

    let params = PatchParams::apply(FIELD_MANAGER).force();
    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &api_resource),
        None => Api::all_with(client.clone(), &api_resource),
    };
    api.patch(name, &params, &Patch::Apply(obj))
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "apply_object",
                format!("failed to apply {}/{}: {}", kind, name, e),
            )
        })?;

    trace!(kind = %kind, name = %name, namespace = ?namespace, "applied object");
    Ok(())
}

/// Apply objects in kind-priority order.
///
/// Discovery runs once up front and again after CRDs are applied, since
/// CRDs register new types that later objects may instantiate.
pub async fn apply_objects(client: &Client, objects: &[Value]) -> Result<(), Error> {
    if objects.is_empty() {
        return Ok(());
    }

    let mut ordered: Vec<&Value> = objects.iter().collect();
    ordered.sort_by_key(|o| kind_priority(object_kind(o)));

    let (foundational, rest): (Vec<&Value>, Vec<&Value>) = ordered
        .into_iter()
        .partition(|o| matches!(object_kind(o), "Namespace" | "CustomResourceDefinition"));

    let mut discovery = run_discovery(client).await?;
    for obj in &foundational {
        apply_object(client, &discovery, obj).await?;
    }

    if foundational
        .iter()
        .any(|o| object_kind(o) == "CustomResourceDefinition")
    {
        discovery = run_discovery(client).await?;
    }

    for obj in &rest {
        apply_object(client, &discovery, obj).await?;
    }

    debug!(count = objects.len(), "applied objects");
    Ok(())
}
