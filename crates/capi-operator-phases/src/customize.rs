//! Provider-specific overrides applied to rendered Deployments

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, EnvVar};
use serde_json::Value;
use tracing::{debug, warn};

use capi_operator_common::crd::{ContainerOverride, DeploymentSpec, ProviderSpec};
use capi_operator_common::Error;

use crate::components::Components;

/// Apply `spec.deployment` overrides to every Deployment in `components`.
///
/// Returns the components unchanged when no overrides are configured.
pub fn customize_components(components: Components, spec: &ProviderSpec) -> Result<Components, Error> {
    let Some(overrides) = &spec.deployment else {
        return Ok(components);
    };

    let provider = components.identity().provider_name.clone();
    let objects = components
        .objects()
        .iter()
        .map(|obj| {
            if obj.get("kind").and_then(Value::as_str) != Some("Deployment") {
                return Ok(obj.clone());
            }
            let mut deployment: Deployment = serde_json::from_value(obj.clone()).map_err(|e| {
                Error::components_fetch(&provider, format!("invalid Deployment: {}", e))
            })?;
            customize_deployment(&mut deployment, overrides);
            serde_json::to_value(&deployment).map_err(|e| {
                Error::components_fetch(&provider, format!("invalid Deployment: {}", e))
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(components.with_objects(objects))
}

fn customize_deployment(deployment: &mut Deployment, overrides: &DeploymentSpec) {
    let name = deployment.metadata.name.clone().unwrap_or_default();
    let Some(spec) = deployment.spec.as_mut() else {
        warn!(deployment = %name, "deployment has no spec, skipping customization");
        return;
    };

    if let Some(replicas) = overrides.replicas {
        spec.replicas = Some(replicas);
    }

    let Some(pod) = spec.template.spec.as_mut() else {
        return;
    };
    if let Some(node_selector) = &overrides.node_selector {
        pod.node_selector = Some(node_selector.clone());
    }
    if let Some(tolerations) = &overrides.tolerations {
        pod.tolerations = Some(tolerations.clone());
    }

    for container_override in &overrides.containers {
        match pod
            .containers
            .iter_mut()
            .find(|c| c.name == container_override.name)
        {
            Some(container) => customize_container(container, container_override),
            None => debug!(
                deployment = %name,
                container = %container_override.name,
                "no such container in deployment"
            ),
        }
    }
}

fn customize_container(container: &mut Container, overrides: &ContainerOverride) {
    if let Some(image) = &overrides.image {
        container.image = Some(image.clone());
    }

    if let Some(args) = &overrides.args {
        let existing = container.args.get_or_insert_with(Vec::new);
        for (flag, value) in args {
            let rendered = format!("--{}={}", flag, value);
            let bare = format!("--{}", flag);
            let prefix = format!("--{}=", flag);
            match existing
                .iter_mut()
                .find(|a| **a == bare || a.starts_with(&prefix))
            {
                Some(arg) => *arg = rendered,
                None => existing.push(rendered),
            }
        }
    }

    if let Some(env) = &overrides.env {
        let existing = container.env.get_or_insert_with(Vec::new);
        for var in env {
            upsert_env(existing, var);
        }
    }

    if let Some(resources) = &overrides.resources {
        container.resources = Some(resources.clone());
    }
}

fn upsert_env(env: &mut Vec<EnvVar>, var: &EnvVar) {
    match env.iter_mut().find(|e| e.name == var.name) {
        Some(existing) => *existing = var.clone(),
        None => env.push(var.clone()),
    }
}
