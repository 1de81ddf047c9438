//! Rendered provider components
//!
//! A [`Components`] value is one release's objects after variable
//! substitution, namespacing and labelling. It never changes once built;
//! customization produces a new value.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::debug;

use capi_operator_common::yaml::parse_yaml_multi;
use capi_operator_common::{Error, CLUSTERCTL_LABEL, PROVIDER_LABEL};

use crate::record::ProviderIdentity;

/// Kinds that are never namespaced
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "APIService",
    "PriorityClass",
    "StorageClass",
    "ClusterIssuer",
];

const INJECT_CA_ANNOTATION: &str = "cert-manager.io/inject-ca-from";

/// A rendered, immutable set of provider objects
#[derive(Clone, Debug, PartialEq)]
pub struct Components {
    version: String,
    identity: ProviderIdentity,
    manifest_path: String,
    objects: Vec<Value>,
}

impl Components {
    /// Build a component set
    pub fn new(
        version: impl Into<String>,
        identity: ProviderIdentity,
        manifest_path: impl Into<String>,
        objects: Vec<Value>,
    ) -> Self {
        Self {
            version: version.into(),
            identity,
            manifest_path: manifest_path.into(),
            objects,
        }
    }

    /// Resolved version these components belong to
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The installation these components are for
    pub fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    /// Namespace the components are installed into
    pub fn target_namespace(&self) -> &str {
        &self.identity.namespace
    }

    /// Path the manifest was read from
    pub fn manifest_path(&self) -> &str {
        &self.manifest_path
    }

    /// Rendered objects
    pub fn objects(&self) -> &[Value] {
        &self.objects
    }

    /// `(namespace, name)` of every Deployment in the set
    pub fn deployments(&self) -> Vec<(String, String)> {
        self.objects
            .iter()
            .filter(|o| o.get("kind").and_then(Value::as_str) == Some("Deployment"))
            .filter_map(|o| {
                let name = o.pointer("/metadata/name")?.as_str()?;
                let ns = o
                    .pointer("/metadata/namespace")
                    .and_then(Value::as_str)
                    .unwrap_or(self.target_namespace());
                Some((ns.to_string(), name.to_string()))
            })
            .collect()
    }

    /// The same set with `objects` replaced
    pub fn with_objects(self, objects: Vec<Value>) -> Self {
        Self { objects, ..self }
    }
}

/// Inputs to rendering besides the raw manifest
#[derive(Clone, Debug)]
pub struct RenderOptions {
    /// Resolved version
    pub version: String,
    /// Which installation, including the target namespace
    pub identity: ProviderIdentity,
    /// Path the manifest was read from
    pub manifest_path: String,
}

/// Turns raw manifest bytes into [`Components`]
pub trait Renderer: Send + Sync {
    /// Render `raw` using configuration `variables`
    fn render(
        &self,
        raw: &[u8],
        options: &RenderOptions,
        variables: &BTreeMap<String, String>,
    ) -> Result<Components, Error>;
}

/// Default [`Renderer`]: envsubst-style variables, then namespacing and labels
#[derive(Clone, Debug, Default)]
pub struct TemplateRenderer;

impl Renderer for TemplateRenderer {
    fn render(
        &self,
        raw: &[u8],
        options: &RenderOptions,
        variables: &BTreeMap<String, String>,
    ) -> Result<Components, Error> {
        let provider = &options.identity.provider_name;
        let text = std::str::from_utf8(raw)
            .map_err(|e| Error::components_fetch(provider, format!("manifest is not UTF-8: {}", e)))?;

        let missing = missing_variables(text, variables);
        if !missing.is_empty() {
            return Err(Error::components_fetch(
                provider,
                format!(
                    "value for variables [{}] is not set",
                    missing.into_iter().collect::<Vec<_>>().join(", ")
                ),
            ));
        }

        let rendered = substitute_vars(text, variables);
        let mut objects = parse_yaml_multi(&rendered)
            .map_err(|e| Error::components_fetch(provider, e.to_string()))?;

        fix_namespaces(&mut objects, &options.identity.namespace, provider)?;
        for obj in &mut objects {
            add_labels(obj, &options.identity.name);
        }

        debug!(
            provider = %provider,
            version = %options.version,
            objects = objects.len(),
            "rendered components"
        );
        Ok(Components::new(
            options.version.clone(),
            options.identity.clone(),
            options.manifest_path.clone(),
            objects,
        ))
    }
}

/// Substitute `${VAR}` style expressions.
///
/// Supported forms: `${VAR}`, `${VAR:=default}`, `${VAR:-default}`,
/// `${VAR="default"}` and `${VAR/#prefix/replacement}`. A plain `${VAR}`
/// without a value is left untouched.
pub fn substitute_vars(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut remaining = template;

    while let Some(start) = remaining.find("${") {
        result.push_str(&remaining[..start]);
        let after_start = &remaining[start + 2..];

        match after_start.find('}') {
            Some(end) => {
                result.push_str(&resolve_var_expr(&after_start[..end], vars));
                remaining = &after_start[end + 1..];
            }
            None => {
                result.push_str("${");
                remaining = after_start;
            }
        }
    }
    result.push_str(remaining);
    result
}

/// Variables referenced without a default and absent from `vars`
pub fn missing_variables(template: &str, vars: &BTreeMap<String, String>) -> BTreeSet<String> {
    let mut missing = BTreeSet::new();
    let mut remaining = template;
    while let Some(start) = remaining.find("${") {
        let after_start = &remaining[start + 2..];
        let Some(end) = after_start.find('}') else {
            break;
        };
        let expr = &after_start[..end];
        if is_plain_var(expr) && !vars.contains_key(expr) {
            missing.insert(expr.to_string());
        }
        remaining = &after_start[end + 1..];
    }
    missing
}

fn is_plain_var(expr: &str) -> bool {
    !expr.is_empty() && expr.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn resolve_var_expr(expr: &str, vars: &BTreeMap<String, String>) -> String {
    // ${VAR/#prefix/replacement}
    if let Some(slash) = expr.find("/#") {
        let value = vars.get(&expr[..slash]).cloned().unwrap_or_default();
        let rest = &expr[slash + 2..];
        let (prefix, replacement) = rest.split_once('/').unwrap_or((rest, ""));
        return match value.strip_prefix(prefix) {
            Some(tail) if !prefix.is_empty() => format!("{}{}", replacement, tail),
            _ => value,
        };
    }

    // ${VAR:=default} / ${VAR:-default}
    if let Some(pos) = expr.find(":=").or_else(|| expr.find(":-")) {
        return vars
            .get(&expr[..pos])
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| expr[pos + 2..].to_string());
    }

    // ${VAR="default"}
    if let Some(pos) = expr.find('=') {
        return vars
            .get(&expr[..pos])
            .cloned()
            .unwrap_or_else(|| expr[pos + 1..].trim_matches('"').to_string());
    }

    vars.get(expr)
        .cloned()
        .unwrap_or_else(|| format!("${{{}}}", expr))
}

fn kind_of(obj: &Value) -> &str {
    obj.get("kind").and_then(Value::as_str).unwrap_or_default()
}

/// Move every namespaced object into `target` and rename the provider's
/// Namespace object to match, fixing references that embed the namespace.
fn fix_namespaces(objects: &mut [Value], target: &str, provider: &str) -> Result<(), Error> {
    let namespaces: Vec<String> = objects
        .iter()
        .filter(|o| kind_of(o) == "Namespace")
        .filter_map(|o| o.pointer("/metadata/name").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    if namespaces.len() > 1 {
        return Err(Error::components_fetch(
            provider,
            format!(
                "components must define at most one Namespace, found {}",
                namespaces.join(", ")
            ),
        ));
    }
    let original = namespaces.into_iter().next();

    for obj in objects.iter_mut() {
        let kind = kind_of(obj).to_string();
        if kind == "Namespace" {
            set_path(obj, &["metadata", "name"], Value::String(target.to_string()));
        } else if !CLUSTER_SCOPED_KINDS.contains(&kind.as_str()) {
            set_path(obj, &["metadata", "namespace"], Value::String(target.to_string()));
        }

        match kind.as_str() {
            "ClusterRoleBinding" | "RoleBinding" => {
                if let Some(subjects) = obj.get_mut("subjects").and_then(Value::as_array_mut) {
                    for subject in subjects {
                        if subject.get("kind").and_then(Value::as_str) == Some("ServiceAccount") {
                            set_path(subject, &["namespace"], Value::String(target.to_string()));
                        }
                    }
                }
            }
            "MutatingWebhookConfiguration" | "ValidatingWebhookConfiguration" => {
                if let Some(webhooks) = obj.get_mut("webhooks").and_then(Value::as_array_mut) {
                    for webhook in webhooks {
                        if let Some(service) = webhook.pointer_mut("/clientConfig/service") {
                            set_path(service, &["namespace"], Value::String(target.to_string()));
                        }
                    }
                }
            }
            "CustomResourceDefinition" => {
                if let Some(service) =
                    obj.pointer_mut("/spec/conversion/webhook/clientConfig/service")
                {
                    set_path(service, &["namespace"], Value::String(target.to_string()));
                }
            }
            _ => {}
        }

        fix_inject_ca(obj, original.as_deref(), target);
    }
    Ok(())
}

/// Rewrite `cert-manager.io/inject-ca-from: <ns>/<cert>` to the target namespace
fn fix_inject_ca(obj: &mut Value, original: Option<&str>, target: &str) {
    let Some(annotation) = obj.pointer_mut(&format!(
        "/metadata/annotations/{}",
        INJECT_CA_ANNOTATION.replace('/', "~1")
    )) else {
        return;
    };
    let rewritten = match annotation.as_str().and_then(|s| s.split_once('/')) {
        Some((ns, cert)) if original.map_or(true, |o| o == ns) => format!("{}/{}", target, cert),
        _ => return,
    };
    *annotation = Value::String(rewritten);
}

fn add_labels(obj: &mut Value, provider_label: &str) {
    let labels = [
        (PROVIDER_LABEL, provider_label),
        (CLUSTERCTL_LABEL, ""),
    ];
    for (key, value) in labels {
        set_path(obj, &["metadata", "labels", key], Value::String(value.to_string()));
    }
}

/// Set a nested field, creating intermediate objects as needed
fn set_path(obj: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = obj;
    for key in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        current = map.entry(key.to_string()).or_insert(Value::Null);
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::identity_for;
    use capi_operator_common::crd::ProviderKind;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn options() -> RenderOptions {
        RenderOptions {
            version: "v1.5.0".to_string(),
            identity: identity_for(ProviderKind::Infrastructure, "aws", "capa-system"),
            manifest_path: "infrastructure-components.yaml".to_string(),
        }
    }

    const MANIFEST: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: capa-upstream
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: awsclusters.infrastructure.cluster.x-k8s.io
  annotations:
    cert-manager.io/inject-ca-from: capa-upstream/capa-serving-cert
spec:
  conversion:
    webhook:
      clientConfig:
        service:
          name: capa-webhook-service
          namespace: capa-upstream
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: capa-manager
subjects:
  - kind: ServiceAccount
    name: capa-controller-manager
    namespace: capa-upstream
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: capa-controller-manager
  namespace: capa-upstream
spec:
  template:
    spec:
      containers:
        - name: manager
          image: registry.k8s.io/capa:${CAPA_TAG:=v1.5.0}
          args:
            - --region=${AWS_REGION}
"#;

    #[test]
    fn substitute_vars_replaces_patterns() {
        let v = vars(&[("URL", "https://example.com"), ("TOKEN", "t0k")]);
        assert_eq!(
            substitute_vars("url: ${URL}\ntoken: ${TOKEN}", &v),
            "url: https://example.com\ntoken: t0k"
        );
    }

    #[test]
    fn substitute_vars_defaults() {
        let empty = BTreeMap::new();
        assert_eq!(substitute_vars("${A:=x}", &empty), "x");
        assert_eq!(substitute_vars("${A:-y}", &empty), "y");
        assert_eq!(substitute_vars("${A=\"z\"}", &empty), "z");
        assert_eq!(substitute_vars("${A:=x}", &vars(&[("A", "set")])), "set");
    }

    #[test]
    fn substitute_vars_prefix_replacement() {
        let v = vars(&[("EXP", "true")]);
        assert_eq!(substitute_vars("${EXP/#true/enabled}", &v), "enabled");
        assert_eq!(substitute_vars("${EXP/#false/disabled}", &v), "true");
    }

    #[test]
    fn substitute_vars_leaves_unknown_and_unterminated() {
        let empty = BTreeMap::new();
        assert_eq!(substitute_vars("v: ${UNKNOWN}", &empty), "v: ${UNKNOWN}");
        assert_eq!(substitute_vars("v: ${OPEN", &empty), "v: ${OPEN");
    }

    #[test]
    fn missing_variables_ignores_defaults() {
        let missing = missing_variables(MANIFEST, &BTreeMap::new());
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["AWS_REGION"]);
    }

    #[test]
    fn render_fails_on_missing_variables() {
        let err = TemplateRenderer
            .render(MANIFEST.as_bytes(), &options(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::ComponentsFetch { .. }));
        assert!(err.to_string().contains("AWS_REGION"));
    }

    #[test]
    fn render_moves_everything_into_target_namespace() {
        let components = TemplateRenderer
            .render(MANIFEST.as_bytes(), &options(), &vars(&[("AWS_REGION", "eu-west-1")]))
            .unwrap();

        assert_eq!(components.version(), "v1.5.0");
        assert_eq!(components.target_namespace(), "capa-system");
        let objects = components.objects();
        assert_eq!(objects.len(), 4);

        assert_eq!(objects[0]["metadata"]["name"], "capa-system");
        assert!(objects[1]["metadata"].get("namespace").is_none());
        assert_eq!(
            objects[1]["metadata"]["annotations"]["cert-manager.io/inject-ca-from"],
            "capa-system/capa-serving-cert"
        );
        assert_eq!(
            objects[1]["spec"]["conversion"]["webhook"]["clientConfig"]["service"]["namespace"],
            "capa-system"
        );
        assert_eq!(objects[2]["subjects"][0]["namespace"], "capa-system");
        assert_eq!(objects[3]["metadata"]["namespace"], "capa-system");
        assert_eq!(
            objects[3]["spec"]["template"]["spec"]["containers"][0]["args"][0],
            "--region=eu-west-1"
        );
        assert_eq!(
            components.deployments(),
            vec![("capa-system".to_string(), "capa-controller-manager".to_string())]
        );
    }

    #[test]
    fn render_labels_every_object() {
        let components = TemplateRenderer
            .render(MANIFEST.as_bytes(), &options(), &vars(&[("AWS_REGION", "x")]))
            .unwrap();
        for obj in components.objects() {
            assert_eq!(obj["metadata"]["labels"][PROVIDER_LABEL], "infrastructure-aws");
            assert_eq!(obj["metadata"]["labels"][CLUSTERCTL_LABEL], "");
        }
    }

    #[test]
    fn render_rejects_multiple_namespaces() {
        let manifest = "kind: Namespace\nmetadata:\n  name: a\n---\nkind: Namespace\nmetadata:\n  name: b\n";
        let err = TemplateRenderer
            .render(manifest.as_bytes(), &options(), &BTreeMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("at most one Namespace"));
    }
}
