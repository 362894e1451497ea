//! Cluster resources applied once the runtime is up

use super::plan::PlanContext;
use super::runtime::Runtime;
use anyhow::{Context, Result};
use applykit::{File, OneTimeInstruction};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

/// Namespace the operator and its state live in
pub const SYSTEM_NAMESPACE: &str = "nodestrap-system";

/// API group of resources only the operator can serve
const OPERATOR_API_GROUP: &str = "nodestrap.io";

const CLUSTER_STATE_SECRET: &str = "local-k8s-state";
const CLUSTER_STATE_TYPE: &str = "nodestrap.io/cluster-state";

/// Node name: configured name or hostname, up to the first dot, lower-cased
pub fn node_name(configured: &str, hostname: &str) -> String {
    let name = if configured.is_empty() {
        hostname.split('.').next().unwrap_or(hostname)
    } else {
        configured
    };
    name.to_lowercase()
}

/// Whether a resource needs the operator's CRDs before it can be applied
pub fn is_operator_resource(resource: &Value) -> bool {
    resource
        .get("apiVersion")
        .and_then(Value::as_str)
        .is_some_and(|v| v.contains(OPERATOR_API_GROUP))
}

/// Multi-document YAML
pub fn render(resources: &[Value]) -> Result<String> {
    let mut out = String::new();
    for resource in resources {
        if !out.is_empty() {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(resource).context("Failed to render manifest")?);
    }
    Ok(out)
}

/// Resources created right after the runtime starts
///
/// User resources, then the node's managed label, the system namespace and
/// the secret recording the cluster's join token.
pub fn bootstrap_resources(
    user: &[Value],
    node: &str,
    token: &str,
    runtime: Runtime,
    operator_version: &str,
) -> Vec<Value> {
    let encoded = STANDARD.encode(token);
    let mut resources: Vec<Value> = user.to_vec();

    resources.push(json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {
            "name": node,
            "labels": {"nodestrap.io/managed": "true"},
        },
    }));
    resources.push(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": SYSTEM_NAMESPACE,
            "annotations": {"nodestrap.io/bootstrap-version": operator_version},
        },
    }));
    resources.push(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": CLUSTER_STATE_SECRET,
            "namespace": SYSTEM_NAMESPACE,
            "labels": {"nodestrap.io/k8s-provider": runtime.as_str()},
        },
        "type": CLUSTER_STATE_TYPE,
        "data": {
            "serverToken": encoded,
            "agentToken": encoded,
        },
    }));

    resources
}

/// File holding `resources`, or nothing when there are none
pub fn manifest_file(resources: &[Value], path: String) -> Result<Option<File>> {
    if resources.is_empty() {
        return Ok(None);
    }
    Ok(Some(File::new(path, render(resources)?)))
}

/// `kubectl apply` of a manifest file, retried until the API accepts it
pub fn apply_instruction(
    name: &str,
    path: String,
    runtime: Runtime,
    ctx: &PlanContext,
) -> OneTimeInstruction {
    ctx.retry(
        name,
        [
            runtime.kubectl().to_string(),
            "apply".to_string(),
            "--validate=false".to_string(),
            "-f".to_string(),
            path,
        ],
    )
    .with_env([runtime.kubectl_env()])
}
