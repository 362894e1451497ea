//! Operator chart configuration and rollout

use super::images;
use super::manifest::SYSTEM_NAMESPACE;
use super::plan::PlanContext;
use super::runtime::Runtime;
use crate::config::Config;
use crate::config::merge::merge_values;
use anyhow::{Context, Result};
use applykit::{File, OneTimeInstruction};
use serde_json::{Value, json};

pub const OPERATOR_NAME: &str = "nodestrap-operator";

/// Chart values every install starts from
fn default_values() -> Value {
    json!({
        "operator": {
            "apiserver": {
                "service": {
                    "type": "LoadBalancer",
                    "httpsPort": 8443,
                    "httpsNodePort": 30443,
                },
            },
        },
    })
}

/// Defaults, then the image registry, then user values
pub fn chart_values(cfg: &Config) -> Value {
    let mut values = default_values();
    if !cfg.global_system_image_registry.is_empty() {
        merge_values(
            &mut values,
            json!({"global": {"imageRegistry": cfg.global_system_image_registry}}),
        );
    }
    let user: serde_json::Map<String, Value> = cfg
        .operator_values
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    merge_values(&mut values, Value::Object(user));
    values
}

/// `HelmChartConfig` carrying the operator values
pub fn chart_config_file(cfg: &Config, ctx: &PlanContext) -> Result<File> {
    let values =
        serde_yaml::to_string(&chart_values(cfg)).context("Failed to render operator values")?;
    let config = json!({
        "apiVersion": "helm.cattle.io/v1",
        "kind": "HelmChartConfig",
        "metadata": {
            "name": OPERATOR_NAME,
            "namespace": SYSTEM_NAMESPACE,
        },
        "spec": {
            "valuesContent": values,
        },
    });
    let data = serde_yaml::to_string(&config).context("Failed to render operator chart config")?;
    Ok(File::new(ctx.chart_config_path(), data))
}

pub fn apply_chart_config(runtime: Runtime, ctx: &PlanContext) -> OneTimeInstruction {
    ctx.retry(
        "apply-operator-chart-config",
        [
            runtime.kubectl().to_string(),
            "apply".to_string(),
            "-f".to_string(),
            ctx.chart_config_path(),
        ],
    )
    .with_env([runtime.kubectl_env()])
}

pub fn install_instruction(cfg: &Config, runtime: Runtime, operator_version: &str) -> OneTimeInstruction {
    OneTimeInstruction::image(
        "install-operator",
        images::operator_installer(cfg, operator_version),
    )
    .with_env([runtime.kubectl_env()])
}

fn rollout(name: &str, namespace: &str, deployment: &str, runtime: Runtime, ctx: &PlanContext) -> OneTimeInstruction {
    ctx.retry(
        name,
        [
            runtime.kubectl().to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "rollout".to_string(),
            "status".to_string(),
            "-w".to_string(),
            format!("deploy/{deployment}"),
        ],
    )
    .with_env([runtime.kubectl_env()])
}

pub fn wait_operator(runtime: Runtime, ctx: &PlanContext) -> OneTimeInstruction {
    rollout("wait-operator", SYSTEM_NAMESPACE, OPERATOR_NAME, runtime, ctx)
}

pub fn wait_operator_webhook(runtime: Runtime, ctx: &PlanContext) -> OneTimeInstruction {
    rollout(
        "wait-operator-webhook",
        SYSTEM_NAMESPACE,
        &format!("{OPERATOR_NAME}-webhook"),
        runtime,
        ctx,
    )
}

pub fn wait_upgrade_controller(runtime: Runtime, ctx: &PlanContext) -> OneTimeInstruction {
    rollout(
        "wait-system-upgrade-controller",
        "system-upgrade",
        "system-upgrade-controller",
        runtime,
        ctx,
    )
}
