//! Kubernetes runtime flavors and the files and instructions that install them

use super::plan::PlanContext;
use crate::config::{Config, Role, RuntimeConfig};
use anyhow::{Context, Result};
use applykit::{File, OneTimeInstruction};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Supported Kubernetes distributions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    K3s,
    Rke2,
}

impl Runtime {
    /// Flavor named in a resolved version such as `v1.30.2+k3s1`
    ///
    /// `rke2` is checked first.
    pub fn from_version(version: &str) -> Option<Self> {
        if version.contains("rke2") {
            Some(Runtime::Rke2)
        } else if version.contains("k3s") {
            Some(Runtime::K3s)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::K3s => "k3s",
            Runtime::Rke2 => "rke2",
        }
    }

    /// Drop-in config file the runtime reads at startup
    pub fn config_path(&self) -> String {
        format!("/etc/rancher/{self}/config.yaml.d/40-nodestrap.yaml")
    }

    /// Admin kubeconfig written by the runtime
    pub fn kubeconfig_path(&self) -> String {
        format!("/etc/rancher/{self}/{self}.yaml")
    }

    pub fn registries_path(&self) -> String {
        format!("/etc/rancher/{self}/registries.yaml")
    }

    pub fn kubectl(&self) -> &'static str {
        match self {
            Runtime::K3s => "/usr/local/bin/kubectl",
            Runtime::Rke2 => "/var/lib/rancher/rke2/bin/kubectl",
        }
    }

    /// Environment pointing kubectl at the admin kubeconfig
    pub fn kubectl_env(&self) -> String {
        format!("KUBECONFIG={}", self.kubeconfig_path())
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Config keys renamed to the runtime's flag names
const RENAMED_KEYS: [(&str, &str); 5] = [
    ("tlsSans", "tls-san"),
    ("nodeName", "node-name"),
    ("internalAddress", "internal-address"),
    ("taints", "node-taint"),
    ("labels", "node-label"),
];

/// `camelCase` or `snake_case` to `kebab-case`
fn kebab_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '_' {
            out.push('-');
        } else {
            out.push(c);
        }
    }
    out
}

/// Render the runtime config document
///
/// Free-form `extraConfig` entries come first and are overridden by the typed
/// settings. `cluster-init: "true"` is added when no server is set.
pub fn runtime_config(config: &RuntimeConfig) -> Result<String> {
    let mut result: BTreeMap<String, Value> = BTreeMap::new();

    for (key, value) in &config.extra_config {
        result.insert(kebab_key(key), value.clone());
    }

    let mut typed = match serde_json::to_value(config).context("Failed to encode runtime config")? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    typed.remove("extraConfig");
    typed.remove("role");
    for (old, new) in RENAMED_KEYS {
        if let Some(value) = typed.remove(old) {
            typed.insert(new.to_string(), value);
        }
    }
    for (key, value) in typed {
        result.insert(kebab_key(&key), value);
    }

    if config.server.is_empty() {
        result.insert("cluster-init".to_string(), Value::String("true".to_string()));
    }

    log::debug!("Generated runtime config: {result:?}");
    serde_yaml::to_string(&result).context("Failed to render runtime config")
}

pub fn config_file(config: &RuntimeConfig, runtime: Runtime) -> Result<File> {
    Ok(File::new(runtime.config_path(), runtime_config(config)?))
}

/// Join token, readable by root only
pub fn token_file(token: &str, ctx: &PlanContext) -> File {
    File::new(ctx.token_path(), format!("{token}\n")).with_permissions("600")
}

/// Environment for the runtime installer image
pub fn install_env(cfg: &Config, runtime: Runtime, image: &str) -> Vec<String> {
    let mut env = vec![format!("RESTART_STAMP={image}")];
    let agent = cfg.role() == Some(Role::Agent);

    match runtime {
        Runtime::K3s if agent => {
            env.push(format!("K3S_URL={}", cfg.runtime.server));
            env.push(format!("K3S_TOKEN={}", cfg.runtime.token));
        }
        Runtime::Rke2 if agent => env.push("INSTALL_RKE2_TYPE=agent".to_string()),
        _ => {}
    }

    if runtime == Runtime::Rke2 {
        env.push("RKE2_ENABLE_SERVICELB=true".to_string());
    }

    env
}

pub fn install_instruction(cfg: &Config, runtime: Runtime, image: &str) -> OneTimeInstruction {
    let env = install_env(cfg, runtime, image);
    log::debug!("Runtime {runtime} instruction env: {env:?}");
    OneTimeInstruction::image(format!("install-{runtime}"), image).with_env(env)
}

/// Link the runtime kubeconfig to the stable location
pub fn symlink_kubeconfig(runtime: Runtime, ctx: &PlanContext) -> OneTimeInstruction {
    ctx.retry(
        format!("symlink-kubeconfig-{runtime}"),
        [
            "ln".to_string(),
            "-sf".to_string(),
            runtime.kubeconfig_path(),
            ctx.kubeconfig_link(),
        ],
    )
}

pub fn wait_node_ready(node_name: &str, runtime: Runtime, ctx: &PlanContext) -> OneTimeInstruction {
    ctx.retry(
        "wait-node-ready",
        [
            runtime.kubectl().to_string(),
            "wait".to_string(),
            "--for=condition=Ready".to_string(),
            format!("node/{node_name}"),
        ],
    )
    .with_env([runtime.kubectl_env()])
}

/// Wait for the agent service on worker-only nodes
pub fn wait_agent_active(runtime: Runtime, ctx: &PlanContext) -> OneTimeInstruction {
    ctx.retry(
        "wait-agent-node-ready",
        [
            "systemctl".to_string(),
            "is-active".to_string(),
            format!("{runtime}-agent.service"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MANAGED_LABEL;

    #[test]
    fn test_runtime_from_version() {
        assert_eq!(Runtime::from_version("v1.30.2+k3s1"), Some(Runtime::K3s));
        assert_eq!(Runtime::from_version("v1.30.2+rke2r1"), Some(Runtime::Rke2));
        assert_eq!(Runtime::from_version("v1.30.2"), None);
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            Runtime::Rke2.config_path(),
            "/etc/rancher/rke2/config.yaml.d/40-nodestrap.yaml"
        );
        assert_eq!(Runtime::K3s.kubeconfig_path(), "/etc/rancher/k3s/k3s.yaml");
        assert_eq!(Runtime::K3s.kubectl_env(), "KUBECONFIG=/etc/rancher/k3s/k3s.yaml");
    }

    #[test]
    fn test_kebab_key() {
        assert_eq!(kebab_key("systemDefaultRegistry"), "system-default-registry");
        assert_eq!(kebab_key("etcd_expose_metrics"), "etcd-expose-metrics");
        assert_eq!(kebab_key("token"), "token");
    }

    #[test]
    fn test_runtime_config_normalizes_keys() {
        let mut cfg = RuntimeConfig {
            role: Some(Role::ClusterInit),
            token: "secret".to_string(),
            tls_sans: vec!["node.example.com".to_string()],
            node_name: "node-1".to_string(),
            ..RuntimeConfig::default()
        };
        cfg.set_defaults();
        cfg.extra_config
            .insert("token".to_string(), Value::String("overridden".to_string()));
        cfg.extra_config
            .insert("disable".to_string(), serde_json::json!(["traefik"]));

        let rendered: BTreeMap<String, Value> =
            serde_yaml::from_str(&runtime_config(&cfg).unwrap()).unwrap();

        assert_eq!(rendered["token"], "secret");
        assert_eq!(rendered["tls-san"], serde_json::json!(["node.example.com"]));
        assert_eq!(rendered["node-name"], "node-1");
        assert_eq!(rendered["node-label"], serde_json::json!([MANAGED_LABEL]));
        assert_eq!(rendered["etcd-expose-metrics"], true);
        assert_eq!(rendered["disable"], serde_json::json!(["traefik"]));
        assert_eq!(rendered["cluster-init"], "true");
        assert!(!rendered.contains_key("role"));
        assert!(!rendered.contains_key("extraConfig"));
    }

    #[test]
    fn test_runtime_config_joiner_has_no_cluster_init() {
        let cfg = RuntimeConfig {
            server: "https://host:6443".to_string(),
            token: "abc".to_string(),
            ..RuntimeConfig::default()
        };
        let rendered: BTreeMap<String, Value> =
            serde_yaml::from_str(&runtime_config(&cfg).unwrap()).unwrap();
        assert_eq!(rendered["server"], "https://host:6443");
        assert!(!rendered.contains_key("cluster-init"));
    }

    #[test]
    fn test_install_env() {
        let mut cfg = Config::default();
        cfg.runtime.role = Some(Role::Agent);
        cfg.runtime.server = "https://host:6443".to_string();
        cfg.runtime.token = "abc".to_string();

        assert_eq!(
            install_env(&cfg, Runtime::K3s, "img"),
            vec!["RESTART_STAMP=img", "K3S_URL=https://host:6443", "K3S_TOKEN=abc"]
        );
        assert_eq!(
            install_env(&cfg, Runtime::Rke2, "img"),
            vec![
                "RESTART_STAMP=img",
                "INSTALL_RKE2_TYPE=agent",
                "RKE2_ENABLE_SERVICELB=true"
            ]
        );

        cfg.runtime.role = Some(Role::Server);
        assert_eq!(install_env(&cfg, Runtime::K3s, "img"), vec!["RESTART_STAMP=img"]);
    }
}
