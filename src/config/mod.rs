//! Node configuration
//!
//! Configuration is assembled from several YAML sources (see [`load`]),
//! combined with command-line overrides and validated before a plan is built.

pub mod load;
pub mod merge;
pub mod validate;

pub use load::{ConfigSources, load};
pub use validate::{Overrides, ValidationError, apply_overrides, validate};

use applykit::OneTimeInstruction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Label added to every node this tool manages
pub const MANAGED_LABEL: &str = "nodestrap.io/managed=true";

/// Runtime config key that enables etcd metrics
pub const ETCD_EXPOSE_METRICS: &str = "etcd-expose-metrics";

/// Key whose value, when present at the top of a document, is used instead of the document
pub const WRAPPER_KEY: &str = "nodestrap";

// ============================================================================
// Roles
// ============================================================================

/// What a node contributes to the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub etcd: bool,
    pub control_plane: bool,
    pub worker: bool,
}

/// Cluster membership role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// First server; creates the cluster
    ClusterInit,
    /// Joining server (etcd, control plane and workloads)
    Server,
    /// Worker only
    Agent,
    /// Dedicated etcd member
    Etcd,
    /// Dedicated control plane
    ControlPlane,
    /// etcd and control plane, no workloads
    EtcdControlPlane,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::ClusterInit,
        Role::Server,
        Role::Agent,
        Role::Etcd,
        Role::ControlPlane,
        Role::EtcdControlPlane,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ClusterInit => "cluster-init",
            Role::Server => "server",
            Role::Agent => "agent",
            Role::Etcd => "etcd",
            Role::ControlPlane => "control-plane",
            Role::EtcdControlPlane => "etcd-control-plane",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Role::ClusterInit | Role::Server => Capabilities {
                etcd: true,
                control_plane: true,
                worker: true,
            },
            Role::Agent => Capabilities {
                worker: true,
                ..Capabilities::default()
            },
            Role::Etcd => Capabilities {
                etcd: true,
                ..Capabilities::default()
            },
            Role::ControlPlane => Capabilities {
                control_plane: true,
                ..Capabilities::default()
            },
            Role::EtcdControlPlane => Capabilities {
                etcd: true,
                control_plane: true,
                worker: false,
            },
        }
    }

    /// Runs workloads and nothing else
    pub fn is_worker_only(&self) -> bool {
        let caps = self.capabilities();
        caps.worker && !caps.etcd && !caps.control_plane
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a role name outside the supported set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid role ({0}) defined, expected one of: cluster-init, server, agent, etcd, control-plane, etcd-control-plane")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

// ============================================================================
// Runtime Config
// ============================================================================

/// Settings handed to the Kubernetes runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls_sans: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub internal_address: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Free-form runtime settings, written as-is
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_config: BTreeMap<String, Value>,
    /// Registry the runtime pulls its system images from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_default_registry: String,
}

impl RuntimeConfig {
    /// Fill in derived values
    ///
    /// - the managed label is appended
    /// - a node with server and token but no role joins as an agent
    /// - etcd metrics are exposed on every role except agent, unless set
    pub fn set_defaults(&mut self) {
        self.labels.push(MANAGED_LABEL.to_string());

        if self.role.is_none() && !self.server.is_empty() && !self.token.is_empty() {
            self.role = Some(Role::Agent);
        }

        if self.role != Some(Role::Agent) && !self.extra_config.contains_key(ETCD_EXPOSE_METRICS) {
            self.extra_config
                .insert(ETCD_EXPOSE_METRICS.to_string(), Value::Bool(true));
        }
    }
}

// ============================================================================
// Config
// ============================================================================

/// Private registry settings, in the runtime's `registries.yaml` shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registries {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mirrors: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configs: BTreeMap<String, Value>,
}

impl Registries {
    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty() && self.configs.is_empty()
    }
}

/// Fully resolved node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(flatten)]
    pub runtime: RuntimeConfig,

    /// Channel (`stable`, `latest`, `v1.30`) or concrete version, optionally
    /// suffixed with `:k3s` or `:rke2`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator_version: String,
    /// Chart repository the operator version is looked up in
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chart_repo: String,
    /// Helm values overlaid on the operator defaults
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub operator_values: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_instructions: Vec<OneTimeInstruction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_instructions: Vec<OneTimeInstruction>,

    /// Kubernetes resources to create during bootstrap
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifest: Vec<Value>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub runtime_installer_image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator_installer_image: String,
    /// Registry for system images of the operator layer
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub global_system_image_registry: String,
    /// Regional mirror (`cn`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mirror: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registries: Option<Registries>,
}

impl Config {
    pub fn role(&self) -> Option<Role> {
        self.runtime.role
    }

    pub fn is_cluster_init(&self) -> bool {
        self.runtime.role == Some(Role::ClusterInit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_names_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            let yaml = serde_yaml::to_string(&role).unwrap();
            assert_eq!(yaml.trim(), role.as_str());
        }
        assert!("master".parse::<Role>().is_err());
    }

    #[test]
    fn test_capabilities() {
        assert!(Role::Agent.is_worker_only());
        assert!(!Role::Server.is_worker_only());
        assert!(!Role::Etcd.is_worker_only());

        let caps = Role::EtcdControlPlane.capabilities();
        assert!(caps.etcd && caps.control_plane && !caps.worker);
        assert!(Role::ControlPlane.capabilities().control_plane);
        assert!(!Role::Etcd.capabilities().control_plane);
    }

    #[test]
    fn test_server_and_token_imply_agent() {
        let mut cfg = RuntimeConfig {
            server: "https://host:6443".to_string(),
            token: "abc".to_string(),
            ..RuntimeConfig::default()
        };
        cfg.set_defaults();

        assert_eq!(cfg.role, Some(Role::Agent));
        assert!(!cfg.extra_config.contains_key(ETCD_EXPOSE_METRICS));
        assert_eq!(cfg.labels, vec![MANAGED_LABEL]);
    }

    #[test]
    fn test_explicit_role_kept() {
        let mut cfg = RuntimeConfig {
            role: Some(Role::Server),
            server: "https://host:6443".to_string(),
            token: "abc".to_string(),
            ..RuntimeConfig::default()
        };
        cfg.set_defaults();

        assert_eq!(cfg.role, Some(Role::Server));
        assert_eq!(cfg.extra_config[ETCD_EXPOSE_METRICS], Value::Bool(true));
    }

    #[test]
    fn test_etcd_metrics_not_overridden() {
        let mut cfg = RuntimeConfig {
            role: Some(Role::ClusterInit),
            ..RuntimeConfig::default()
        };
        cfg.extra_config
            .insert(ETCD_EXPOSE_METRICS.to_string(), Value::Bool(false));
        cfg.set_defaults();

        assert_eq!(cfg.extra_config[ETCD_EXPOSE_METRICS], Value::Bool(false));
    }

    #[test]
    fn test_config_decodes_camel_case() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "role": "cluster-init",
            "tlsSans": ["node.example.com"],
            "kubernetesVersion": "v1.30.2+k3s1",
            "operatorValues": {"global": {"debug": true}},
            "preInstructions": [{"name": "hello", "command": "echo"}],
            "manifest": [{"apiVersion": "v1", "kind": "ConfigMap"}]
        }))
        .unwrap();

        assert!(cfg.is_cluster_init());
        assert_eq!(cfg.runtime.tls_sans, vec!["node.example.com"]);
        assert_eq!(cfg.pre_instructions[0].name, "hello");
        assert_eq!(cfg.manifest.len(), 1);
    }
}
