//! Command-line overrides and structural validation

use super::{Config, Role, UnknownRole};
use thiserror::Error;
use url::Url;

/// Mirror region with its own registry
pub const MIRROR_CN: &str = "cn";

/// Registry used for system images when the `cn` mirror is selected
pub const MIRROR_CN_REGISTRY: &str = "registry.cn-hangzhou.aliyuncs.com";

/// Ports a joining node may reach a server on
const SERVER_PORTS: [u16; 2] = [6443, 9345];

/// A configuration that can never produce a working node
///
/// These are reported and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0}")]
    UnknownRole(#[from] UnknownRole),

    #[error("invalid role value {0}, expected a string")]
    InvalidRole(String),

    #[error("either role or server URL must be set")]
    MissingRoleOrServer,

    #[error("cluster-init role and server URL are mutually exclusive")]
    ClusterInitWithServer,

    #[error("token is required when server URL is set")]
    MissingToken,

    #[error("invalid server URL {url}: {reason}")]
    InvalidServer { url: String, reason: String },

    #[error("invalid mirror {0}, only \"cn\" is supported")]
    InvalidMirror(String),

    #[error("{kind} instruction #{index}: {reason}")]
    InvalidInstruction {
        kind: &'static str,
        index: usize,
        reason: &'static str,
    },

    #[error("server and token are required to join a cluster")]
    MissingJoinInfo,

    #[error("unknown runtime in kubernetes version {0}, expected k3s or rke2")]
    UnknownRuntime(String),
}

/// Values given on the command line
///
/// Empty strings and `None` leave the configuration untouched.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cluster_init: bool,
    pub server: String,
    pub token: String,
    pub role: Option<Role>,
    pub mirror: String,
    pub kubernetes_version: String,
}

/// Apply command-line values and fill in defaults
pub fn apply_overrides(cfg: &mut Config, overrides: &Overrides) {
    if overrides.cluster_init {
        cfg.runtime.role = Some(Role::ClusterInit);
    }
    if !overrides.token.is_empty() {
        cfg.runtime.token.clone_from(&overrides.token);
    }
    if !overrides.server.is_empty() {
        cfg.runtime.server.clone_from(&overrides.server);
    }
    if let Some(role) = overrides.role {
        cfg.runtime.role = Some(role);
    }
    if !overrides.mirror.is_empty() {
        cfg.mirror.clone_from(&overrides.mirror);
    }
    if cfg.kubernetes_version.is_empty() && !overrides.kubernetes_version.is_empty() {
        cfg.kubernetes_version.clone_from(&overrides.kubernetes_version);
    }

    cfg.runtime.set_defaults();

    if cfg.mirror == MIRROR_CN && cfg.runtime.system_default_registry.is_empty() {
        cfg.runtime.system_default_registry = MIRROR_CN_REGISTRY.to_string();
    }
}

/// Check the configuration for contradictions
pub fn validate(cfg: &Config) -> Result<(), ValidationError> {
    let server = &cfg.runtime.server;

    if cfg.role().is_none() && server.is_empty() {
        return Err(ValidationError::MissingRoleOrServer);
    }
    if cfg.is_cluster_init() && !server.is_empty() {
        return Err(ValidationError::ClusterInitWithServer);
    }
    // Every role but cluster-init joins an existing server
    if !cfg.is_cluster_init() && server.is_empty() {
        return Err(ValidationError::MissingJoinInfo);
    }
    if !server.is_empty() {
        if cfg.runtime.token.is_empty() {
            return Err(ValidationError::MissingToken);
        }
        validate_server(server)?;
    }
    if !cfg.mirror.is_empty() && cfg.mirror != MIRROR_CN {
        return Err(ValidationError::InvalidMirror(cfg.mirror.clone()));
    }

    for (kind, list) in [
        ("pre", &cfg.pre_instructions),
        ("post", &cfg.post_instructions),
    ] {
        for (index, instruction) in list.iter().enumerate() {
            if instruction.name.is_empty() {
                return Err(ValidationError::InvalidInstruction {
                    kind,
                    index,
                    reason: "name is required",
                });
            }
            if instruction.command.is_empty() && instruction.image.is_empty() {
                return Err(ValidationError::InvalidInstruction {
                    kind,
                    index,
                    reason: "command or image is required",
                });
            }
        }
    }

    Ok(())
}

fn validate_server(server: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidServer {
        url: server.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(server).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "https" {
        return Err(invalid("scheme must be https"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    match url.port() {
        Some(port) if SERVER_PORTS.contains(&port) => Ok(()),
        _ => Err(invalid("port must be 6443 or 9345")),
    }
}
