//! Installer image names

use super::runtime::Runtime;
use crate::config::Config;
use crate::config::validate::MIRROR_CN_REGISTRY;

const DEFAULT_REGISTRY: &str = "ghcr.io";
const DOCKER_HUB: &str = "docker.io";
const RUNTIME_IMAGE_PREFIX: &str = "rancher/system-agent-installer";
const OPERATOR_IMAGE_PREFIX: &str = "nodestrap/system-installer";
const OPERATOR_COMPONENT: &str = "nodestrap-operator";

/// `<registry>/<prefix>-<component>:<tag>`
///
/// Tags cannot contain `+`, so it becomes `-`. An empty version is `latest`.
fn installer_image(registry: &str, prefix: &str, component: &str, version: &str) -> String {
    let tag = version.replace('+', "-");
    let tag = if tag.is_empty() { "latest" } else { tag.as_str() };
    format!("{registry}/{prefix}-{component}:{tag}")
}

/// Image that installs the runtime
///
/// Precedence: explicit override, configured registry, mirror registry, Docker Hub.
pub fn runtime_installer(cfg: &Config, runtime: Runtime, kubernetes_version: &str) -> String {
    if !cfg.runtime_installer_image.is_empty() {
        return cfg.runtime_installer_image.clone();
    }

    let registry = if !cfg.global_system_image_registry.is_empty() {
        cfg.global_system_image_registry.as_str()
    } else if !cfg.mirror.is_empty() {
        MIRROR_CN_REGISTRY
    } else {
        DOCKER_HUB
    };

    installer_image(registry, RUNTIME_IMAGE_PREFIX, runtime.as_str(), kubernetes_version)
}

/// Image that installs the operator chart
pub fn operator_installer(cfg: &Config, operator_version: &str) -> String {
    if !cfg.operator_installer_image.is_empty() {
        return cfg.operator_installer_image.clone();
    }

    let registry = if !cfg.global_system_image_registry.is_empty() {
        cfg.global_system_image_registry.as_str()
    } else if !cfg.mirror.is_empty() {
        MIRROR_CN_REGISTRY
    } else {
        DEFAULT_REGISTRY
    };

    installer_image(registry, OPERATOR_IMAGE_PREFIX, OPERATOR_COMPONENT, operator_version)
}
