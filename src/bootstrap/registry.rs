//! Private registry configuration for the runtime

use super::runtime::Runtime;
use crate::config::Registries;
use anyhow::{Context, Result};
use applykit::File;

/// `registries.yaml`, readable by root only, when any registry is configured
pub fn registries_file(registries: Option<&Registries>, runtime: Runtime) -> Result<Option<File>> {
    let Some(registries) = registries.filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let data = serde_yaml::to_string(registries).context("Failed to render registries")?;
    Ok(Some(
        File::new(runtime.registries_path(), data).with_permissions("0400"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_registries_no_file() {
        assert!(registries_file(None, Runtime::K3s).unwrap().is_none());
        assert!(
            registries_file(Some(&Registries::default()), Runtime::K3s)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_mirrors_written() {
        let mut registries = Registries::default();
        registries.mirrors.insert(
            "docker.io".to_string(),
            json!({"endpoint": ["https://mirror.local"]}),
        );

        let file = registries_file(Some(&registries), Runtime::Rke2)
            .unwrap()
            .unwrap();
        assert_eq!(file.path, "/etc/rancher/rke2/registries.yaml");
        assert_eq!(file.mode().unwrap(), 0o400);

        let content = String::from_utf8(file.decode().unwrap()).unwrap();
        assert!(content.contains("https://mirror.local"));
    }
}
