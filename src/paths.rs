//! Filesystem locations used by nodestrap
//!
//! Both directories can be moved with `--data-dir` / `--config-dir`, which
//! clap also reads from `NODESTRAP_DATA_DIR` / `NODESTRAP_CONFIG_DIR`.

use std::path::PathBuf;

/// State directory for plan, token and stamps
pub const DEFAULT_DATA_DIR: &str = "/var/lib/nodestrap";

/// Node config directory, holding `manifests/` and the kubeconfig link
pub const DEFAULT_CONFIG_DIR: &str = "/etc/nodestrap";

/// Join token written by the bootstrap plan
pub fn token_file(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("token")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_file() {
        assert_eq!(
            token_file(std::path::Path::new(DEFAULT_DATA_DIR)),
            PathBuf::from("/var/lib/nodestrap/token")
        );
    }

    #[test]
    fn test_defaults_are_absolute() {
        assert!(PathBuf::from(DEFAULT_DATA_DIR).is_absolute());
        assert!(PathBuf::from(DEFAULT_CONFIG_DIR).is_absolute());
    }
}
