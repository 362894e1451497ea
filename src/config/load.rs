//! Loading configuration from disk
//!
//! Sources, lowest precedence first:
//! 1. Resource manifests found under the manifest directories
//! 2. The implicit config paths, in order (directories expand to their YAML files)
//! 3. The explicit config path, if given
//!
//! Each config file is preceded by the YAML files in its `<file>.d/`
//! directory, so the file's own values win over its overlays.

use super::merge::merge_values;
use super::validate::ValidationError;
use super::{Config, WRAPPER_KEY};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Where configuration is read from
#[derive(Debug, Clone)]
pub struct ConfigSources {
    /// Config files (or directories of them), lowest precedence first
    pub implicit_paths: Vec<PathBuf>,
    /// Directories searched recursively for resource manifests
    pub manifest_dirs: Vec<PathBuf>,
    /// Top-level key whose contents replace the document when present
    pub wrapper_key: String,
}

impl ConfigSources {
    /// Well-known locations on an installed system
    ///
    /// `config_dir` is the node's config directory (normally `/etc/nodestrap`).
    pub fn system(config_dir: &Path) -> Self {
        Self {
            implicit_paths: [
                "/usr/share/oem/nodestrap/bootstrap/config.yaml",
                "/usr/share/nodestrap/bootstrap/config.yaml",
                "/oem/userdata",
                "/oem/99_custom.yaml",
                "/oem/nodestrap/config.yaml",
                "/var/lib/cloud/instance/user-data.txt",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            manifest_dirs: vec![
                PathBuf::from("/usr/share/oem/nodestrap/manifests"),
                PathBuf::from("/usr/share/nodestrap/manifests"),
                config_dir.join("manifests"),
                PathBuf::from("/oem/nodestrap/manifests"),
            ],
            wrapper_key: WRAPPER_KEY.to_string(),
        }
    }

    /// Implicit paths with directories replaced by their YAML entries
    fn expanded_paths(&self) -> Vec<PathBuf> {
        let mut result = Vec::new();
        for path in &self.implicit_paths {
            if path.is_dir() {
                result.extend(yaml_entries(path));
            } else {
                result.push(path.clone());
            }
        }
        result
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

/// YAML files directly inside `dir`, sorted by name
fn yaml_entries(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_yaml(p))
        .collect();
    files.sort();
    files
}

/// Load and merge configuration
///
/// Unreadable implicit files are logged and skipped. A failure in the
/// explicit file is returned. Missing files contribute nothing.
pub fn load(sources: &ConfigSources, explicit: Option<&Path>) -> Result<Config> {
    let resources = load_resources(&sources.manifest_dirs);

    let mut values = Value::Object(Map::new());
    for path in sources.expanded_paths() {
        match merge_file(&values, &path, &sources.wrapper_key) {
            Ok(merged) => values = merged,
            Err(e) => log::info!("Failed to parse {}, skipping file: {e:#}", path.display()),
        }
    }

    if let Some(path) = explicit {
        values = merge_file(&values, path, &sources.wrapper_key)
            .with_context(|| format!("Failed to load config {}", path.display()))?;
    }

    normalize_role(&mut values)?;

    let mut config: Config =
        serde_json::from_value(values).context("Failed to decode merged configuration")?;

    // Manifest directory resources come before any declared in config files
    let declared = std::mem::take(&mut config.manifest);
    config.manifest = resources;
    config.manifest.extend(declared);

    Ok(config)
}

/// Unknown role names are a configuration error, not a decode failure
///
/// A null or empty role is dropped so it decodes as unset.
fn normalize_role(values: &mut Value) -> Result<()> {
    let Some(map) = values.as_object_mut() else {
        return Ok(());
    };
    match map.get("role") {
        None => {}
        Some(Value::Null) => {
            map.remove("role");
        }
        Some(Value::String(name)) if name.is_empty() => {
            map.remove("role");
        }
        Some(Value::String(name)) => {
            name.parse::<super::Role>().map_err(ValidationError::from)?;
        }
        Some(other) => return Err(ValidationError::InvalidRole(other.to_string()).into()),
    }
    Ok(())
}

/// Merge `path` (after its `.d` overlays) on top of `base`
fn merge_file(base: &Value, path: &Path, wrapper_key: &str) -> Result<Value> {
    let mut result = base.clone();

    for overlay in dot_d_files(path)? {
        result = merge_file(&result, &overlay, wrapper_key)?;
    }

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(result),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(result);
    }

    log::info!("Loading config file [{}]", path.display());
    let mut values: Value = serde_yaml::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    if values.is_null() {
        return Ok(result);
    }
    if !values.is_object() {
        bail!("{}: expected a map at the top level", path.display());
    }
    if let Some(inner) = values.get_mut(wrapper_key).filter(|v| v.is_object()) {
        values = inner.take();
    }

    merge_values(&mut result, values);
    Ok(result)
}

/// YAML files in `<path>.d/`, sorted by name
fn dot_d_files(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dir = path.as_os_str().to_os_string();
    dir.push(".d");
    let dir = PathBuf::from(dir);

    match fs::metadata(&dir) {
        Ok(meta) if meta.is_dir() => Ok(yaml_entries(&dir)),
        Ok(_) => Ok(Vec::new()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", dir.display())),
    }
}

/// Resource documents under `dirs`
///
/// Documents without both `apiVersion` and `kind` are skipped, as are
/// files that fail to parse.
pub fn load_resources(dirs: &[PathBuf]) -> Vec<Value> {
    let mut resources = Vec::new();

    for dir in dirs.iter().filter(|d| d.is_dir()) {
        let files = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_yaml(e.path()));

        for entry in files {
            match read_resources(entry.path()) {
                Ok(found) => resources.extend(found),
                Err(e) => log::warn!("Skipping manifest {}: {e:#}", entry.path().display()),
            }
        }
    }

    resources
}

fn read_resources(path: &Path) -> Result<Vec<Value>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = Value::deserialize(document)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if is_resource(&value) {
            resources.push(value);
        }
    }
    Ok(resources)
}

fn is_resource(value: &Value) -> bool {
    let non_empty = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
    };
    non_empty("apiVersion") && non_empty("kind")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use tempfile::TempDir;

    fn sources(temp: &TempDir, implicit: &[&str]) -> ConfigSources {
        ConfigSources {
            implicit_paths: implicit.iter().map(|p| temp.path().join(p)).collect(),
            manifest_dirs: vec![temp.path().join("manifests")],
            wrapper_key: WRAPPER_KEY.to_string(),
        }
    }

    fn write(temp: &TempDir, rel: &str, content: &str) -> PathBuf {
        let path = temp.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_files_contribute_nothing() {
        let temp = TempDir::new().unwrap();
        let cfg = load(&sources(&temp, &["a.yaml", "b.yaml"]), None).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_later_sources_win_and_lists_concatenate() {
        let temp = TempDir::new().unwrap();
        write(&temp, "a.yaml", "role: agent\nlabels: [a]\n");
        write(&temp, "b.yaml", "role: server\nlabels: [b]\n");

        let cfg = load(&sources(&temp, &["a.yaml", "b.yaml"]), None).unwrap();
        assert_eq!(cfg.role(), Some(Role::Server));
        assert_eq!(cfg.runtime.labels, vec!["a", "b"]);
    }

    #[test]
    fn test_explicit_path_has_highest_precedence() {
        let temp = TempDir::new().unwrap();
        write(&temp, "a.yaml", "server: https://a:6443\ntoken: one\n");
        let explicit = write(&temp, "explicit.yaml", "server: https://b:6443\n");

        let cfg = load(&sources(&temp, &["a.yaml"]), Some(&explicit)).unwrap();
        assert_eq!(cfg.runtime.server, "https://b:6443");
        assert_eq!(cfg.runtime.token, "one");
    }

    #[test]
    fn test_dot_d_overlays_merge_before_base() {
        let temp = TempDir::new().unwrap();
        write(&temp, "config.yaml", "token: base\nlabels: [base]\n");
        write(&temp, "config.yaml.d/20-b.yml", "token: b\nlabels: [b]\nnodeName: from-b\n");
        write(&temp, "config.yaml.d/10-a.yaml", "token: a\nlabels: [a]\n");
        write(&temp, "config.yaml.d/notes.txt", "token: ignored\n");

        let cfg = load(&sources(&temp, &["config.yaml"]), None).unwrap();
        assert_eq!(cfg.runtime.token, "base");
        assert_eq!(cfg.runtime.node_name, "from-b");
        assert_eq!(cfg.runtime.labels, vec!["a", "b", "base"]);
    }

    #[test]
    fn test_wrapper_key_unwrapped() {
        let temp = TempDir::new().unwrap();
        write(&temp, "user-data.txt", "#cloud-config\nhostname: x\nnodestrap:\n  role: cluster-init\n");

        let cfg = load(&sources(&temp, &["user-data.txt"]), None).unwrap();
        assert!(cfg.is_cluster_init());
    }

    #[test]
    fn test_directory_expands_to_yaml_files() {
        let temp = TempDir::new().unwrap();
        write(&temp, "userdata/b.yaml", "labels: [b]\n");
        write(&temp, "userdata/a.yml", "labels: [a]\n");
        write(&temp, "userdata/readme.md", "labels: [x]\n");

        let cfg = load(&sources(&temp, &["userdata"]), None).unwrap();
        assert_eq!(cfg.runtime.labels, vec!["a", "b"]);
    }

    #[test]
    fn test_broken_implicit_file_skipped() {
        let temp = TempDir::new().unwrap();
        write(&temp, "a.yaml", "token: good\n");
        write(&temp, "b.yaml", "token: [unclosed\n");

        let cfg = load(&sources(&temp, &["a.yaml", "b.yaml"]), None).unwrap();
        assert_eq!(cfg.runtime.token, "good");
    }

    #[test]
    fn test_broken_explicit_file_fails() {
        let temp = TempDir::new().unwrap();
        let explicit = write(&temp, "explicit.yaml", "token: [unclosed\n");
        assert!(load(&sources(&temp, &[]), Some(&explicit)).is_err());

        let list = write(&temp, "list.yaml", "- a\n- b\n");
        assert!(load(&sources(&temp, &[]), Some(&list)).is_err());
    }

    #[test]
    fn test_unknown_role_is_a_validation_error() {
        let temp = TempDir::new().unwrap();
        write(&temp, "a.yaml", "role: master\n");

        let err = load(&sources(&temp, &["a.yaml"]), None).unwrap_err();
        assert!(err.downcast_ref::<ValidationError>().is_some());
    }

    #[test]
    fn test_empty_role_decodes_as_unset() {
        let temp = TempDir::new().unwrap();
        write(&temp, "a.yaml", "role: \"\"\nserver: https://host:6443\ntoken: abc\n");
        write(&temp, "b.yaml", "role: ~\n");

        let cfg = load(&sources(&temp, &["a.yaml"]), None).unwrap();
        assert_eq!(cfg.role(), None);
        let cfg = load(&sources(&temp, &["b.yaml"]), None).unwrap();
        assert_eq!(cfg.role(), None);
    }

    #[test]
    fn test_manifest_resources_precede_file_resources() {
        let temp = TempDir::new().unwrap();
        write(
            &temp,
            "manifests/app/cm.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: from-dir\n---\nfoo: bar\n---\napiVersion: v1\nkind: Secret\nmetadata:\n  name: second\n",
        );
        write(&temp, "manifests/notes.txt", "apiVersion: v1\nkind: Pod\n");
        write(
            &temp,
            "a.yaml",
            "manifest:\n  - apiVersion: v1\n    kind: Namespace\n    metadata:\n      name: from-file\n",
        );

        let cfg = load(&sources(&temp, &["a.yaml"]), None).unwrap();
        let names: Vec<&str> = cfg
            .manifest
            .iter()
            .map(|r| r["metadata"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["from-dir", "second", "from-file"]);
    }
}
