//! Join token assignment

use super::runtime::Runtime;
use anyhow::{Context, Result};
use rand::Rng;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::Path;

const TOKEN_CHARS: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const TOKEN_LENGTH: usize = 54;

/// Random token from an alphabet without vowels or lookalike characters
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| char::from(TOKEN_CHARS[rng.gen_range(0..TOKEN_CHARS.len())]))
        .collect()
}

/// Token in a previously written runtime config under `host_root`
pub fn existing(host_root: &Path, runtime: Runtime) -> Result<Option<String>> {
    let path = host_root.join(runtime.config_path().trim_start_matches('/'));
    let data = match fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    let config: Value =
        serde_yaml::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config
        .get("token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string))
}

/// Keep `current`, else reuse the on-disk token, else generate one
pub fn assign(current: &str, host_root: &Path, runtime: Runtime) -> Result<String> {
    if !current.is_empty() {
        return Ok(current.to_string());
    }
    if let Some(token) = existing(host_root, runtime)? {
        log::debug!("Reusing token from {}", runtime.config_path());
        return Ok(token);
    }
    Ok(generate())
}
