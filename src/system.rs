//! Host facts: hostname, OS name, own executable

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Kernel hostname
pub fn hostname() -> Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes and gethostname NUL-terminates on success
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("Failed to look up hostname");
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

/// Absolute path of the running executable
pub fn self_exe() -> Result<String> {
    let path = std::env::current_exe().context("Failed to resolve own executable")?;
    Ok(path.display().to_string())
}

/// `PRETTY_NAME` from an os-release file
///
/// Quotes are removed, and a trailing `-<arch>` suffix is dropped.
pub fn os_pretty_name(os_release: &Path) -> Result<String> {
    let content = fs::read_to_string(os_release)
        .with_context(|| format!("Failed to read {}", os_release.display()))?;
    Ok(parse_pretty_name(&content, std::env::consts::ARCH))
}

fn parse_pretty_name(content: &str, arch: &str) -> String {
    let Some(value) = content
        .lines()
        .find_map(|line| line.trim().strip_prefix("PRETTY_NAME="))
    else {
        return String::new();
    };

    let value = value.trim().trim_matches('"').trim_matches('\'');
    let arch_suffix = format!("-{arch}");
    value
        .strip_suffix(&arch_suffix)
        .unwrap_or(value)
        .to_string()
}
