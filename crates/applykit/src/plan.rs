//! Plan data model.
//!
//! A plan is serialized as camelCase JSON. File contents are base64 so the
//! document stays valid JSON for binary payloads.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mode used for files that do not declare permissions.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Files to reconcile, instructions to run, probes to wait on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Files written before any instruction runs, in order.
    #[serde(default)]
    pub files: Vec<File>,
    /// Instructions run sequentially, in order.
    #[serde(default)]
    pub one_time_instructions: Vec<OneTimeInstruction>,
    /// Named health probes.
    #[serde(default)]
    pub probes: BTreeMap<String, Probe>,
}

impl Plan {
    /// Create an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all instructions, in execution order.
    pub fn instruction_names(&self) -> Vec<&str> {
        self.one_time_instructions
            .iter()
            .map(|i| i.name.as_str())
            .collect()
    }

    /// Find an instruction by name.
    pub fn instruction(&self, name: &str) -> Option<&OneTimeInstruction> {
        self.one_time_instructions.iter().find(|i| i.name == name)
    }

    /// Find a file by target path.
    pub fn file(&self, path: &str) -> Option<&File> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Serialize as pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a plan document.
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

/// A file to materialize on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    /// Absolute target path.
    pub path: String,
    /// Base64-encoded content.
    #[serde(default)]
    pub content: String,
    /// Octal mode string; empty means [`DEFAULT_FILE_MODE`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub permissions: String,
}

impl File {
    /// Build a file from raw bytes.
    pub fn new(path: impl Into<String>, data: impl AsRef<[u8]>) -> Self {
        Self {
            path: path.into(),
            content: STANDARD.encode(data),
            permissions: String::new(),
        }
    }

    /// Set the permission string.
    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = permissions.into();
        self
    }

    /// Decoded content.
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD.decode(&self.content).map_err(|e| Error::Decode {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// Mode parsed from the octal permission string.
    pub fn mode(&self) -> Result<u32> {
        if self.permissions.is_empty() {
            return Ok(DEFAULT_FILE_MODE);
        }
        u32::from_str_radix(&self.permissions, 8)
            .ok()
            .filter(|mode| *mode <= 0o7777)
            .ok_or_else(|| Error::Permissions {
                path: self.path.clone(),
                value: self.permissions.clone(),
            })
    }
}

/// A named unit of work: a host command, or a container image to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeInstruction {
    /// Unique name, used as the output key.
    #[serde(default)]
    pub name: String,
    /// Executable to run on the host.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    /// Arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment, as `KEY=VALUE`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Container image to run instead of (or wrapping) the command.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// Keep stdout/stderr in the plan output.
    #[serde(default)]
    pub save_output: bool,
}

impl OneTimeInstruction {
    /// Host command instruction.
    pub fn command<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            save_output: true,
            ..Self::default()
        }
    }

    /// Container image instruction.
    pub fn image(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            save_output: true,
            ..Self::default()
        }
    }

    /// Append environment entries.
    pub fn with_env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(env.into_iter().map(Into::into));
        self
    }

    /// Value of an environment entry, if set.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// HTTP health check with hysteresis thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    /// Grace period before the first check.
    #[serde(default)]
    pub initial_delay_seconds: u64,
    /// Deadline of a single check.
    #[serde(default)]
    pub timeout_seconds: u64,
    /// Consecutive successes that flip the probe to healthy.
    #[serde(default = "default_threshold")]
    pub success_threshold: u32,
    /// Consecutive failures that flip the probe to unhealthy.
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,
    /// Check target.
    pub http_get: HttpGetAction,
}

fn default_threshold() -> u32 {
    1
}

impl Probe {
    /// Probe with the given target and default timings.
    pub fn http(http_get: HttpGetAction) -> Self {
        Self {
            initial_delay_seconds: 0,
            timeout_seconds: 0,
            success_threshold: 1,
            failure_threshold: 1,
            http_get,
        }
    }

    /// Reject zero thresholds and an empty URL.
    pub fn validate(&self, name: &str) -> Result<()> {
        let invalid = |message: &str| Error::InvalidProbe {
            name: name.to_string(),
            message: message.to_string(),
        };
        if self.success_threshold == 0 {
            return Err(invalid("successThreshold must be at least 1"));
        }
        if self.failure_threshold == 0 {
            return Err(invalid("failureThreshold must be at least 1"));
        }
        if self.http_get.url.is_empty() {
            return Err(invalid("httpGet.url is required"));
        }
        Ok(())
    }

    /// Whether the probe needs certificate files on disk.
    pub fn uses_tls_files(&self) -> bool {
        let action = &self.http_get;
        !(action.ca_cert.is_empty() && action.client_cert.is_empty() && action.client_key.is_empty())
    }
}

/// HTTP GET target of a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpGetAction {
    /// URL to GET.
    pub url: String,
    /// Skip server certificate verification.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure: bool,
    /// PEM file with the CA to trust.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca_cert: String,
    /// PEM file with the client certificate.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_cert: String,
    /// PEM file with the client key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_content_is_base64() {
        let file = File::new("/var/lib/nodestrap/token", "abc\n");
        assert_eq!(file.content, "YWJjCg==");
        assert_eq!(file.decode().unwrap(), b"abc\n");
    }

    #[test]
    fn test_file_mode_parses_octal() {
        let file = File::new("/etc/x", "");
        assert_eq!(file.mode().unwrap(), 0o644);
        assert_eq!(file.clone().with_permissions("600").mode().unwrap(), 0o600);
        assert_eq!(file.clone().with_permissions("0400").mode().unwrap(), 0o400);
        assert!(file.clone().with_permissions("rw-").mode().is_err());
        assert!(file.with_permissions("99").mode().is_err());
    }

    #[test]
    fn test_plan_json_uses_camel_case() {
        let mut plan = Plan::new();
        plan.files.push(File::new("/tmp/a", "a").with_permissions("600"));
        plan.one_time_instructions.push(
            OneTimeInstruction::command("probes", "/usr/bin/nodestrap", ["probe"])
                .with_env(["KUBECONFIG=/etc/rancher/k3s/k3s.yaml"]),
        );
        plan.probes.insert(
            "kubelet".to_string(),
            Probe::http(HttpGetAction {
                url: "http://127.0.0.1:10248/healthz".to_string(),
                ..HttpGetAction::default()
            }),
        );

        let json = plan.to_json_pretty().unwrap();
        assert!(json.contains("\"oneTimeInstructions\""));
        assert!(json.contains("\"saveOutput\": true"));
        assert!(json.contains("\"httpGet\""));
        assert!(json.contains("\"successThreshold\": 1"));
        assert!(!json.contains("\"insecure\""));

        let parsed = Plan::from_json(&json).unwrap();
        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_instruction_from_user_config() {
        let instruction: OneTimeInstruction =
            serde_json::from_str(r#"{"name":"hello","command":"echo","args":["hi"]}"#).unwrap();
        assert_eq!(instruction.name, "hello");
        assert!(instruction.image.is_empty());
        assert!(!instruction.save_output);
    }

    #[test]
    fn test_env_value() {
        let instruction = OneTimeInstruction::image("install-k3s", "rancher/x:v1")
            .with_env(["K3S_URL=https://host:6443", "EMPTY="]);
        assert_eq!(instruction.env_value("K3S_URL"), Some("https://host:6443"));
        assert_eq!(instruction.env_value("EMPTY"), Some(""));
        assert_eq!(instruction.env_value("K3S_TOKEN"), None);
    }

    #[test]
    fn test_probe_validation() {
        let mut probe = Probe::http(HttpGetAction {
            url: "http://127.0.0.1:10248/healthz".to_string(),
            ..HttpGetAction::default()
        });
        assert!(probe.validate("kubelet").is_ok());

        probe.success_threshold = 0;
        assert!(probe.validate("kubelet").is_err());

        probe.success_threshold = 1;
        probe.failure_threshold = 0;
        assert!(probe.validate("kubelet").is_err());
    }

    #[test]
    fn test_probe_thresholds_default_to_one() {
        let probe: Probe =
            serde_json::from_str(r#"{"httpGet":{"url":"http://127.0.0.1:10248/healthz"}}"#)
                .unwrap();
        assert_eq!(probe.success_threshold, 1);
        assert_eq!(probe.failure_threshold, 1);
        assert!(!probe.uses_tls_files());
    }
}
