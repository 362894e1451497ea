//! Channel and chart version resolution.

use crate::backend::Backend;
use crate::cache::VersionCache;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Channel used when no Kubernetes version is configured.
pub const DEFAULT_CHANNEL: &str = "stable";

/// Chart repository used when no operator repository is configured.
pub const DEFAULT_CHART_REPO: &str = "latest";

/// Port the operator exposes cluster information on.
pub const CLUSTER_INFO_PORT: u16 = 30443;

/// Placeholder replaced by the channel or repository name in endpoint templates.
const PLACEHOLDER: &str = "{}";

/// Remote endpoints the resolver talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// k3s channel redirect template.
    pub k3s_channel: String,
    /// rke2 channel redirect template.
    pub rke2_channel: String,
    /// Operator chart index template, keyed by repository.
    pub chart_index: String,
    /// Chart name inside the index.
    pub chart_name: String,
    /// Port of the cluster-info endpoint on an existing cluster.
    pub cluster_info_port: u16,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            k3s_channel: "https://update.k3s.io/v1-release/channels/{}".to_string(),
            rke2_channel: "https://update.rke2.io/v1-release/channels/{}".to_string(),
            chart_index: "https://charts.nodestrap.io/{}/index.yaml".to_string(),
            chart_name: "nodestrap-operator".to_string(),
            cluster_info_port: CLUSTER_INFO_PORT,
        }
    }
}

/// Outcome of inspecting a version string before any network access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRef {
    /// Usable as-is (concrete version, head tag or path-like reference).
    Direct(String),
    /// Needs a lookup against this URL.
    Lookup(String),
}

/// Decide whether `input` is already a version or must be looked up.
///
/// Empty input falls back to `default`. A `v`-prefixed string with at least
/// three dot-separated segments is a concrete version. Strings ending in
/// `-head` or containing `/` are used directly. Anything that is not already
/// an http(s) URL is expanded with `template`.
pub fn classify(template: &str, default: &str, input: &str) -> VersionRef {
    let version = if input.is_empty() { default } else { input };

    if version.starts_with('v') && version.split('.').count() > 2 {
        return VersionRef::Direct(version.to_string());
    }

    if version.starts_with("https://") || version.starts_with("http://") {
        return VersionRef::Lookup(version.to_string());
    }

    if version.ends_with("-head") || version.contains('/') {
        return VersionRef::Direct(version.to_string());
    }

    VersionRef::Lookup(template.replacen(PLACEHOLDER, version, 1))
}

/// Final non-empty path segment of a redirect `Location`.
pub fn last_path_segment(location: &str) -> Option<String> {
    let path = match Url::parse(location) {
        Ok(url) => url.path().to_string(),
        Err(_) => location
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct ChartIndex {
    #[serde(default)]
    entries: HashMap<String, Vec<ChartEntry>>,
}

#[derive(Debug, Deserialize)]
struct ChartEntry {
    #[serde(default)]
    version: String,
    #[serde(default, rename = "appVersion")]
    app_version: String,
}

/// Versions of an existing cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterVersions {
    /// Kubernetes version.
    pub kubernetes: String,
    /// Operator version.
    pub operator: String,
}

/// Resolves channel names to concrete versions through a [`Backend`].
pub struct Resolver<B: Backend> {
    backend: B,
    cache: Arc<VersionCache>,
    endpoints: Endpoints,
}

impl<B: Backend> Resolver<B> {
    /// Create a resolver with the default endpoints.
    pub fn new(backend: B, cache: Arc<VersionCache>) -> Self {
        Self::with_endpoints(backend, cache, Endpoints::default())
    }

    /// Create a resolver against custom endpoints.
    pub fn with_endpoints(backend: B, cache: Arc<VersionCache>, endpoints: Endpoints) -> Self {
        Self {
            backend,
            cache,
            endpoints,
        }
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<VersionCache> {
        &self.cache
    }

    /// Resolve a Kubernetes version or channel, optionally suffixed with
    /// `:k3s` or `:rke2` to pick the channel server.
    pub fn resolve_kubernetes_version(&self, input: &str) -> Result<String> {
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.kubernetes.get(input) {
            return Ok(cached.clone());
        }

        let (version, template) = if let Some(stripped) = input.strip_suffix(":rke2") {
            (stripped, &self.endpoints.rke2_channel)
        } else {
            (
                input.strip_suffix(":k3s").unwrap_or(input),
                &self.endpoints.k3s_channel,
            )
        };

        let url = match classify(template, DEFAULT_CHANNEL, version) {
            VersionRef::Direct(version) => return Ok(version),
            VersionRef::Lookup(url) => url,
        };

        let location = self.backend.redirect_location(&url)?;
        let resolved = last_path_segment(&location).ok_or_else(|| {
            Error::invalid_response(&url, format!("no version in location {location}"))
        })?;

        log::info!("Resolving Kubernetes version [{input}] to {resolved} from {url}");
        cache.kubernetes.insert(input.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Resolve an operator version against the chart index of `chart_repo`.
    pub fn resolve_operator_version(&self, chart_repo: &str, input: &str) -> Result<String> {
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.operator.get(input) {
            return Ok(cached.clone());
        }

        let repo = if chart_repo.is_empty() {
            DEFAULT_CHART_REPO
        } else {
            chart_repo
        };

        let url = match classify(&self.endpoints.chart_index, repo, input) {
            VersionRef::Direct(version) => return Ok(version),
            VersionRef::Lookup(url) => url,
        };

        let body = self.backend.fetch_text(&url)?;
        let index: ChartIndex =
            serde_yaml::from_str(&body).map_err(|e| Error::invalid_response(&url, e))?;

        let entry = index
            .entries
            .get(&self.endpoints.chart_name)
            .and_then(|versions| versions.first())
            .ok_or_else(|| Error::ChartNotFound {
                chart: self.endpoints.chart_name.clone(),
                url: url.clone(),
            })?;

        let resolved = if entry.app_version.is_empty() {
            format!("v{}", entry.version)
        } else {
            entry.app_version.clone()
        };

        log::info!(
            "Resolving {} version [{input}] to {resolved} from {url}",
            self.endpoints.chart_name
        );
        cache.operator.insert(input.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Ask an existing cluster which versions it runs, and seed the cache
    /// with them so later lookups of those versions need no network.
    pub fn resolve_cluster_versions(&self, server_url: &str, token: &str) -> Result<ClusterVersions> {
        if server_url.is_empty() || token.is_empty() {
            return Err(Error::Other(
                "server and token must be provided".to_string(),
            ));
        }

        let host = server_host(server_url)?;
        let url = format!(
            "https://{host}:{}/v1-cluster/cluster-info",
            self.endpoints.cluster_info_port
        );
        let info = self.backend.cluster_info(&url, token)?;

        let mut cache = self.cache.lock();
        cache
            .kubernetes
            .insert(info.k8s_version.clone(), info.k8s_version.clone());
        cache
            .operator
            .insert(info.operator_version.clone(), info.operator_version.clone());

        log::debug!(
            "Cluster at {host} runs Kubernetes {} with operator {}",
            info.k8s_version,
            info.operator_version
        );

        Ok(ClusterVersions {
            kubernetes: info.k8s_version,
            operator: info.operator_version,
        })
    }

    /// Check that a join server answers `GET /ping` with `pong`.
    pub fn check_server(&self, server_url: &str) -> Result<()> {
        let url = format!("{}/ping", server_url.trim_end_matches('/'));
        let body = self.backend.fetch_insecure(&url)?;
        if body.trim() != "pong" {
            return Err(Error::ServerNotReady { url, body });
        }
        Ok(())
    }
}

fn server_host(server_url: &str) -> Result<String> {
    let parsed = Url::parse(server_url).map_err(|e| Error::InvalidServerUrl {
        url: server_url.to_string(),
        message: e.to_string(),
    })?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidServerUrl {
            url: server_url.to_string(),
            message: "missing host".to_string(),
        })
}
