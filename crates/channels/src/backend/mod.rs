//! Backend traits and implementations for talking to release endpoints.
//!
//! [`http::HttpBackend`] is the real implementation. Use [`MockBackend`] for
//! testing without network access:
//!
//! ```
//! use channels::backend::{Backend, MockBackend};
//!
//! let mock = MockBackend::new();
//! mock.add_redirect(
//!     "https://update.k3s.io/v1-release/channels/stable",
//!     "https://github.com/k3s-io/k3s/releases/tag/v1.30.2+k3s1",
//! );
//!
//! let location = mock
//!     .redirect_location("https://update.k3s.io/v1-release/channels/stable")
//!     .unwrap();
//! assert!(location.ends_with("v1.30.2+k3s1"));
//! assert_eq!(mock.calls(), 1);
//! ```

pub mod http;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Versions reported by an already-initialized cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    /// Kubernetes version running on the cluster (e.g. `v1.30.2+k3s1`).
    #[serde(default)]
    pub k8s_version: String,
    /// Operator version installed on the cluster.
    #[serde(default)]
    pub operator_version: String,
}

/// Backend trait for the network exchanges version resolution needs.
///
/// This abstraction keeps the resolver free of transport details and
/// lets tests count requests.
pub trait Backend: Send + Sync {
    /// Issue a GET that does not follow redirects and return the `Location`
    /// header of the response.
    fn redirect_location(&self, url: &str) -> Result<String>;

    /// Fetch a text document (following redirects).
    fn fetch_text(&self, url: &str) -> Result<String>;

    /// Fetch cluster information with a bearer token.
    fn cluster_info(&self, url: &str, token: &str) -> Result<ClusterInfo>;

    /// Fetch a body from a server whose certificate is not yet trusted.
    fn fetch_insecure(&self, url: &str) -> Result<String>;
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn redirect_location(&self, url: &str) -> Result<String> {
        (**self).redirect_location(url)
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        (**self).fetch_text(url)
    }

    fn cluster_info(&self, url: &str, token: &str) -> Result<ClusterInfo> {
        (**self).cluster_info(url, token)
    }

    fn fetch_insecure(&self, url: &str) -> Result<String> {
        (**self).fetch_insecure(url)
    }
}

/// Mock backend for testing without network access.
///
/// Responses are keyed by URL; every trait call increments [`MockBackend::calls`].
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    redirects: Arc<Mutex<HashMap<String, String>>>,
    documents: Arc<Mutex<HashMap<String, String>>>,
    clusters: Arc<Mutex<HashMap<String, ClusterInfo>>>,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    /// Create a new empty mock backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with a redirect to `location`.
    pub fn add_redirect(&self, url: impl Into<String>, location: impl Into<String>) {
        self.redirects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), location.into());
    }

    /// Answer `url` with a text body (used by both text fetches).
    pub fn add_document(&self, url: impl Into<String>, body: impl Into<String>) {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), body.into());
    }

    /// Answer cluster-info requests to `url`.
    pub fn add_cluster(&self, url: impl Into<String>, info: ClusterInfo) {
        self.clusters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), info);
    }

    /// Number of backend calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn not_found(url: &str) -> Error {
        Error::http(format!("mock response not configured: {url}"), Some(404))
    }
}

impl Backend for MockBackend {
    fn redirect_location(&self, url: &str) -> Result<String> {
        self.record();
        self.redirects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| Error::MissingLocation {
                url: url.to_string(),
            })
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        self.record();
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| Self::not_found(url))
    }

    fn cluster_info(&self, url: &str, _token: &str) -> Result<ClusterInfo> {
        self.record();
        self.clusters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| Self::not_found(url))
    }

    fn fetch_insecure(&self, url: &str) -> Result<String> {
        self.fetch_text(url)
    }
}
