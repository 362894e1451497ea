//! # channels
//!
//! Resolve Kubernetes release channels and operator chart repositories to
//! concrete versions.
//!
//! This crate provides:
//! - Channel lookup for k3s and rke2 (`stable`, `latest`, `v1.30`, ...)
//! - Operator version lookup from a Helm chart index
//! - Cluster-info queries against an already running cluster
//! - A shared [`VersionCache`] so each channel is looked up once
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use channels::{MockBackend, Resolver, VersionCache};
//!
//! let backend = MockBackend::new();
//! backend.add_redirect(
//!     "https://update.k3s.io/v1-release/channels/stable",
//!     "https://github.com/k3s-io/k3s/releases/tag/v1.30.2+k3s1",
//! );
//!
//! let resolver = Resolver::new(backend.clone(), Arc::new(VersionCache::new()));
//! assert_eq!(resolver.resolve_kubernetes_version("stable").unwrap(), "v1.30.2+k3s1");
//!
//! // Concrete versions pass through untouched
//! assert_eq!(resolver.resolve_kubernetes_version("v1.29.0+k3s1").unwrap(), "v1.29.0+k3s1");
//! assert_eq!(backend.calls(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cache;
pub mod error;
pub mod resolver;
pub mod retry;

pub use backend::http::HttpBackend;
pub use backend::{Backend, ClusterInfo, MockBackend};
pub use cache::VersionCache;
pub use error::{Error, ErrorCategory, Result};
pub use resolver::{ClusterVersions, Endpoints, Resolver, VersionRef};
pub use retry::RetryConfig;
