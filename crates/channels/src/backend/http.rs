//! HTTP backend built on a blocking `ureq` agent.
//!
//! Every exchange carries a short global timeout and goes through
//! [`with_retry`](crate::retry::with_retry), so a dropped connection during
//! boot is retried a few times before the error reaches the bootstrap loop.

use crate::backend::{Backend, ClusterInfo};
use crate::error::{Error, Result};
use crate::retry::{RetryConfig, with_retry};
use std::time::Duration;
use ureq::Agent;
use ureq::tls::TlsConfig;

/// Per-request timeout for release and cluster endpoints.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Redirect limit for document fetches.
const MAX_REDIRECTS: u32 = 10;

/// Real network backend.
pub struct HttpBackend {
    /// Agent that returns redirect responses instead of following them.
    no_redirect: Agent,
    /// Agent that follows redirects and verifies TLS.
    verified: Agent,
    /// Agent that skips TLS verification (cluster endpoints with self-signed certs).
    insecure: Agent,
    retry: RetryConfig,
}

impl HttpBackend {
    /// Create a backend with the default transport retry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retry(RetryConfig::default())
    }

    /// Create a backend with a custom transport retry.
    #[must_use]
    pub fn with_retry(retry: RetryConfig) -> Self {
        Self {
            no_redirect: agent(0, true),
            verified: agent(MAX_REDIRECTS, true),
            insecure: agent(MAX_REDIRECTS, false),
            retry,
        }
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn agent(max_redirects: u32, verify: bool) -> Agent {
    let tls = TlsConfig::builder().disable_verification(!verify).build();
    let config = Agent::config_builder()
        .timeout_global(Some(REQUEST_TIMEOUT))
        .http_status_as_error(false)
        .max_redirects(max_redirects)
        .max_redirects_will_error(false)
        .tls_config(tls)
        .user_agent("nodestrap")
        .build();
    Agent::new_with_config(config)
}

fn read_success_body(url: &str, mut response: ureq::http::Response<ureq::Body>) -> Result<String> {
    let status = response.status().as_u16();
    if !response.status().is_success() {
        return Err(Error::http(format!("GET {url}: HTTP {status}"), Some(status)));
    }
    response
        .body_mut()
        .read_to_string()
        .map_err(|e| Error::invalid_response(url, e))
}

impl Backend for HttpBackend {
    fn redirect_location(&self, url: &str) -> Result<String> {
        with_retry(&self.retry, || {
            let response = self.no_redirect.get(url).call()?;
            let status = response.status().as_u16();

            if let Some(location) = response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
            {
                return Ok(location.to_string());
            }

            if response.status().is_redirection() || response.status().is_success() {
                Err(Error::MissingLocation {
                    url: url.to_string(),
                })
            } else {
                Err(Error::http(format!("GET {url}: HTTP {status}"), Some(status)))
            }
        })
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        with_retry(&self.retry, || {
            let response = self.verified.get(url).call()?;
            read_success_body(url, response)
        })
    }

    fn cluster_info(&self, url: &str, token: &str) -> Result<ClusterInfo> {
        with_retry(&self.retry, || {
            let response = self
                .insecure
                .get(url)
                .header("Authorization", format!("Bearer {token}"))
                .call()?;
            let body = read_success_body(url, response)?;
            serde_json::from_str(&body).map_err(|e| Error::invalid_response(url, e))
        })
    }

    fn fetch_insecure(&self, url: &str) -> Result<String> {
        with_retry(&self.retry, || {
            let response = self.insecure.get(url).call()?;
            read_success_body(url, response)
        })
    }
}
