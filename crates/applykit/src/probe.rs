//! Health probes with consecutive-result thresholds.
//!
//! A probe starts unhealthy. It flips to healthy after `successThreshold`
//! consecutive successes and back to unhealthy after `failureThreshold`
//! consecutive failures, so a single flaky result never flips it.

use crate::error::{Error, Result};
use crate::plan::{HttpGetAction, Plan, Probe};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;
use ureq::Agent;
use ureq::tls::{Certificate, ClientCert, PemItem, PrivateKey, RootCerts, TlsConfig};

/// Timeout used when a probe declares none.
const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Consecutive counters and current state of one probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeStatus {
    pub success_count: u32,
    pub failure_count: u32,
    pub healthy: bool,
}

impl ProbeStatus {
    /// Fold one check result into the status.
    pub fn record(&mut self, success: bool, probe: &Probe) {
        if success {
            self.failure_count = 0;
            self.success_count = self.success_count.saturating_add(1);
            if self.success_count >= probe.success_threshold {
                self.healthy = true;
            }
        } else {
            self.success_count = 0;
            self.failure_count = self.failure_count.saturating_add(1);
            if self.failure_count >= probe.failure_threshold {
                self.healthy = false;
            }
        }
    }
}

/// Performs a single health check.
pub trait HealthCheck {
    /// `Ok` when the target is healthy.
    fn check(&self, action: &HttpGetAction, timeout: Duration) -> Result<()>;
}

/// HTTP GET check; any status in 200..400 is healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpCheck;

impl HttpCheck {
    fn agent(action: &HttpGetAction, timeout: Duration) -> Result<Agent> {
        let mut tls = TlsConfig::builder().disable_verification(action.insecure);

        if !action.ca_cert.is_empty() {
            let certs = load_certificates(&action.ca_cert)?;
            tls = tls.root_certs(RootCerts::new_with_certs(&certs));
        }

        if !action.client_cert.is_empty() && !action.client_key.is_empty() {
            let chain = load_certificates(&action.client_cert)?;
            let key_pem = read_pem(&action.client_key)?;
            let key = PrivateKey::from_pem(&key_pem).map_err(|e| Error::Tls {
                path: action.client_key.clone(),
                message: e.to_string(),
            })?;
            tls = tls.client_cert(Some(ClientCert::new_with_certs(&chain, key)));
        }

        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .tls_config(tls.build())
            .build();
        Ok(Agent::new_with_config(config))
    }
}

impl HealthCheck for HttpCheck {
    fn check(&self, action: &HttpGetAction, timeout: Duration) -> Result<()> {
        let agent = Self::agent(action, timeout)?;
        let response = agent
            .get(&action.url)
            .call()
            .map_err(|e| Error::check(&action.url, e))?;

        let status = response.status().as_u16();
        if (200..400).contains(&status) {
            Ok(())
        } else {
            Err(Error::check(&action.url, format!("HTTP {status}")))
        }
    }
}

fn read_pem(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Tls {
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn load_certificates(path: &str) -> Result<Vec<Certificate<'static>>> {
    let pem = read_pem(path)?;
    let mut certs = Vec::new();
    for item in ureq::tls::parse_pem(&pem) {
        let item = item.map_err(|e| Error::Tls {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        if let PemItem::Certificate(cert) = item {
            certs.push(cert.to_owned());
        }
    }
    if certs.is_empty() {
        return Err(Error::Tls {
            path: path.to_string(),
            message: "no certificates found".to_string(),
        });
    }
    Ok(certs)
}

/// Polls probes until all of them are healthy at once.
pub struct Prober<C: HealthCheck = HttpCheck> {
    check: C,
    sleep: fn(Duration),
}

impl Prober<HttpCheck> {
    /// Prober using HTTP checks.
    pub fn new() -> Self {
        Self::with_check(HttpCheck)
    }
}

impl Default for Prober<HttpCheck> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: HealthCheck> Prober<C> {
    /// Prober with a custom check.
    pub fn with_check(check: C) -> Self {
        Self {
            check,
            sleep: thread::sleep,
        }
    }

    /// Replace the sleep function (tests use a no-op).
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    /// Check every probe once and fold the results into `statuses`.
    ///
    /// On the first iteration the longest initial delay is waited out before
    /// any check runs. Only state changes are logged.
    pub fn do_probes(
        &self,
        probes: &BTreeMap<String, Probe>,
        statuses: &mut BTreeMap<String, ProbeStatus>,
        initial: bool,
    ) {
        if initial {
            let delay = probes
                .values()
                .map(|p| p.initial_delay_seconds)
                .max()
                .unwrap_or(0);
            if delay > 0 {
                (self.sleep)(Duration::from_secs(delay));
            }
        }

        for (name, probe) in probes {
            let timeout = match probe.timeout_seconds {
                0 => DEFAULT_CHECK_TIMEOUT,
                secs => Duration::from_secs(secs),
            };
            let result = self.check.check(&probe.http_get, timeout);
            if let Err(e) = &result {
                log::trace!("Probe [{name}] check failed: {e}");
            }

            let previous = statuses.get(name).copied();
            let status = statuses.entry(name.clone()).or_default();
            status.record(result.is_ok(), probe);

            if previous.is_none_or(|p| p.healthy != status.healthy) {
                if status.healthy {
                    log::info!("Probe [{name}] is healthy");
                } else {
                    log::info!("Probe [{name}] is unhealthy");
                }
            }
        }
    }

    /// Poll `probes` every `interval` until all are healthy.
    ///
    /// There is no overall deadline.
    pub fn run(&self, probes: &BTreeMap<String, Probe>, interval: Duration) -> Result<()> {
        for (name, probe) in probes {
            probe.validate(name)?;
        }

        let mut statuses = BTreeMap::new();
        let mut initial = true;
        loop {
            self.do_probes(probes, &mut statuses, initial);
            if statuses.values().all(|s| s.healthy) {
                log::info!("All probes are healthy");
                return Ok(());
            }
            initial = false;
            (self.sleep)(interval);
        }
    }
}

/// Load the plan at `plan_file` and wait for its probes.
pub fn run_probes(plan_file: &Path, interval: Duration) -> Result<()> {
    let data = fs::read_to_string(plan_file).map_err(|e| Error::io("opening plan", plan_file, e))?;
    let plan = Plan::from_json(&data)?;

    if plan.probes.is_empty() {
        log::info!("No probes defined in {}", plan_file.display());
        return Ok(());
    }

    log::info!("Running probes defined in {}", plan_file.display());
    Prober::new().run(&plan.probes, interval)
}
