//! Bootstrapping a node
//!
//! [`Bootstrap::run`] is idempotent: once a node is bootstrapped the done
//! stamp makes later runs a no-op until `--force` is given. Each attempt
//! loads and validates the configuration, resolves versions, builds a plan
//! and applies it. Transient failures are retried after a backoff; invalid
//! configuration stops the loop immediately.

pub mod images;
pub mod manifest;
pub mod operator;
pub mod plan;
pub mod probes;
pub mod registry;
pub mod run;
pub mod runtime;
pub mod token;

pub use plan::{PlanContext, build_plan};
pub use run::{plan_file, plan_output, run_plan};

use crate::config::{self, Config, ConfigSources, Overrides, ValidationError};
use anyhow::{Context, Result};
use applykit::Applier;
use channels::{Backend, Resolver};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Backoff between bootstrap attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(15);

// ============================================================================
// Cancellation
// ============================================================================

/// Returned when the loop is cancelled while waiting to retry
#[derive(Debug, thiserror::Error)]
#[error("bootstrap cancelled")]
pub struct Cancelled;

/// Cancellation flag a waiting thread can be woken by
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`; returns true if cancelled
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

// ============================================================================
// Options
// ============================================================================

/// How often and how long to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    /// Give up after this many attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    /// Bootstrap again even if already done
    pub force: bool,
    /// Config file with the highest precedence
    pub config_path: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub overrides: Overrides,
}

/// Facts about the machine being bootstrapped
#[derive(Debug, Clone)]
pub struct Host {
    pub hostname: String,
    /// Path of this executable, used by generated instructions
    pub self_exe: String,
    /// Where the host's filesystem is mounted (`/` outside tests)
    pub root: PathBuf,
}

// ============================================================================
// Stamps
// ============================================================================

/// Written at the start of every attempt
pub fn working_stamp(data_dir: &Path) -> PathBuf {
    data_dir.join("working")
}

/// Written once the node is bootstrapped
pub fn done_stamp(data_dir: &Path) -> PathBuf {
    data_dir.join("bootstrapped")
}

/// Record `cfg` in a private stamp file, without the join token
fn write_stamp(path: &Path, cfg: &Config) -> Result<()> {
    let mut recorded = cfg.clone();
    recorded.runtime.token.clear();
    let data = serde_yaml::to_string(&recorded).context("Failed to encode config")?;

    let mut file = run::create_private(path)?;
    file.write_all(data.as_bytes())
        .with_context(|| format!("Failed to write stamp {}", path.display()))
}

/// Config recorded in a stamp, if the stamp exists
pub fn read_stamp(path: &Path) -> Result<Option<Config>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let cfg = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse stamp {}", path.display()))?;
    Ok(Some(cfg))
}

// ============================================================================
// Bootstrap
// ============================================================================

pub struct Bootstrap<B: Backend, A: Applier> {
    options: BootstrapOptions,
    sources: ConfigSources,
    resolver: Resolver<B>,
    applier: A,
    host: Host,
    policy: RetryPolicy,
}

impl<B: Backend, A: Applier> Bootstrap<B, A> {
    pub fn new(
        options: BootstrapOptions,
        sources: ConfigSources,
        resolver: Resolver<B>,
        applier: A,
        host: Host,
    ) -> Self {
        Self {
            options,
            sources,
            resolver,
            applier,
            host,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether the done stamp exists; `force` removes it first
    fn is_done(&self) -> Result<bool> {
        let stamp = done_stamp(&self.options.data_dir);
        if self.options.force {
            match fs::remove_file(&stamp) {
                Ok(()) => log::debug!("Removed {}", stamp.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", stamp.display()));
                }
            }
            return Ok(false);
        }
        stamp
            .try_exists()
            .with_context(|| format!("Failed to check done stamp [{}]", stamp.display()))
    }

    /// Bootstrap until success, invalid configuration, or cancellation
    pub fn run(&self, cancel: &CancelToken) -> Result<()> {
        if self.is_done()? {
            log::info!(
                "System is already bootstrapped, run with --force to bootstrap it again"
            );
            return Ok(());
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match self.execute() {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if err.downcast_ref::<ValidationError>().is_some() {
                return Err(err.context("Invalid configuration"));
            }
            if self.policy.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(err.context(format!("Bootstrap failed after {attempt} attempt(s)")));
            }

            log::warn!(
                "Failed to bootstrap system, will retry in {}s: {err:#}",
                self.policy.backoff.as_secs()
            );
            if cancel.wait(self.policy.backoff) {
                return Err(Cancelled.into());
            }
        }
    }

    /// One bootstrap attempt
    fn execute(&self) -> Result<()> {
        let data_dir = &self.options.data_dir;

        let mut cfg = config::load(&self.sources, self.options.config_path.as_deref())
            .context("Failed to load config")?;
        config::apply_overrides(&mut cfg, &self.options.overrides);
        config::validate(&cfg)?;

        write_stamp(&working_stamp(data_dir), &cfg)?;

        if cfg.is_cluster_init() {
            cfg.kubernetes_version = self
                .resolver
                .resolve_kubernetes_version(&cfg.kubernetes_version)
                .context("Failed to resolve Kubernetes version")?;
            cfg.operator_version = self
                .resolver
                .resolve_operator_version(&cfg.chart_repo, &cfg.operator_version)
                .context("Failed to resolve operator version")?;
        } else {
            self.resolver
                .check_server(&cfg.runtime.server)
                .context("Server is not ready")?;
            let versions = self
                .resolver
                .resolve_cluster_versions(&cfg.runtime.server, &cfg.runtime.token)
                .context("Failed to query cluster versions")?;
            cfg.kubernetes_version = versions.kubernetes;
            cfg.operator_version = versions.operator;
        }

        log::info!(
            "Bootstrapping nodestrap {} ({})",
            cfg.operator_version,
            cfg.kubernetes_version
        );

        let ctx = PlanContext {
            data_dir: data_dir.clone(),
            config_dir: self.options.config_dir.clone(),
            host_root: self.host.root.clone(),
            self_exe: self.host.self_exe.clone(),
            hostname: self.host.hostname.clone(),
            kubernetes_version: cfg.kubernetes_version.clone(),
            operator_version: cfg.operator_version.clone(),
        };

        let plan = build_plan(&cfg, &ctx).context("Failed to generate plan")?;
        log::debug!("Generated node plan: {plan:?}");

        run_plan(plan, data_dir, &self.applier).context("Failed to run plan")?;

        write_stamp(&done_stamp(data_dir), &cfg)?;
        log::info!(
            "Successfully bootstrapped nodestrap {} ({})",
            cfg.operator_version,
            cfg.kubernetes_version
        );
        Ok(())
    }
}
