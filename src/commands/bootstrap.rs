use anyhow::{Context as _, Result};
use applykit::{ContainerCli, LocalApplier, ProcessRunner};
use channels::{HttpBackend, Resolver, VersionCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::Context;
use crate::bootstrap::{Bootstrap, BootstrapOptions, CancelToken, Host};
use crate::cli::BootstrapArgs;
use crate::config::{ConfigSources, Overrides};
use crate::{system, ui};

pub fn run(ctx: &Context, args: BootstrapArgs) -> Result<()> {
    let config_dir = args.config_dir;

    let options = BootstrapOptions {
        force: args.force,
        config_path: args.config,
        data_dir: args.data_dir,
        config_dir: config_dir.clone(),
        overrides: Overrides {
            cluster_init: args.cluster_init,
            server: args.server.unwrap_or_default(),
            token: args.token.unwrap_or_default(),
            role: args.role,
            mirror: args.mirror.unwrap_or_default(),
            kubernetes_version: args.kubernetes_version.unwrap_or_default(),
        },
    };

    let host = Host {
        hostname: system::hostname()?,
        self_exe: system::self_exe()?,
        root: PathBuf::from("/"),
    };

    let resolver = Resolver::new(HttpBackend::new(), Arc::new(VersionCache::new()));
    let applier = LocalApplier::with_runner(ProcessRunner::with_container_cli(ContainerCli {
        command: args.container_cli,
        ..ContainerCli::default()
    }));

    let bootstrap = Bootstrap::new(
        options,
        ConfigSources::system(&config_dir),
        resolver,
        applier,
        host,
    );

    let cancel = Arc::new(CancelToken::new());
    cancel_on_signal(&cancel)?;
    if let Some(secs) = args.timeout {
        let cancel = Arc::clone(&cancel);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            log::warn!("Bootstrap timeout of {secs}s reached");
            cancel.cancel();
        });
    }

    bootstrap.run(&cancel).map_err(|e| {
        if cancel.is_cancelled() {
            e.context("Bootstrap timed out")
        } else {
            e
        }
    })?;

    if !ctx.quiet {
        ui::success("Bootstrap complete");
    }
    Ok(())
}

/// Stop retrying on SIGINT or SIGTERM
fn cancel_on_signal(cancel: &Arc<CancelToken>) -> Result<()> {
    let cancel = Arc::clone(cancel);
    ctrlc::set_handler(move || {
        log::warn!("Received termination signal, stopping bootstrap");
        cancel.cancel();
    })
    .context("Failed to install signal handler")
}
