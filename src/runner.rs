use anyhow::{Context, Result};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

/// Run a command and inherit stdio (shows output in real-time)
pub fn run(cmd: &str, args: &[String]) -> Result<ExitStatus> {
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))
}

/// Run a command until it exits successfully, pausing `interval` between tries
///
/// Failures to start the command count as failed tries. Returns the number of
/// tries it took.
pub fn run_until_success(
    cmd: &str,
    args: &[String],
    interval: Duration,
    sleep: fn(Duration),
) -> usize {
    let mut tries = 0;
    loop {
        tries += 1;
        match run(cmd, args) {
            Ok(status) if status.success() => return tries,
            Ok(status) => log::info!("{cmd} exited with {status}, retrying in {}s", interval.as_secs()),
            Err(e) => log::info!("{e:#}, retrying in {}s", interval.as_secs()),
        }
        sleep(interval);
    }
}
