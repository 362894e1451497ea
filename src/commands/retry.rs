use anyhow::Result;
use std::thread;
use std::time::Duration;

use crate::cli::RetryArgs;
use crate::runner;

const SLEEP_FIRST: Duration = Duration::from_secs(5);
const INTERVAL: Duration = Duration::from_secs(15);

pub fn run(args: RetryArgs) -> Result<()> {
    if args.sleep_first {
        thread::sleep(SLEEP_FIRST);
    }

    let tries = runner::run_until_success(&args.command, &args.args, INTERVAL, thread::sleep);
    log::debug!("{} succeeded after {tries} tries", args.command);
    Ok(())
}
