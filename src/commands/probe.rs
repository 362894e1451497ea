use anyhow::{Context as _, Result};
use std::time::Duration;

use crate::bootstrap::plan_file;
use crate::cli::ProbeArgs;

pub fn run(args: ProbeArgs) -> Result<()> {
    let file = args.file.unwrap_or_else(|| plan_file(&args.data_dir));
    applykit::run_probes(&file, Duration::from_secs(args.interval.max(1)))
        .with_context(|| format!("Probes from {} failed", file.display()))
}
