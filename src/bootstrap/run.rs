//! Persisting and applying a plan

use anyhow::{Context, Result};
use applykit::{Applier, ApplyInput, Plan};
use flate2::read::GzDecoder;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Attempts per instruction before the apply fails
pub const INSTRUCTION_ATTEMPTS: u32 = 3;

pub fn plan_file(data_dir: &Path) -> PathBuf {
    data_dir.join("plan").join("plan.json")
}

pub fn plan_output(data_dir: &Path) -> PathBuf {
    data_dir.join("plan").join("plan-output.json")
}

/// Create or truncate `path` with mode 0600
pub(crate) fn create_private(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

fn write_plan(plan: &Plan, data_dir: &Path) -> Result<()> {
    let path = plan_file(data_dir);
    log::info!("Writing plan file to {}", path.display());

    let json = plan.to_json_pretty()?;
    let mut file = create_private(&path)?;
    file.write_all(json.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn save_output(output: &[u8], data_dir: &Path) -> Result<()> {
    let path = plan_output(data_dir);
    let mut file = create_private(&path)?;
    io::copy(&mut GzDecoder::new(output), &mut file)
        .with_context(|| format!("Failed to write plan output to {}", path.display()))?;
    Ok(())
}

/// Write the plan, apply it and keep the instruction output
///
/// The plan file is written first so a failed apply leaves it behind for
/// inspection.
pub fn run_plan<A: Applier>(plan: Plan, data_dir: &Path, applier: &A) -> Result<()> {
    log::info!(
        "Running plan: {}",
        plan.instruction_names().join(", ")
    );
    write_plan(&plan, data_dir)?;

    let output = applier
        .apply(&ApplyInput::full(plan, INSTRUCTION_ATTEMPTS))
        .context("Failed to apply plan")?;

    log::debug!(
        "Applied plan: {} file(s) changed, {} instruction(s) in {} attempt(s)",
        output.summary.files_changed(),
        output.summary.instructions_run,
        output.summary.attempts
    );

    save_output(&output.output, data_dir)
}
