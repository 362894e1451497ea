use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;

use crate::cli::GetTokenArgs;
use crate::paths;

/// Join token from a token file
///
/// Runtime tokens may carry a `K10<hash>::server:` prefix; the secret is the
/// last `:`-separated segment.
fn read_token(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file {}", path.display()))?;
    let token = content.trim().rsplit(':').next().unwrap_or_default();
    if token.is_empty() {
        bail!("Token file {} is empty", path.display());
    }
    Ok(token.to_string())
}

pub fn run(args: GetTokenArgs) -> Result<()> {
    let token = read_token(&paths::token_file(&args.data_dir))?;
    println!("{token}");
    Ok(())
}
