use anyhow::Result;
use std::path::Path;

use crate::bootstrap::{done_stamp, read_stamp};
use crate::cli::InfoArgs;
use crate::{system, ui};

const OS_RELEASE: &str = "/etc/os-release";

pub fn run(args: InfoArgs) -> Result<()> {
    let os = match system::os_pretty_name(Path::new(OS_RELEASE)) {
        Ok(name) => name,
        Err(e) => {
            log::debug!("{e:#}");
            String::new()
        }
    };

    let (kubernetes, operator) = match read_stamp(&done_stamp(&args.data_dir)) {
        Ok(Some(cfg)) => (cfg.kubernetes_version, cfg.operator_version),
        Ok(None) => (String::new(), String::new()),
        Err(e) => {
            ui::warn(&format!("{e:#}"));
            (String::new(), String::new())
        }
    };

    ui::header("nodestrap");
    ui::kv("OS Version", &ui::or_unknown(&os));
    ui::kv("Operator", &ui::or_unknown(&operator));
    ui::kv("CLI", env!("CARGO_PKG_VERSION"));
    ui::kv("Kubernetes", &ui::or_unknown(&kubernetes));
    println!();

    Ok(())
}
