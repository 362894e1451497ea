mod bootstrap;
mod cli;
mod commands;
mod config;
mod paths;
mod runner;
mod system;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Boot logs end up in the journal, so info is the default
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp_secs()
        .init();

    let ctx = Context { quiet: cli.quiet };

    match cli.command {
        Command::Bootstrap(args) => commands::bootstrap::run(&ctx, args),
        Command::Probe(args) => commands::probe::run(args),
        Command::GetToken(args) => commands::token::run(args),
        Command::Info(args) => commands::info::run(args),
        Command::Retry(args) => commands::retry::run(args),
        Command::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "nodestrap", &mut io::stdout());
            Ok(())
        }
    }
}
