mod aws;
mod cli;
mod commands;
mod console;
mod orchestrator;
mod paths;
mod runner;
mod schema;
mod settings;
mod stacks;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use orgtree::Mode;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Account(cmd) => commands::account::run(&ctx, cmd),
        Command::Diff(args) => commands::stacks::run(&ctx, &args, Mode::Diff),
        Command::Deploy(args) => commands::stacks::run(&ctx, &args, Mode::Deploy),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "telophase", &mut io::stdout());
            Ok(())
        }
    }
}
