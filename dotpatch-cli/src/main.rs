mod app;
mod commands;
mod output;
mod prompt;

use anyhow::Context;
use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .context("failed to set Ctrl+C handler")?;

    let cli = Cli::parse();

    // Show dotpatch info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("dotpatch", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Patch {
            path,
            output,
            yes,
            plan,
        } => commands::patch::run(
            path,
            &commands::patch::PatchOptions {
                output: output.as_deref(),
                yes: *yes,
                plan,
                global: &cli.global,
            },
        ),
        Command::Check { path, plan } => commands::check::run(path, plan, &cli.global),
        Command::Plan { plan } => commands::plan::run(plan, &cli.global),
        Command::Disasm {
            path,
            r#type,
            method,
        } => commands::disasm::run(path, r#type, method.as_deref(), &cli.global),
    }
}
