use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// dotpatch - pattern-based CIL patching
#[derive(Debug, Parser)]
#[command(name = "dotpatch", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply a patch plan and write the patched assembly.
    Patch {
        /// Path to the assembly to patch.
        #[arg(value_name = "FILE", default_value = "Celeste.exe")]
        path: PathBuf,

        /// Output file (default: FILE.patched).
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Answer yes to every confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Name of the built-in plan to apply.
        #[arg(long, value_name = "NAME", default_value = "celeste")]
        plan: String,
    },

    /// Check whether an assembly is a target of a plan and still needs patching.
    Check {
        /// Path to the assembly.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Name of the built-in plan to check against.
        #[arg(long, value_name = "NAME", default_value = "celeste")]
        plan: String,
    },

    /// List the steps of a built-in plan.
    Plan {
        /// Name of the built-in plan.
        #[arg(long, value_name = "NAME", default_value = "celeste")]
        plan: String,
    },

    /// List the instructions of methods with their indices.
    Disasm {
        /// Path to the assembly.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Full name of the declaring type (e.g. Celeste.Celeste).
        #[arg(long, value_name = "NAME")]
        r#type: String,

        /// Only this method.
        #[arg(long, value_name = "NAME")]
        method: Option<String>,
    },
}
