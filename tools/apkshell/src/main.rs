use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

/// Build protected ("shelled") Android packages
#[derive(Parser)]
#[command(name = "apkshell")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./.apkshell.yaml or ~/.apkshell.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shell a package
    Shell {
        /// Input package (.apk)
        apk: PathBuf,

        /// Output directory (default: directory of the input package)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Extra native module to bundle (repeatable)
        #[arg(long = "module")]
        modules: Vec<String>,

        /// Entry class, when the instrumentor should not read it from the manifest
        #[arg(long)]
        entry_class: Option<String>,

        /// Keep the workspace after the job, whatever the outcome
        #[arg(long)]
        keep_workspace: bool,

        /// Replace an existing output package
        #[arg(long)]
        overwrite: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show what shelling would do to a package, without building
    Inspect {
        /// Input package (.apk)
        apk: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a sample configuration file
    Init {
        /// Path of the file to create (default: ./.apkshell.yaml)
        path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Shell { apk, output, modules, entry_class, keep_workspace, overwrite, json } => {
            commands::shell::run(
                cli.config.as_deref(),
                &apk,
                output.as_deref(),
                &modules,
                entry_class.as_deref(),
                keep_workspace,
                overwrite,
                json,
            )?;
        }
        Commands::Inspect { apk, json } => {
            commands::inspect::run(&apk, json)?;
        }
        Commands::Init { path } => {
            commands::init::run(path.as_deref())?;
        }
    }

    Ok(())
}
