use anyhow::{bail, Context, Result};
use apkshell_core::{CommandInstrumentor, Retention, RetentionSpec, Shell, ShellReport, ShellRequest};
use colored::Colorize;
use log::debug;
use std::path::{Path, PathBuf};

use crate::config;

#[allow(clippy::too_many_arguments)]
pub fn run(
    config_path: Option<&Path>,
    apk: &Path,
    output: Option<&Path>,
    modules: &[String],
    entry_class: Option<&str>,
    keep_workspace: bool,
    overwrite: bool,
    json: bool,
) -> Result<()> {
    if !apk.is_file() {
        bail!("Package not found: {}", apk.display());
    }

    let loaded = config::load(config_path)?;
    match loaded.source {
        Some(ref path) => debug!("Using config {}", path.display()),
        None => debug!("No config file found, using defaults"),
    }

    let out_dir = match output {
        Some(dir) => dir.to_path_buf(),
        None => apk
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let mut request = ShellRequest::new(apk, &out_dir);
    request.modules = modules.to_vec();
    request.entry_class = entry_class.map(str::to_string);
    request.overwrite = overwrite;
    if keep_workspace {
        request.retention = Some(RetentionSpec {
            on_success: Retention::Keep,
            on_failure: Retention::Keep,
        });
    }

    if !json {
        println!("{}", format!("Shelling package: {}", apk.display()).bright_blue());
        println!("{}", "=".repeat(60).dimmed());
        println!(
            "Template:     {}",
            loaded.config.template_dir.display().to_string().dimmed()
        );
        println!(
            "Instrumentor: {}",
            loaded.config.instrumentor.program.display().to_string().dimmed()
        );
        println!("Toolchain:    ${}", loaded.config.toolchain_env.dimmed());
        println!();
    }

    let instrumentor = CommandInstrumentor::from_spec(&loaded.config.instrumentor);
    let shell = Shell::new(loaded.config, instrumentor);

    let report = match shell.run(&request) {
        Ok(report) => report,
        Err(e) => {
            let kind = e.kind();
            if !json {
                println!("{} {}", "✗".red(), e.to_string().red());
            }
            return Err(e).context(format!("Shelling failed ({} error)", kind));
        }
    };

    if json {
        let out = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", out);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &ShellReport) {
    println!("{}", "✓ Package shelled successfully".green());
    println!();
    println!("Output:    {}", report.output.display().to_string().bright_white());
    println!("ABI:       lib/{} ({} existing file(s))", report.abi.target, report.abi.children);
    println!("  {} {}", "→".dimmed(), report.payload.display());
    for module in &report.modules {
        println!("  {} {}", "→".dimmed(), module.display());
    }
    println!("Artifact:  {}", report.artifact.display());
    println!("Loader:    {}", report.dex_name);
    if report.stripped.is_empty() {
        println!("Signing:   {}", "no metadata found".dimmed());
    } else {
        println!("Signing:   {} file(s) stripped", report.stripped.len());
    }
    match report.workspace {
        Some(ref path) => println!("Workspace: {}", path.display()),
        None => println!("Workspace: {}", "removed".dimmed()),
    }
    println!("Duration:  {:.1}s", report.duration_ms as f64 / 1000.0);
    println!();
    println!("Next steps:");
    println!(
        "  apksigner sign --ks <keystore> {}   {}",
        report.output.display(),
        "# The shelled package is unsigned".dimmed()
    );
}
