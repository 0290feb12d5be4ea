use anyhow::{bail, Context, Result};
use apkshell_core::inspect_package;
use colored::Colorize;
use std::path::Path;

pub fn run(apk: &Path, json: bool) -> Result<()> {
    if !apk.is_file() {
        bail!("Package not found: {}", apk.display());
    }

    let inspection = inspect_package(apk)?;

    if json {
        let out = serde_json::to_string_pretty(&inspection).context("Failed to serialize inspection")?;
        println!("{}", out);
        return Ok(());
    }

    println!("{}", format!("Package: {}", apk.display()).bright_blue());
    println!("{}", "=".repeat(60).dimmed());
    println!("Files: {}", inspection.files);
    println!();

    println!("{}", "Required entries:".dimmed());
    for (name, present) in [
        ("classes.dex", inspection.has_payload),
        ("AndroidManifest.xml", inspection.has_manifest),
    ] {
        if present {
            println!("  {} {}", "✓".green(), name);
        } else {
            println!("  {} {} {}", "✗".red(), name, "(required)".red());
        }
    }
    println!();

    println!("{}", "Native libraries:".dimmed());
    for count in &inspection.abi_counts {
        let marker = if count.abi == inspection.selection.target {
            "→".green().to_string()
        } else {
            " ".to_string()
        };
        let children = match count.children {
            Some(n) => format!("{} file(s)", n),
            None => "absent".dimmed().to_string(),
        };
        println!("  {} lib/{:<12} {}", marker, count.abi.dir_name(), children);
    }
    if inspection.selection.target.payload_abi() != inspection.selection.target {
        println!(
            "  {} {} ships the {} payload",
            "!".yellow(),
            inspection.selection.target,
            inspection.selection.target.payload_abi()
        );
    }
    println!();

    println!(
        "Dex files: {} existing, loader goes to {}",
        inspection.existing_dex,
        inspection.next_dex.bright_white()
    );
    println!();

    if inspection.signing_files.is_empty() {
        println!("{}", "No signing metadata to strip".dimmed());
    } else {
        println!("{}", "Signing metadata to strip:".dimmed());
        for file in &inspection.signing_files {
            println!("  {} {}", "✗".red(), file);
        }
    }

    Ok(())
}
