use anyhow::{bail, Result};
use colored::Colorize;
use std::path::Path;

use crate::config::{create_sample, CONFIG_FILE_NAME};

pub fn run(path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(Path::new(CONFIG_FILE_NAME));
    if path.exists() {
        bail!("File already exists: {}", path.display());
    }

    create_sample(path)?;

    println!("{}", "✓ Configuration written".green());
    println!("  {}", path.display().to_string().bright_white());
    println!();
    println!("Next steps:");
    println!("  export ANDROID_NDK_HOME=/path/to/ndk   {}", "# Toolchain used for the native build".dimmed());
    println!("  vim {}   {}", path.display(), "# Point template_dir and instrumentor at your setup".dimmed());
    println!("  apkshell shell app.apk -o out/");

    Ok(())
}
