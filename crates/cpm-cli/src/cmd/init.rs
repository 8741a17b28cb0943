//! Init command

use std::path::Path;

use anyhow::{Context as _, Result, bail};
use cpm_core::project;
use cpm_schema::{Manifest, PackageName, Version};
use crossterm::style::Stylize;

/// Write a starter manifest into `dir` (or the current directory).
pub fn init(dir: Option<&Path>, name: Option<&str>, version: &str, force: bool, dry_run: bool) -> Result<()> {
    let root = match dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let manifest_path = cpm_core::manifest_path(&root);
    if manifest_path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            manifest_path.display()
        );
    }

    let name = match name {
        Some(name) => name.to_string(),
        None => root
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("Cannot derive a package name from the directory; pass --name")?,
    };
    let manifest = starter_manifest(PackageName::parse(&name)?, Version::parse(version)?);

    if dry_run {
        println!("{}", manifest.to_json_pretty());
        return Ok(());
    }

    project::save_manifest(&root, &manifest)?;
    println!(
        "  {} Created {} for {}",
        "✓".green(),
        cpm_schema::MANIFEST_FILE,
        format!("{}@{}", manifest.name, manifest.version).bold()
    );
    Ok(())
}

fn starter_manifest(name: PackageName, version: Version) -> Manifest {
    let mut manifest = Manifest::new(name, version);
    manifest.description = Some("A C project managed by cpm".to_string());
    manifest.license = Some("MIT".to_string());
    manifest
        .scripts
        .insert("build".to_string(), "cc -Icpm_modules -o main src/main.c".to_string());
    manifest
        .scripts
        .insert("test".to_string(), "echo \"no tests\"".to_string());
    manifest
}
