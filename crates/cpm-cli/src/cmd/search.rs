//! Search command

use std::path::Path;

use anyhow::{Context as _, Result};
use crossterm::style::Stylize;

use super::context::Context;

/// Query the registry and print matching packages.
pub async fn search(dir: Option<&Path>, query: &str) -> Result<()> {
    let cwd = match dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let root = cpm_core::find_project_root(&cwd).unwrap_or(cwd);
    let ctx = Context::at(root)?;

    let start = std::time::Instant::now();
    let results = ctx.registry.search(query).await;
    ctx.finish().await;
    let results = results.with_context(|| format!("Search for '{query}' failed"))?;

    if results.packages.is_empty() {
        println!();
        println!("  {} No packages found matching '{}'", "ℹ".blue(), query.white());
        println!();
        return Ok(());
    }

    println!();
    let width = results.packages.iter().map(|p| p.name.len()).max().unwrap_or(0);
    for hit in &results.packages {
        let version = hit.version.as_deref().unwrap_or("?");
        let description = hit.description.as_deref().unwrap_or("");
        let (name, version) = padded(hit.name.as_str(), version, width);
        println!("  {}  {}  {}", name.bold(), version.green(), description.dark_grey());
    }

    println!();
    println!(
        "SEARCH COMPLETE {}, elapsed {:.2}s",
        results.total,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Pad the plain columns; styled content ignores width flags.
fn padded(name: &str, version: &str, width: usize) -> (String, String) {
    (format!("{name:<width$}"), format!("{version:<10}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_padded_before_styling() {
        let (name, version) = padded("zlib", "1.3.0", 8);
        assert_eq!(name, "zlib    ");
        assert_eq!(version, "1.3.0     ");

        let line = format!("{}", name.bold());
        assert!(line.contains("zlib    "));
    }
}
