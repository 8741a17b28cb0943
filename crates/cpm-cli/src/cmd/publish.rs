//! Publish command

use std::path::Path;

use anyhow::{Context as _, Result};
use bytes::Bytes;
use cpm_core::{pack, project};
use crossterm::style::Stylize;

use super::context::Context;

/// Pack the project (without `cpm_modules` and `.git`) and upload it.
pub async fn publish(dir: Option<&Path>, dry_run: bool) -> Result<()> {
    let ctx = Context::open(dir)?;
    let result = upload(&ctx, dry_run).await;
    ctx.finish().await;
    result
}

async fn upload(ctx: &Context, dry_run: bool) -> Result<()> {
    let manifest = project::load_manifest(&ctx.project_root)?;
    let root = ctx.project_root.clone();
    let archive = ctx
        .engine
        .spawn_blocking(move || pack::pack_directory(&root))
        .await
        .context("Failed to pack project")?;

    let id = format!("{}@{}", manifest.name, manifest.version);
    println!(
        "  {} packed {} ({} bytes)",
        "✓".green(),
        id.as_str().bold(),
        archive.len()
    );
    if dry_run {
        return Ok(());
    }

    if ctx.config.auth_token.is_none() {
        tracing::warn!("no auth_token configured; the registry may refuse the upload");
    }
    ctx.registry
        .publish(&manifest, Bytes::from(archive))
        .await
        .with_context(|| format!("Failed to publish {id} to {}", ctx.registry.base_url()))?;

    println!("  {} published {} to {}", "✓".green(), id.as_str().bold(), ctx.registry.base_url());
    Ok(())
}
