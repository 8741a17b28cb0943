//! Install command

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use cpm_core::{Registry, Reporter, project};
use cpm_schema::{Constraint, Dependency, DependencyKind, PackageName, Version};

use super::context::Context;
use crate::ui;

/// Add `packages` to the manifest, then resolve and install.
pub async fn install(dir: Option<&Path>, packages: &[String], dev: bool, dry_run: bool) -> Result<()> {
    let ctx = Context::open(dir)?;
    let result = run(&ctx, packages, dev, dry_run).await;
    ctx.finish().await;
    result
}

async fn run(ctx: &Context, packages: &[String], dev: bool, dry_run: bool) -> Result<()> {
    let mut manifest = project::load_manifest(&ctx.project_root)?;

    for spec in packages {
        let (name, constraint) = parse_spec(spec)?;
        let constraint = match constraint {
            Some(constraint) => constraint,
            None => latest_caret(ctx, &name).await?,
        };
        let kind = if dev {
            DependencyKind::Dev
        } else {
            DependencyKind::Runtime
        };
        ctx.reporter.info(&format!("adding {name} {constraint}"));
        manifest.upsert_dependency(Dependency::new(name, constraint).with_kind(kind));
    }

    let plan = ctx
        .resolver()
        .resolve(manifest.clone())
        .await
        .context("Failed to resolve dependencies")?;
    ctx.reporter.sync();

    if !plan.is_valid() {
        ui::print_conflicts(&plan);
        return Err(plan
            .error()
            .map_or_else(|| anyhow!("resolution failed"), anyhow::Error::from));
    }

    if dry_run {
        for node in plan.install_order().filter(|n| n.name != manifest.name) {
            let state = if node.installed { "installed" } else { "would install" };
            println!("  {}@{} ({state})", node.name, node.version);
        }
        return Ok(());
    }

    if !packages.is_empty() {
        project::save_manifest(&ctx.project_root, &manifest)?;
    }

    let report = ctx.installer().install(&plan).await?;
    ctx.reporter.sync();
    if let Some((id, reason)) = report.failed.first() {
        return Err(anyhow::Error::from(reason.clone()).context(format!("Failed to install {id}")));
    }
    Ok(())
}

/// `name` or `name@constraint`.
pub fn parse_spec(spec: &str) -> Result<(PackageName, Option<Constraint>)> {
    let (name, constraint) = match spec.split_once('@') {
        Some((name, constraint)) => (name, Some(Constraint::parse(constraint)?)),
        None => (spec, None),
    };
    Ok((PackageName::parse(name)?, constraint))
}

/// `^<latest release>`, falling back to the latest prerelease.
async fn latest_caret(ctx: &Context, name: &PackageName) -> Result<Constraint> {
    let registry = Arc::clone(&ctx.registry);
    let target = name.clone();
    let versions = ctx
        .queues
        .registry(name)
        .submit(move || registry.list_versions(&target))
        .await
        .with_context(|| format!("Failed to look up {name}"))?;

    let latest = pick_latest(&versions).ok_or_else(|| anyhow!("{name} has no published versions"))?;
    Ok(Constraint::Caret(latest.clone()))
}

fn pick_latest(versions: &[Version]) -> Option<&Version> {
    versions
        .iter()
        .filter(|v| !v.is_prerelease())
        .max()
        .or_else(|| versions.iter().max())
}
