//! Tree command

use std::path::Path;

use anyhow::{Context as _, Result};
use cpm_core::project;
use crossterm::style::Stylize;

use super::context::Context;
use crate::ui;

/// Resolve the manifest and print the tree and install order.
pub async fn tree(dir: Option<&Path>, layers: bool) -> Result<()> {
    let ctx = Context::open(dir)?;
    let result = print_tree(&ctx, layers).await;
    ctx.finish().await;
    result
}

async fn print_tree(ctx: &Context, layers: bool) -> Result<()> {
    let manifest = project::load_manifest(&ctx.project_root)?;
    let plan = ctx
        .resolver()
        .resolve(manifest)
        .await
        .context("Failed to resolve dependencies")?;
    ctx.reporter.sync();

    print!("{}", plan.render_tree());
    println!();
    println!("{}", "Install order".bold());
    for (i, node) in plan.install_order().enumerate() {
        let marker = if node.installed { " (installed)".dark_grey().to_string() } else { String::new() };
        println!("  {:>3}. {}{marker}", i + 1, node.id_string());
    }

    if layers {
        println!();
        println!("{}", "Layers".bold());
        for (depth, layer) in plan.layers().iter().enumerate() {
            let names: Vec<String> = layer.iter().map(|id| plan.node(*id).id_string()).collect();
            println!("  {depth}: {}", names.join(", "));
        }
    }

    ui::print_conflicts(&plan);
    Ok(())
}
