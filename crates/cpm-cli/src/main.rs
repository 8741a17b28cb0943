//! cpm - a package manager for C projects

use std::process::ExitCode;

use clap::Parser;
use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;

use cpm_cli::cmd;
use cpm_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins; --verbose only raises the default.
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let dry_run = cli.dry_run;
    let project = cli.project;

    let result = match cli.command {
        Commands::Init {
            name,
            version,
            force,
        } => cmd::init::init(project.as_deref(), name.as_deref(), &version, force, dry_run).map(|()| 0),
        Commands::Install { packages, dev } => {
            cmd::install::install(project.as_deref(), &packages, dev, dry_run)
                .await
                .map(|()| 0)
        }
        Commands::Tree { layers } => cmd::tree::tree(project.as_deref(), layers).await.map(|()| 0),
        Commands::Run { script, args } => cmd::run::run(project.as_deref(), &script, &args, dry_run).await,
        Commands::Search { query } => cmd::search::search(project.as_deref(), &query).await.map(|()| 0),
        Commands::Publish => cmd::publish::publish(project.as_deref(), dry_run).await.map(|()| 0),
    };

    match result {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(cmd::exit_code(&err))
        }
    }
}
