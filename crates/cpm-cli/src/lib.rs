//! cpm - a package manager for C projects
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! # Overview
//!
//! A project is a directory holding a `cpm_package.spec` manifest.
//! Dependencies are resolved against a registry and installed into
//! `cpm_modules/`, one directory per package.
//!
//! # Directory Layout
//!
//! ```text
//! project/
//! ├── cpm_package.spec   # Manifest
//! ├── .cpmrc             # Project configuration (optional)
//! └── cpm_modules/
//!     ├── .bin/          # Prepended to PATH by `cpm run`
//!     └── <name>/        # One installed package
//!
//! ~/.cpm/
//! └── cpmrc              # Global configuration
//! ```

pub mod cmd;
pub mod ui;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cpm")]
#[command(author, version, about = "cpm - a package manager for C projects")]
pub struct Cli {
    /// Show what would happen without making changes
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Log resolution and queue activity
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory (defaults to the nearest directory with a manifest)
    #[arg(short = 'C', long, global = true, env = "CPM_PROJECT")]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a cpm_package.spec in the current directory
    Init {
        /// Package name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
        /// Initial version
        #[arg(long, default_value = "1.0.0")]
        version: String,
        /// Overwrite an existing manifest
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Add dependencies and install everything the manifest needs
    Install {
        /// Packages to add: name or name@constraint
        packages: Vec<String>,
        /// Record the packages under devDependencies
        #[arg(long, short = 'D')]
        dev: bool,
    },
    /// Print the resolved dependency tree
    Tree {
        /// Also print install layers
        #[arg(long)]
        layers: bool,
    },
    /// Run a script from the manifest
    Run {
        /// Script name
        script: String,
        /// Extra arguments appended to the script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Search the registry
    Search {
        /// Search query
        query: String,
    },
    /// Pack the project and upload it to the registry
    Publish,
}
