//! Shared data model for CPM.
//!
//! Everything that crosses a crate boundary lives here: package names,
//! semantic versions, version constraints and the `cpm_package.spec`
//! manifest format.

pub mod constraint;
pub mod error;
pub mod manifest;
pub mod types;
pub mod version;

// Re-exports
pub use constraint::Constraint;
pub use error::SchemaError;
pub use manifest::{BuildConfig, Dependency, DependencyKind, Manifest};
pub use types::PackageName;
pub use version::Version;

/// File name of a package manifest, both in a project root and inside
/// `cpm_modules/<name>/`.
pub const MANIFEST_FILE: &str = "cpm_package.spec";

/// Default name of the modules directory under a project root.
pub const MODULES_DIR: &str = "cpm_modules";
