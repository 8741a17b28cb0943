//! Registry capability
//!
//! The resolver only needs to list a package's versions and read one
//! version's manifest; the installer additionally downloads artifacts. Every
//! operation returns a [`Promise`] so implementations are free to do the work
//! on the runtime, on the blocking pool, or not at all.

#[cfg(feature = "network")]
mod http;
mod memory;

#[cfg(feature = "network")]
pub use http::{HttpRegistry, SearchHit, SearchResults};
pub use memory::MemoryRegistry;

use std::path::Path;
use std::sync::Arc;

use cpm_schema::{Manifest, PackageName, Version};

use crate::promise::Promise;

/// Source of package metadata and artifacts.
pub trait Registry: Send + Sync {
    /// Every published version of `name`, in any order.
    ///
    /// Rejects with `NotFound` if the package does not exist.
    fn list_versions(&self, name: &PackageName) -> Promise<Vec<Version>>;

    /// The manifest of one published version.
    fn fetch_manifest(&self, name: &PackageName, version: &Version) -> Promise<Arc<Manifest>>;

    /// Where the artifact for a version can be fetched from.
    fn artifact_url(&self, name: &PackageName, version: &Version) -> String;

    /// Download and unpack the artifact into `dest`, which already exists.
    fn fetch_artifact(&self, name: &PackageName, version: &Version, dest: &Path) -> Promise<()>;
}

impl<T: Registry + ?Sized> Registry for Arc<T> {
    fn list_versions(&self, name: &PackageName) -> Promise<Vec<Version>> {
        (**self).list_versions(name)
    }
    fn fetch_manifest(&self, name: &PackageName, version: &Version) -> Promise<Arc<Manifest>> {
        (**self).fetch_manifest(name, version)
    }
    fn artifact_url(&self, name: &PackageName, version: &Version) -> String {
        (**self).artifact_url(name, version)
    }
    fn fetch_artifact(&self, name: &PackageName, version: &Version, dest: &Path) -> Promise<()> {
        (**self).fetch_artifact(name, version, dest)
    }
}
