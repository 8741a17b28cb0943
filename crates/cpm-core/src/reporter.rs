//! Reporter trait for dependency injection
//!
//! Resolution and installation report progress through this trait so the
//! core never depends on a particular terminal UI.

use cpm_schema::{Constraint, PackageName, Version};

/// Receives progress events from the resolver and installer.
pub trait Reporter: Send + Sync {
    /// A dependency edge is being resolved.
    fn resolving(&self, name: &PackageName, constraint: &Constraint);

    /// A version was selected for a package.
    fn resolved(&self, name: &PackageName, version: &Version);

    /// A package install job has started.
    fn installing(&self, name: &PackageName, version: &Version);

    /// A package operation completed.
    fn done(&self, name: &PackageName, version: &Version, detail: &str);

    /// A package operation failed.
    fn failed(&self, name: &PackageName, version: &Version, reason: &str);

    /// Free-form progress message.
    fn info(&self, msg: &str);

    /// Something worth surfacing that did not fail the operation.
    fn warning(&self, msg: &str);

    /// Final line after a batch of operations.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn resolving(&self, name: &PackageName, constraint: &Constraint) {
        (**self).resolving(name, constraint);
    }
    fn resolved(&self, name: &PackageName, version: &Version) {
        (**self).resolved(name, version);
    }
    fn installing(&self, name: &PackageName, version: &Version) {
        (**self).installing(name, version);
    }
    fn done(&self, name: &PackageName, version: &Version, detail: &str) {
        (**self).done(name, version, detail);
    }
    fn failed(&self, name: &PackageName, version: &Version, reason: &str) {
        (**self).failed(name, version, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., `tree`, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn resolving(&self, _: &PackageName, _: &Constraint) {}
    fn resolved(&self, _: &PackageName, _: &Version) {}
    fn installing(&self, _: &PackageName, _: &Version) {}
    fn done(&self, _: &PackageName, _: &Version, _: &str) {}
    fn failed(&self, _: &PackageName, _: &Version, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
