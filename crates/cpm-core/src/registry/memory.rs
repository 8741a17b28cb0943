//! In-process registry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpm_schema::{Constraint, Dependency, Manifest, PackageName, SchemaError, Version};

use super::Registry;
use crate::engine::Engine;
use crate::error::Rejection;
use crate::promise::{Outcome, Promise, lock};

type FileList = Vec<(PathBuf, Vec<u8>)>;

/// An in-process registry.
///
/// Used for tests and offline resolution. Latency and per-package failures
/// can be injected, and every request is counted so callers can check that
/// lookups were deduplicated.
pub struct MemoryRegistry {
    engine: Engine,
    latency: Duration,
    packages: Mutex<BTreeMap<PackageName, BTreeMap<Version, Arc<Manifest>>>>,
    files: Mutex<HashMap<(PackageName, Version), FileList>>,
    failures: Mutex<HashMap<PackageName, Rejection>>,
    version_requests: Mutex<HashMap<PackageName, usize>>,
    manifest_requests: Mutex<HashMap<(PackageName, Version), usize>>,
}

impl fmt::Debug for MemoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRegistry")
            .field("packages", &lock(&self.packages).len())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl MemoryRegistry {
    /// An empty registry answering immediately.
    pub fn new(engine: &Engine) -> Self {
        Self {
            engine: engine.clone(),
            latency: Duration::ZERO,
            packages: Mutex::new(BTreeMap::new()),
            files: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            version_requests: Mutex::new(HashMap::new()),
            manifest_requests: Mutex::new(HashMap::new()),
        }
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Publish a manifest, replacing any existing one for the same version.
    pub fn publish(&self, manifest: Manifest) {
        lock(&self.packages)
            .entry(manifest.name.clone())
            .or_default()
            .insert(manifest.version.clone(), Arc::new(manifest));
    }

    /// Publish `name@version` with runtime dependencies given as
    /// `(name, constraint)` pairs.
    pub fn add(&self, name: &str, version: &str, deps: &[(&str, &str)]) -> Result<(), SchemaError> {
        let mut manifest = Manifest::new(PackageName::parse(name)?, Version::parse(version)?);
        for (dep, constraint) in deps {
            manifest.dependencies.push(Dependency::new(
                PackageName::parse(dep)?,
                Constraint::parse(constraint)?,
            ));
        }
        manifest.validate()?;
        self.publish(manifest);
        Ok(())
    }

    /// Attach a file to a version's artifact.
    pub fn add_file(
        &self,
        name: &PackageName,
        version: &Version,
        path: impl Into<PathBuf>,
        contents: impl Into<Vec<u8>>,
    ) {
        lock(&self.files)
            .entry((name.clone(), version.clone()))
            .or_default()
            .push((path.into(), contents.into()));
    }

    /// Make every request for `name` reject with `reason`.
    pub fn fail_with(&self, name: &PackageName, reason: Rejection) {
        lock(&self.failures).insert(name.clone(), reason);
    }

    /// Undo [`fail_with`](Self::fail_with).
    pub fn clear_failure(&self, name: &PackageName) {
        lock(&self.failures).remove(name);
    }

    /// How many times `list_versions` was called for `name`.
    pub fn version_requests(&self, name: &str) -> usize {
        lock(&self.version_requests).get(name).copied().unwrap_or(0)
    }

    /// How many times `fetch_manifest` was called for `name@version`.
    pub fn manifest_requests(&self, name: &PackageName, version: &Version) -> usize {
        lock(&self.manifest_requests)
            .get(&(name.clone(), version.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn injected_failure(&self, name: &PackageName) -> Option<Rejection> {
        lock(&self.failures).get(name).cloned()
    }

    fn respond<T>(&self, result: Result<T, Rejection>) -> Promise<T>
    where
        T: Clone + Send + 'static,
    {
        if self.latency.is_zero() {
            return match result {
                Ok(value) => self.engine.resolved(value),
                Err(reason) => self.engine.rejected(reason),
            };
        }
        self.engine
            .delay(self.latency)
            .then(move |()| Outcome::from(result))
    }
}

impl Registry for MemoryRegistry {
    fn list_versions(&self, name: &PackageName) -> Promise<Vec<Version>> {
        *lock(&self.version_requests).entry(name.clone()).or_default() += 1;

        let result: Result<Vec<Version>, Rejection> = match self.injected_failure(name) {
            Some(reason) => Err(reason),
            None => lock(&self.packages)
                .get(name)
                .map(|versions| versions.keys().cloned().collect())
                .ok_or_else(|| Rejection::not_found(format!("package '{name}' not found"))),
        };
        self.respond(result)
    }

    fn fetch_manifest(&self, name: &PackageName, version: &Version) -> Promise<Arc<Manifest>> {
        *lock(&self.manifest_requests)
            .entry((name.clone(), version.clone()))
            .or_default() += 1;

        let result: Result<Arc<Manifest>, Rejection> = match self.injected_failure(name) {
            Some(reason) => Err(reason),
            None => lock(&self.packages)
                .get(name)
                .and_then(|versions| versions.get(version))
                .cloned()
                .ok_or_else(|| Rejection::not_found(format!("{name}@{version} not found"))),
        };
        self.respond(result)
    }

    fn artifact_url(&self, name: &PackageName, version: &Version) -> String {
        format!("memory://{name}/{version}")
    }

    fn fetch_artifact(&self, name: &PackageName, version: &Version, dest: &Path) -> Promise<()> {
        if let Some(reason) = self.injected_failure(name) {
            return self.respond(Err(reason));
        }

        let files = lock(&self.files)
            .get(&(name.clone(), version.clone()))
            .cloned()
            .unwrap_or_default();
        let dest = dest.to_path_buf();
        let written = self.engine.spawn_blocking(move || {
            for (relative, contents) in files {
                let path = dest.join(relative);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, contents)?;
            }
            Ok(())
        });

        if self.latency.is_zero() {
            written
        } else {
            self.engine
                .delay(self.latency)
                .then(move |()| Outcome::Chain(written))
        }
    }
}
