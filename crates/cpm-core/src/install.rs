//! Plan execution
//!
//! Every node of a valid [`InstallPlan`] becomes one install job. A job
//! waits for its children's jobs, then runs through the `install:<path>`
//! queue of its target directory, so two plans installing the same package
//! never write the directory at the same time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use cpm_schema::{MANIFEST_FILE, Manifest, PackageName, Version};
use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::Rejection;
use crate::promise::{Outcome, Promise, all, all_settled};
use crate::queue::QueueSet;
use crate::registry::Registry;
use crate::reporter::{NullReporter, Reporter};
use crate::resolver::{DepNode, InstallPlan};

/// What happened to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallAction {
    /// Fetched and written.
    Installed,
    /// Already present at the selected version.
    Skipped,
    /// The project itself; nothing to fetch.
    Root,
}

/// Result of executing a plan.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// `name@version` of every package written, in install order.
    pub installed: Vec<String>,
    /// `name@version` of every package already present.
    pub skipped: Vec<String>,
    /// Packages that failed, with the reason.
    pub failed: Vec<(String, Rejection)>,
}

impl InstallReport {
    /// No package failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// 0, or the exit code of the first failure in install order.
    pub fn exit_code(&self) -> i32 {
        self.failed.first().map_or(0, |(_, reason)| reason.exit_code())
    }
}

/// Executes install plans into `<project>/cpm_modules`.
#[derive(Clone)]
pub struct Installer {
    engine: Engine,
    registry: Arc<dyn Registry>,
    queues: Arc<QueueSet>,
    reporter: Arc<dyn Reporter>,
    modules_dir: PathBuf,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("modules_dir", &self.modules_dir)
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// An installer writing into `modules_dir`.
    pub fn new(
        engine: &Engine,
        registry: Arc<dyn Registry>,
        queues: Arc<QueueSet>,
        modules_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine: engine.clone(),
            registry,
            queues,
            reporter: Arc::new(NullReporter),
            modules_dir: modules_dir.into(),
        }
    }

    /// Send progress events to `reporter`.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Directory packages are installed into.
    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Execute `plan`.
    ///
    /// Rejects with the plan's first conflict if it is not valid, or with
    /// `IOFailure` if the modules directory cannot be created. Failures of
    /// individual packages are collected in the report; dependents of a
    /// failed package fail with the same reason.
    pub fn install(&self, plan: &InstallPlan) -> Promise<InstallReport> {
        if let Some(conflict) = plan.error() {
            return self.engine.rejected(conflict);
        }

        let started = Instant::now();
        let plan = Arc::new(plan.clone());
        let modules_dir = self.modules_dir.clone();
        let prepared = self.engine.spawn_blocking(move || {
            std::fs::create_dir_all(&modules_dir).map_err(|e| {
                Rejection::io(format!("cannot create {}: {e}", modules_dir.display()))
            })
        });

        let installer = self.clone();
        prepared.then(move |()| {
            let jobs = installer.schedule(&plan);
            let engine = installer.engine.clone();
            let reporter = Arc::clone(&installer.reporter);
            Outcome::Chain(all_settled(&engine, jobs).map(move |results| {
                let report = collect(&plan, results);
                reporter.summary(report.installed.len(), "installed", started.elapsed().as_secs_f64());
                info!(
                    installed = report.installed.len(),
                    skipped = report.skipped.len(),
                    failed = report.failed.len(),
                    "install finished"
                );
                report
            }))
        })
    }

    /// One promise per node, in install order.
    fn schedule(&self, plan: &InstallPlan) -> Vec<Promise<InstallAction>> {
        let mut jobs: Vec<Option<Promise<InstallAction>>> = vec![None; plan.len()];
        for &id in plan.order() {
            let node = plan.node(id);
            let children: Vec<_> = node
                .children
                .iter()
                .filter_map(|c| jobs[c.index()].clone())
                .collect();
            let job = if id == plan.root_id() {
                all(&self.engine, children).map(|_| InstallAction::Root)
            } else {
                let installer = self.clone();
                let node = node.clone();
                all(&self.engine, children).then(move |_| Outcome::Chain(installer.install_node(node)))
            };
            jobs[id.index()] = Some(job);
        }
        plan.order()
            .iter()
            .filter_map(|id| jobs[id.index()].take())
            .collect()
    }

    fn install_node(&self, node: DepNode) -> Promise<InstallAction> {
        if node.installed {
            debug!(package = %node.name, version = %node.version, "already installed");
            return self.engine.resolved(InstallAction::Skipped);
        }

        let dir = self.modules_dir.join(node.name.as_str());
        let installer = self.clone();
        let target = dir.clone();
        self.queues
            .install(&dir)
            .submit(move || installer.write_package(node, target))
    }

    /// Create the directory, fetch the artifact, then write the manifest copy.
    fn write_package(&self, node: DepNode, dir: PathBuf) -> Promise<InstallAction> {
        let DepNode {
            name,
            version,
            manifest,
            ..
        } = node;
        self.reporter.installing(&name, &version);

        let registry = Arc::clone(&self.registry);
        let engine = self.engine.clone();
        let reporter = Arc::clone(&self.reporter);
        let created = {
            let dir = dir.clone();
            self.engine.spawn_blocking(move || {
                std::fs::create_dir_all(&dir)?;
                Ok(())
            })
        };

        let fetch_name = name.clone();
        let fetch_version = version.clone();
        let fetch_dir = dir.clone();
        created
            .then(move |()| Outcome::Chain(registry.fetch_artifact(&fetch_name, &fetch_version, &fetch_dir)))
            .then(move |()| Outcome::Chain(engine.spawn_blocking(move || write_manifest(&dir, &manifest))))
            .react(move |result| match result {
                Ok(()) => {
                    reporter.done(&name, &version, "installed");
                    Outcome::Value(InstallAction::Installed)
                }
                Err(reason) => {
                    reporter.failed(&name, &version, &reason.to_string());
                    Outcome::Reject(reason)
                }
            })
    }
}

fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<(), Rejection> {
    let path = dir.join(MANIFEST_FILE);
    std::fs::write(&path, manifest.to_json_pretty())
        .map_err(|e| Rejection::io(format!("cannot write {}: {e}", path.display())))
}

fn collect(plan: &InstallPlan, results: Vec<Result<InstallAction, Rejection>>) -> InstallReport {
    let mut report = InstallReport::default();
    for (node, result) in plan.install_order().zip(results) {
        let id = node.id_string();
        match result {
            Ok(InstallAction::Installed) => report.installed.push(id),
            Ok(InstallAction::Skipped) => report.skipped.push(id),
            Ok(InstallAction::Root) => {}
            Err(reason) => report.failed.push((id, reason)),
        }
    }
    report
}

/// Read `<modules>/<name>/cpm_package.spec`, if the package is installed.
pub fn installed_version(modules_dir: &Path, name: &PackageName) -> Option<Version> {
    let text = std::fs::read_to_string(modules_dir.join(name.as_str()).join(MANIFEST_FILE)).ok()?;
    Manifest::from_json(&text).ok().map(|m| m.version)
}
