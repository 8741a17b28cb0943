//! Dependency resolution
//!
//! Depth-first walk from the root manifest. Each dependency edge selects the
//! highest satisfying version, diamonds share one node, and problems are
//! recorded as [`Conflict`]s instead of failing the whole resolve. There is
//! no backtracking: once a version is selected for a name it stays selected.
//!
//! Registry lookups go through the per-package `registry:<name>` queue and
//! are memoised per [`Resolver`] (shared by its clones), so a package is
//! listed at most once however many edges or concurrent resolves reach it.
//! Rejected lookups are evicted and retried by the next request.

mod plan;

pub use plan::{Conflict, ConflictKind, DepNode, InstallPlan, NodeId};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpm_schema::{Constraint, Dependency, DependencyKind, Manifest, PackageName, Version};
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::{ErrorKind, Rejection};
use crate::promise::{Promise, PromiseState, lock};
use crate::queue::QueueSet;
use crate::registry::Registry;
use crate::reporter::{NullReporter, Reporter};

/// Default cap on dependency-path length.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Knobs for one resolve.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Edges deeper than this are recorded as `DepthExceeded`.
    pub max_depth: usize,
    /// Plan-wide deadline. When reached the resolve rejects with `Cancelled`.
    pub deadline: Option<Duration>,
    /// Follow the root's `devDependencies`.
    pub include_dev: bool,
    /// Where installed packages live, for marking nodes already installed.
    pub modules_dir: Option<PathBuf>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            deadline: None,
            include_dev: true,
            modules_dir: None,
        }
    }
}

/// Builds [`InstallPlan`]s against a registry.
#[derive(Clone)]
pub struct Resolver {
    engine: Engine,
    registry: Arc<dyn Registry>,
    queues: Arc<QueueSet>,
    reporter: Arc<dyn Reporter>,
    options: ResolveOptions,
    memo: Arc<Memo>,
}

/// In-flight and settled registry lookups, keyed by name and version.
#[derive(Default)]
struct Memo {
    versions: Mutex<HashMap<PackageName, Promise<Vec<Version>>>>,
    manifests: Mutex<HashMap<(PackageName, Version), Promise<Arc<Manifest>>>>,
}

/// Return the memoised promise for `key`, or submit a new one when there is
/// none or the previous one rejected.
fn memoised<K, T, F>(map: &Mutex<HashMap<K, Promise<T>>>, key: K, submit: F) -> Result<Promise<T>, Rejection>
where
    T: Clone + Send + 'static,
    K: std::hash::Hash + Eq,
    F: FnOnce() -> Result<Promise<T>, Rejection>,
{
    let mut map = lock(map);
    if let Some(pending) = map.get(&key)
        && pending.state() != PromiseState::Rejected
    {
        return Ok(pending.clone());
    }
    let promise = submit()?;
    map.insert(key, promise.clone());
    Ok(promise)
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("options", &self.options)
            .field("queues", &self.queues)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// A resolver with default options that reports nothing.
    pub fn new(engine: &Engine, registry: Arc<dyn Registry>, queues: Arc<QueueSet>) -> Self {
        Self {
            engine: engine.clone(),
            registry,
            queues,
            reporter: Arc::new(NullReporter),
            options: ResolveOptions::default(),
            memo: Arc::new(Memo::default()),
        }
    }

    /// Send progress events to `reporter`.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the options.
    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    /// Current options.
    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolve `root` into a plan.
    ///
    /// Conflicts, cycles and missing packages are recorded in the plan, not
    /// returned as rejections. The promise rejects only when the registry
    /// transport fails (`TransportError`, `Timeout`, ...) or the plan-wide
    /// deadline passes (`Cancelled`).
    ///
    /// A per-request `Timeout` that fires before the deadline is passed
    /// through unchanged.
    pub fn resolve(&self, root: Manifest) -> Promise<InstallPlan> {
        let deadline = self.options.deadline;
        let expires = deadline.map(|limit| Instant::now() + limit);
        let walk = Walk::new(self, expires);
        let root_name = root.name.clone();

        self.engine.spawn(async move {
            let result = match deadline {
                Some(limit) => tokio::time::timeout(limit, walk.run(root))
                    .await
                    .unwrap_or_else(|_| Err(Rejection::timeout("resolution deadline"))),
                None => walk.run(root).await,
            };
            let expired = expires.is_some_and(|at| Instant::now() >= at);
            match (result, deadline) {
                (Err(reason), Some(limit)) if reason.kind == ErrorKind::Timeout && expired => {
                    warn!(root = %root_name, "resolution cancelled: {reason}");
                    Err(Rejection::cancelled(format!(
                        "resolution of {root_name} exceeded its {limit:?} deadline"
                    )))
                }
                (result, _) => result,
            }
        })
    }
}

/// A demand on a name, kept for pairwise conflict checks.
struct Edge {
    from: PackageName,
    constraint: Constraint,
    satisfying: Vec<Version>,
}

/// State of one resolve.
struct Walk {
    registry: Arc<dyn Registry>,
    queues: Arc<QueueSet>,
    reporter: Arc<dyn Reporter>,
    options: ResolveOptions,
    op_timeout: Duration,
    deadline: Option<Instant>,
    memo: Arc<Memo>,

    nodes: Vec<DepNode>,
    visited: HashMap<(PackageName, Version), NodeId>,
    selected: HashMap<PackageName, Version>,
    edges: HashMap<PackageName, Vec<Edge>>,
    conflicted: HashSet<PackageName>,
    conflicts: Vec<Conflict>,
    path: Vec<PackageName>,
}

impl Walk {
    fn new(resolver: &Resolver, deadline: Option<Instant>) -> Self {
        Self {
            registry: Arc::clone(&resolver.registry),
            queues: Arc::clone(&resolver.queues),
            reporter: Arc::clone(&resolver.reporter),
            options: resolver.options.clone(),
            op_timeout: resolver.queues.config().op_timeout,
            deadline,
            memo: Arc::clone(&resolver.memo),
            nodes: Vec::new(),
            visited: HashMap::new(),
            selected: HashMap::new(),
            edges: HashMap::new(),
            conflicted: HashSet::new(),
            conflicts: Vec::new(),
            path: Vec::new(),
        }
    }

    async fn run(mut self, root: Manifest) -> Result<InstallPlan, Rejection> {
        debug!(root = %root.name, version = %root.version, "resolving");
        let root = Arc::new(root);
        let root_id = self.push_node(&root, String::new(), false);
        self.selected.insert(root.name.clone(), root.version.clone());

        let deps: Vec<Dependency> = root
            .dependencies
            .iter()
            .filter(|d| !d.is_dev() || self.options.include_dev)
            .cloned()
            .collect();

        self.path.push(root.name.clone());
        self.prefetch(&deps);
        for dep in deps {
            self.visit(root_id, dep, 1).await?;
        }
        self.path.pop();

        let plan = InstallPlan::assemble(self.nodes, root_id, &self.conflicted, self.conflicts);
        debug!(nodes = plan.len(), conflicts = plan.conflicts().len(), "resolved");
        Ok(plan)
    }

    /// Resolve one edge from `parent`, recursing into a newly selected node.
    fn visit(&mut self, parent: NodeId, dep: Dependency, depth: usize) -> BoxFuture<'_, Result<(), Rejection>> {
        Box::pin(async move {
            let name = &dep.name;
            self.reporter.resolving(name, &dep.constraint);

            if self.path.contains(name) {
                self.record(ConflictKind::Cycle, name, format!("cycle through {name}"));
                return Ok(());
            }
            if depth > self.options.max_depth {
                self.record(
                    ConflictKind::DepthExceeded,
                    name,
                    format!("resolution depth exceeded at {name} (limit {})", self.options.max_depth),
                );
                return Ok(());
            }

            let available = match self.versions(name)?.await {
                Ok(versions) => versions,
                Err(reason) if reason.kind == ErrorKind::NotFound => {
                    if dep.is_optional() {
                        debug!(package = %name, "optional dependency not found, skipping");
                    } else {
                        self.record(ConflictKind::NotFound, name, format!("package {name} not found"));
                    }
                    return Ok(());
                }
                Err(reason) => return Err(reason),
            };

            let mut satisfying: Vec<Version> = dep.constraint.filter(&available).into_iter().cloned().collect();
            satisfying.sort();
            if satisfying.is_empty() {
                if dep.is_optional() {
                    debug!(package = %name, constraint = %dep.constraint, "optional dependency unsatisfiable, skipping");
                } else {
                    self.record(
                        ConflictKind::Unsatisfiable,
                        name,
                        format!("no version of {name} satisfies {}", dep.constraint),
                    );
                }
                return Ok(());
            }

            let from = self.nodes[parent.index()].name.clone();
            self.check_disjoint(name, &from, &dep.constraint, &satisfying);
            self.edges.entry(name.clone()).or_default().push(Edge {
                from,
                constraint: dep.constraint.clone(),
                satisfying: satisfying.clone(),
            });
            if self.conflicted.contains(name) {
                return Ok(());
            }

            if let Some(version) = self.selected.get(name).cloned() {
                if dep.constraint.satisfies(&version) {
                    if let Some(&id) = self.visited.get(&(name.clone(), version)) {
                        self.link(parent, id);
                    }
                } else {
                    let parent_name = self.nodes[parent.index()].name.clone();
                    self.conflicted.insert(name.clone());
                    self.record(
                        ConflictKind::Version,
                        name,
                        format!(
                            "{name}@{version} is already selected but {parent_name} requires {name} {}",
                            dep.constraint
                        ),
                    );
                }
                return Ok(());
            }

            // `satisfying` is sorted ascending and non-empty.
            let Some(version) = satisfying.last().cloned() else {
                return Ok(());
            };
            let manifest = match self.manifest(name, &version)?.await {
                Ok(manifest) => manifest,
                Err(reason) if reason.kind == ErrorKind::NotFound => {
                    self.record(ConflictKind::NotFound, name, format!("{name}@{version} not found"));
                    return Ok(());
                }
                Err(reason) => return Err(reason),
            };

            let url = self.registry.artifact_url(name, &version);
            let installed = is_installed(self.options.modules_dir.clone(), name, &version).await;
            let id = self.push_node(&manifest, url, installed);
            self.selected.insert(name.clone(), version.clone());
            self.visited.insert((name.clone(), version.clone()), id);
            self.link(parent, id);
            self.reporter.resolved(name, &version);
            debug!(package = %name, %version, depth, "selected");

            let deps: Vec<Dependency> = manifest
                .dependencies
                .iter()
                .filter(|d| d.kind != DependencyKind::Dev)
                .cloned()
                .collect();
            self.path.push(name.clone());
            self.prefetch(&deps);
            for child in deps {
                self.visit(id, child, depth + 1).await?;
            }
            self.path.pop();
            Ok(())
        })
    }

    /// Record one conflict per earlier edge whose satisfying set shares no
    /// version with this one.
    fn check_disjoint(&mut self, name: &PackageName, from: &PackageName, constraint: &Constraint, satisfying: &[Version]) {
        let Some(earlier) = self.edges.get(name) else {
            return;
        };
        let clashes: Vec<String> = earlier
            .iter()
            .filter(|e| !e.satisfying.iter().any(|v| satisfying.contains(v)))
            .map(|e| {
                format!(
                    "{name}: {} requires {}, {from} requires {constraint}",
                    e.from, e.constraint
                )
            })
            .collect();
        if clashes.is_empty() {
            return;
        }
        self.conflicted.insert(name.clone());
        for description in clashes {
            self.record(ConflictKind::Version, name, description);
        }
    }

    fn record(&mut self, kind: ConflictKind, name: &PackageName, description: String) {
        debug!(package = %name, ?kind, "{description}");
        self.conflicts.push(Conflict::new(kind, name, description));
    }

    fn push_node(&mut self, manifest: &Arc<Manifest>, resolved_url: String, installed: bool) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(DepNode {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            resolved_url,
            children: Vec::new(),
            installed,
            manifest: Arc::clone(manifest),
        });
        id
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        let children = &mut self.nodes[parent.index()].children;
        if !children.contains(&child) {
            children.push(child);
        }
    }

    /// Start version lookups for every dependency up front so they overlap
    /// while the walk proceeds one edge at a time.
    fn prefetch(&self, deps: &[Dependency]) {
        for dep in deps {
            if !self.path.contains(&dep.name) {
                let _ = self.versions(&dep.name);
            }
        }
    }

    fn versions(&self, name: &PackageName) -> Result<Promise<Vec<Version>>, Rejection> {
        memoised(&self.memo.versions, name.clone(), || {
            let timeout = self.remaining(name)?;
            let registry = Arc::clone(&self.registry);
            let target = name.clone();
            Ok(self
                .queues
                .registry(name)
                .submit_with_timeout(move || registry.list_versions(&target), timeout))
        })
    }

    fn manifest(&self, name: &PackageName, version: &Version) -> Result<Promise<Arc<Manifest>>, Rejection> {
        memoised(&self.memo.manifests, (name.clone(), version.clone()), || {
            let timeout = self.remaining(name)?;
            let registry = Arc::clone(&self.registry);
            let (target, at) = (name.clone(), version.clone());
            Ok(self
                .queues
                .registry(name)
                .submit_with_timeout(move || registry.fetch_manifest(&target, &at), timeout))
        })
    }

    /// Per-request timeout: the queue's op timeout, capped by what is left
    /// of the plan-wide deadline.
    fn remaining(&self, name: &PackageName) -> Result<Duration, Rejection> {
        let Some(deadline) = self.deadline else {
            return Ok(self.op_timeout);
        };
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(Rejection::timeout(format!(
                "deadline reached before looking up {name}"
            )));
        }
        Ok(left.min(self.op_timeout))
    }
}

/// Whether `<modules>/<name>/cpm_package.spec` records `version`.
async fn is_installed(modules_dir: Option<PathBuf>, name: &PackageName, version: &Version) -> bool {
    let Some(modules) = modules_dir else {
        return false;
    };
    let path = modules.join(name.as_str()).join(cpm_schema::MANIFEST_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => Manifest::from_json(&text).is_ok_and(|m| m.version == *version),
        Err(_) => false,
    }
}
