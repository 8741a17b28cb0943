//! Scenario tests for the resolver and engine.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpm_core::resolver::ConflictKind;
use cpm_core::{
    Engine, ErrorKind, Installer, MemoryRegistry, Outcome, QueueConfig, QueueSet, Rejection, Resolver, all,
};
use cpm_schema::{Constraint, Dependency, Manifest, PackageName, Version};

/// A registry, a queue set and a resolver sharing one engine.
struct TestContext {
    engine: Engine,
    registry: Arc<MemoryRegistry>,
    queues: Arc<QueueSet>,
}

impl TestContext {
    fn new() -> Self {
        let engine = Engine::start().expect("failed to start engine");
        let registry = Arc::new(MemoryRegistry::new(&engine));
        let queues = Arc::new(QueueSet::new(&engine, QueueConfig::default()));
        Self {
            engine,
            registry,
            queues,
        }
    }

    fn publish(&self, name: &str, version: &str, deps: &[(&str, &str)]) {
        self.registry
            .add(name, version, deps)
            .expect("failed to publish test package");
    }

    fn resolver(&self) -> Resolver {
        Resolver::new(&self.engine, self.registry.clone(), self.queues.clone())
    }

    fn finish(self) {
        self.engine.shutdown();
    }
}

fn root(deps: &[(&str, &str)]) -> Manifest {
    let mut manifest = Manifest::new(PackageName::new("root"), Version::new(1, 0, 0));
    for (name, constraint) in deps {
        manifest.dependencies.push(Dependency::new(
            PackageName::new(name),
            Constraint::parse(constraint).unwrap(),
        ));
    }
    manifest
}

#[tokio::test]
async fn test_chained_fulfillment() {
    let ctx = TestContext::new();
    let deferred = ctx.engine.deferred::<i64>();
    let tail = deferred
        .promise()
        .then(|x| Outcome::Value(x + 1))
        .then(|y| Outcome::Value(y * 2));

    deferred.resolve(3);
    assert_eq!(tail.await.unwrap(), 8);
    ctx.finish();
}

#[tokio::test]
async fn test_rejection_skips_ok_only_handler() {
    let ctx = TestContext::new();
    let deferred = ctx.engine.deferred::<String>();
    let tail = deferred
        .promise()
        .then(|s| Outcome::Value(format!("saw {s}")))
        .catch(|_| Outcome::Value("recovered".to_string()));

    deferred.reject(Rejection::new(ErrorKind::HandlerFailure, "boom"));
    assert_eq!(tail.await.unwrap(), "recovered");
    ctx.finish();
}

#[tokio::test]
async fn test_queue_fifo_under_races() {
    let ctx = TestContext::new();
    let queue = ctx.queues.queue("scenario");
    let finished: Arc<Mutex<Vec<(usize, Instant)>>> = Arc::default();

    let ops: Vec<_> = [30u64, 5, 5]
        .into_iter()
        .enumerate()
        .map(|(i, ms)| {
            let engine = ctx.engine.clone();
            let finished = Arc::clone(&finished);
            queue.submit(move || {
                engine.delay(Duration::from_millis(ms)).map(move |()| {
                    finished.lock().unwrap().push((i, Instant::now()));
                    i
                })
            })
        })
        .collect();

    let results = all(&ctx.engine, ops).await.unwrap();
    assert_eq!(results, [0, 1, 2]);

    let finished = finished.lock().unwrap().clone();
    let order: Vec<usize> = finished.iter().map(|(i, _)| *i).collect();
    assert_eq!(order, [0, 1, 2]);
    assert!(finished.windows(2).all(|w| w[0].1 <= w[1].1));
    ctx.finish();
}

#[tokio::test]
async fn test_all_combinator() {
    let ctx = TestContext::new();
    let engine = &ctx.engine;

    let ok = all(engine, [engine.resolved(1), engine.resolved(2), engine.resolved(3)]);
    assert_eq!(ok.await.unwrap(), [1, 2, 3]);

    let failing = all(
        engine,
        [
            engine.resolved(1),
            engine.rejected(Rejection::new(ErrorKind::HandlerFailure, "x")),
            engine.resolved(3),
        ],
    );
    assert_eq!(failing.await.unwrap_err().message, "x");
    ctx.finish();
}

#[tokio::test]
async fn test_diamond_dependency() {
    let ctx = TestContext::new();
    ctx.publish("a", "1.2.0", &[("c", "^1.0.0")]);
    ctx.publish("b", "2.0.0", &[("c", "^1.1.0")]);
    for v in ["1.0.0", "1.1.0", "1.2.0"] {
        ctx.publish("c", v, &[]);
    }

    let plan = ctx
        .resolver()
        .resolve(root(&[("a", "^1.2.0"), ("b", "^2.0.0")]))
        .await
        .unwrap();

    assert!(plan.is_valid());
    assert_eq!(plan.find("c").unwrap().version, Version::new(1, 2, 0));
    let order: Vec<String> = plan.install_order().map(|n| n.name.to_string()).collect();
    assert_eq!(order.last().map(String::as_str), Some("root"));
    assert_eq!(order.iter().filter(|n| *n == "c").count(), 1);
    assert_eq!(ctx.registry.version_requests("c"), 1);
    ctx.finish();
}

#[tokio::test]
async fn test_unsatisfiable_conflict() {
    let ctx = TestContext::new();
    ctx.publish("d", "1.0.0", &[]);
    ctx.publish("d", "2.0.0", &[]);
    ctx.publish("x", "1.0.0", &[("d", "=2.0.0")]);

    let plan = ctx
        .resolver()
        .resolve(root(&[("d", "=1.0.0"), ("x", "^1.0.0")]))
        .await
        .unwrap();

    assert_eq!(plan.conflicts().len(), 1);
    let conflict = &plan.conflicts()[0];
    assert_eq!(conflict.kind, ConflictKind::Version);
    assert_eq!(conflict.package, "d");
    assert!(plan.install_order().all(|n| n.name != "d"));
    assert_eq!(plan.error().unwrap().kind, ErrorKind::Conflict);
    ctx.finish();
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let ctx = TestContext::new();
    ctx.publish("zeta", "1.0.0", &[("common", "^2.0.0")]);
    ctx.publish("alpha", "1.0.0", &[("common", "^2.1.0"), ("mid", "*")]);
    ctx.publish("mid", "0.3.0", &[]);
    for v in ["2.0.0", "2.1.0", "2.4.2"] {
        ctx.publish("common", v, &[]);
    }
    let manifest = root(&[("zeta", "*"), ("alpha", "*")]);

    let mut renders = Vec::new();
    for _ in 0..5 {
        let slow = Arc::new(MemoryRegistry::new(&ctx.engine).with_latency(Duration::from_millis(1)));
        for (name, version, deps) in [
            ("zeta", "1.0.0", vec![("common", "^2.0.0")]),
            ("alpha", "1.0.0", vec![("common", "^2.1.0"), ("mid", "*")]),
            ("mid", "0.3.0", vec![]),
            ("common", "2.0.0", vec![]),
            ("common", "2.1.0", vec![]),
            ("common", "2.4.2", vec![]),
        ] {
            slow.add(name, version, &deps).unwrap();
        }
        let queues = Arc::new(QueueSet::new(&ctx.engine, QueueConfig::default()));
        let plan = Resolver::new(&ctx.engine, slow, queues)
            .resolve(manifest.clone())
            .await
            .unwrap();
        let order: Vec<String> = plan.install_order().map(|n| n.id_string()).collect();
        renders.push(order.join(" "));
    }

    let direct = ctx.resolver().resolve(manifest).await.unwrap();
    let direct: Vec<String> = direct.install_order().map(|n| n.id_string()).collect();
    assert_eq!(renders[0], direct.join(" "));
    assert!(renders.iter().all(|r| *r == renders[0]));
    assert_eq!(renders[0], "common@2.4.2 mid@0.3.0 alpha@1.0.0 zeta@1.0.0 root@1.0.0");
    ctx.finish();
}

#[tokio::test]
async fn test_concurrent_resolves_share_queues() {
    let ctx = TestContext::new();
    ctx.publish("lib", "1.0.0", &[]);
    let resolver = ctx.resolver();

    let first = resolver.resolve(root(&[("lib", "*")]));
    let second = resolver.resolve(root(&[("lib", "^1")]));
    let plans = all(&ctx.engine, [first, second]).await.unwrap();

    assert!(plans.iter().all(|p| p.is_valid() && p.len() == 2));
    let stats = ctx.queues.stats();
    let (_, lib) = stats.iter().find(|(r, _)| r == "registry:lib").unwrap();
    assert_eq!(lib.pending, 0);
    assert_eq!(lib.failed, 0);
    assert_eq!(ctx.registry.version_requests("lib"), 1);
    ctx.finish();
}

#[tokio::test]
async fn test_resolve_then_install() {
    let ctx = TestContext::new();
    ctx.publish("zlib", "1.3.0", &[]);
    ctx.publish("png", "1.6.43", &[("zlib", "^1.2.0")]);
    let project = tempfile::tempdir().unwrap();
    let modules = project.path().join("cpm_modules");

    let plan = ctx.resolver().resolve(root(&[("png", "^1.6.0")])).await.unwrap();
    let report = Installer::new(&ctx.engine, ctx.registry.clone(), ctx.queues.clone(), &modules)
        .install(&plan)
        .await
        .unwrap();

    assert_eq!(report.installed, ["zlib@1.3.0", "png@1.6.43"]);
    assert!(modules.join("zlib/cpm_package.spec").is_file());
    assert!(modules.join("png/cpm_package.spec").is_file());
    ctx.finish();
}
