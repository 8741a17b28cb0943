//! Shared command context.
//!
//! Groups the engine, configuration, registry and queues a command needs so
//! every command builds them the same way.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use cpm_core::{CpmConfig, Engine, HttpRegistry, Installer, QueueSet, Reporter, Resolver};
use tracing::warn;

use crate::ui::ConsoleReporter;

pub struct Context {
    pub engine: Engine,
    pub config: CpmConfig,
    pub project_root: PathBuf,
    pub registry: Arc<HttpRegistry>,
    pub queues: Arc<QueueSet>,
    pub reporter: Arc<ConsoleReporter>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("project_root", &self.project_root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Open the project containing `start` (or the current directory).
    pub fn open(start: Option<&Path>) -> Result<Self> {
        let cwd = match start {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };
        let project_root = cpm_core::find_project_root(&cwd).ok_or_else(|| {
            anyhow!(
                "No {} found in {} or its parents. Run 'cpm init' first.",
                cpm_schema::MANIFEST_FILE,
                cwd.display()
            )
        })?;
        Self::at(project_root)
    }

    /// Build a context rooted at `project_root` without requiring a manifest.
    pub fn at(project_root: PathBuf) -> Result<Self> {
        let config = CpmConfig::load(Some(&project_root))?;
        let engine = Engine::start()?;
        let registry = HttpRegistry::new(&engine, &config.registry, config.timeout())?
            .with_auth_token(config.auth_token.clone());
        let queues = Arc::new(QueueSet::new(&engine, config.queue_config()));
        let verbose = tracing::enabled!(tracing::Level::DEBUG);

        Ok(Self {
            reporter: Arc::new(ConsoleReporter::spawn(verbose)),
            registry: Arc::new(registry),
            queues,
            project_root,
            config,
            engine,
        })
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.config.modules_path(&self.project_root)
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(&self.engine, self.registry.clone(), self.queues.clone())
            .with_options(self.config.resolve_options(&self.project_root))
            .with_reporter(self.reporter.clone() as Arc<dyn Reporter>)
    }

    pub fn installer(&self) -> Installer {
        Installer::new(
            &self.engine,
            self.registry.clone(),
            self.queues.clone(),
            self.modules_dir(),
        )
        .with_reporter(self.reporter.clone() as Arc<dyn Reporter>)
    }

    /// Drain the queues and the UI, then stop the engine.
    pub async fn finish(self) {
        drain(&self.queues, self.config.queue_config().op_timeout).await;
        self.reporter.sync();
        self.engine.shutdown();
    }
}

/// Close every queue and wait for pending work, returning `false` if some
/// queue was still busy after `timeout`.
async fn drain(queues: &QueueSet, timeout: Duration) -> bool {
    match queues.close_all(timeout).await {
        Ok(_) => true,
        Err(reason) => {
            warn!("queues not drained before exit: {reason}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpm_core::QueueConfig;

    #[tokio::test]
    async fn test_drain_reports_busy_queue() {
        let engine = Engine::start().unwrap();
        let queues = QueueSet::new(&engine, QueueConfig::default());
        let e = engine.clone();
        let _stuck = queues
            .queue("registry:slow")
            .submit(move || e.delay(Duration::from_secs(5)));

        assert!(!drain(&queues, Duration::from_millis(20)).await);

        let idle = QueueSet::new(&engine, QueueConfig::default());
        idle.queue("registry:zlib");
        assert!(drain(&idle, Duration::from_secs(1)).await);
        engine.shutdown();
    }
}
