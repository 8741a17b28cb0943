//! `.cpmrc` configuration
//!
//! Settings come from, lowest precedence first: built-in defaults, the
//! global `$CPM_HOME/cpmrc`, the project's `.cpmrc`, then `CPM_REGISTRY`,
//! `CPM_AUTH_TOKEN` and `CPM_TIMEOUT` from the environment. Files are TOML
//! and every key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ErrorKind, Rejection};
use crate::paths;
use crate::queue::QueueConfig;
use crate::resolver::ResolveOptions;

/// Registry used when nothing else is configured.
pub const DEFAULT_REGISTRY: &str = "http://localhost:8080";

/// Effective configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpmConfig {
    /// Registry base URL.
    pub registry: String,
    /// Bearer token sent on publish.
    pub auth_token: Option<String>,
    /// HTTP timeout, also used as the resolve deadline.
    pub timeout_seconds: u64,
    /// Longest dependency path the resolver follows.
    pub max_resolution_depth: usize,
    /// Pending-operation limit per queue.
    pub queue_depth: usize,
    /// Per-operation queue timeout.
    pub op_timeout_ms: u64,
    /// Follow the root's `devDependencies`.
    pub include_dev: bool,
    /// Modules directory, relative to the project root.
    pub modules_dir: String,
}

impl Default for CpmConfig {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            auth_token: None,
            timeout_seconds: 30,
            max_resolution_depth: crate::resolver::DEFAULT_MAX_DEPTH,
            queue_depth: crate::queue::DEFAULT_MAX_DEPTH,
            op_timeout_ms: 30_000,
            include_dev: true,
            modules_dir: cpm_schema::MODULES_DIR.to_string(),
        }
    }
}

/// One config file. Absent keys leave the lower layer alone.
#[derive(Debug, Default, Deserialize)]
struct ConfigLayer {
    registry: Option<String>,
    auth_token: Option<String>,
    timeout_seconds: Option<u64>,
    max_resolution_depth: Option<usize>,
    queue_depth: Option<usize>,
    op_timeout_ms: Option<u64>,
    include_dev: Option<bool>,
    modules_dir: Option<String>,
}

impl CpmConfig {
    /// Load the global and project files plus environment overrides.
    pub fn load(project_root: Option<&Path>) -> Result<Self, Rejection> {
        let global = paths::global_config_path();
        let project = project_root.map(paths::project_config_path);
        Self::load_from(global.as_deref(), project.as_deref(), |key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load) with explicit file locations and an
    /// injectable environment lookup.
    pub fn load_from(
        global: Option<&Path>,
        project: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Rejection> {
        let mut config = Self::default();
        for path in [global, project].into_iter().flatten() {
            if let Some(layer) = read_layer(path)? {
                debug!("applying config from {}", path.display());
                config.apply(layer);
            }
        }

        if let Some(registry) = env("CPM_REGISTRY") {
            config.registry = registry;
        }
        if let Some(token) = env("CPM_AUTH_TOKEN") {
            config.auth_token = Some(token);
        }
        if let Some(timeout) = env("CPM_TIMEOUT") {
            config.timeout_seconds = timeout.trim().parse().map_err(|_| {
                Rejection::new(
                    ErrorKind::ParseError,
                    format!("CPM_TIMEOUT must be a number of seconds, got '{timeout}'"),
                )
            })?;
        }
        Ok(config)
    }

    fn apply(&mut self, layer: ConfigLayer) {
        let ConfigLayer {
            registry,
            auth_token,
            timeout_seconds,
            max_resolution_depth,
            queue_depth,
            op_timeout_ms,
            include_dev,
            modules_dir,
        } = layer;
        if let Some(v) = registry {
            self.registry = v;
        }
        if auth_token.is_some() {
            self.auth_token = auth_token;
        }
        if let Some(v) = timeout_seconds {
            self.timeout_seconds = v;
        }
        if let Some(v) = max_resolution_depth {
            self.max_resolution_depth = v;
        }
        if let Some(v) = queue_depth {
            self.queue_depth = v;
        }
        if let Some(v) = op_timeout_ms {
            self.op_timeout_ms = v;
        }
        if let Some(v) = include_dev {
            self.include_dev = v;
        }
        if let Some(v) = modules_dir {
            self.modules_dir = v;
        }
    }

    /// HTTP timeout and default plan-wide deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Limits for the command's [`QueueSet`](crate::QueueSet).
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_depth: self.queue_depth,
            op_timeout: Duration::from_millis(self.op_timeout_ms),
        }
    }

    /// The configured modules directory under `project_root`.
    pub fn modules_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.modules_dir)
    }

    /// Resolver options for a project, with the deadline set.
    pub fn resolve_options(&self, project_root: &Path) -> ResolveOptions {
        ResolveOptions {
            max_depth: self.max_resolution_depth,
            deadline: Some(self.timeout()),
            include_dev: self.include_dev,
            modules_dir: Some(self.modules_path(project_root)),
        }
    }
}

fn read_layer(path: &Path) -> Result<Option<ConfigLayer>, Rejection> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Rejection::io(format!("cannot read {}: {e}", path.display()))),
    };
    toml::from_str(&text).map(Some).map_err(|e| {
        Rejection::new(
            ErrorKind::ParseError,
            format!("invalid config {}: {}", path.display(), e.message()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_when_nothing_exists() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("cpmrc");
        let config = CpmConfig::load_from(Some(&missing), None, no_env).unwrap();
        assert_eq!(config, CpmConfig::default());
        assert_eq!(config.registry, "http://localhost:8080");
        assert_eq!(config.queue_config(), QueueConfig::default());
    }

    #[test]
    fn test_layers_and_env_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("cpmrc");
        let project = dir.path().join(".cpmrc");
        std::fs::write(&global, "registry = \"https://global.example\"\nqueue_depth = 8\n").unwrap();
        std::fs::write(&project, "registry = \"https://project.example\"\ninclude_dev = false\n").unwrap();

        let env: HashMap<&str, &str> = HashMap::from([("CPM_TIMEOUT", "5"), ("CPM_AUTH_TOKEN", "t0k")]);
        let config = CpmConfig::load_from(Some(&global), Some(&project), |k| {
            env.get(k).map(ToString::to_string)
        })
        .unwrap();

        assert_eq!(config.registry, "https://project.example");
        assert_eq!(config.queue_depth, 8);
        assert!(!config.include_dev);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.auth_token.as_deref(), Some("t0k"));

        let options = config.resolve_options(dir.path());
        assert_eq!(options.deadline, Some(Duration::from_secs(5)));
        assert_eq!(options.modules_dir, Some(dir.path().join("cpm_modules")));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join(".cpmrc");
        std::fs::write(&project, "timeout_seconds = \"soon\"").unwrap();
        let err = CpmConfig::load_from(None, Some(&project), no_env).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);

        let err = CpmConfig::load_from(None, None, |_| Some("x".into())).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
    }
}
