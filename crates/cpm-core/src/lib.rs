//! CPM core: promise engine, resource queues and dependency resolver.
//!
//! Three layers, each built on the one below:
//!
//! - [`promise`]: single-assignment promises settled through one microtask
//!   worker owned by an [`Engine`].
//! - [`queue`]: per-resource FIFO queues that never stall on a failed
//!   operation.
//! - [`resolver`]: semver resolution into an [`InstallPlan`], executed by
//!   the [`Installer`].

pub mod config;
pub mod engine;
pub mod error;
pub mod install;
pub mod pack;
pub mod paths;
pub mod project;
pub mod promise;
pub mod queue;
pub mod registry;
pub mod resolver;

pub mod reporter;

pub use config::CpmConfig;
pub use engine::Engine;
pub use error::{ErrorKind, Rejection};
pub use install::{InstallReport, Installer};
pub use paths::*;
pub use promise::{Deferred, Outcome, Promise, PromiseState, all, all_settled, nfcall};
pub use queue::{HardenedQueue, QueueConfig, QueueSet, QueueStats};
#[cfg(feature = "network")]
pub use registry::HttpRegistry;
pub use registry::{MemoryRegistry, Registry};
pub use reporter::{NullReporter, Reporter};
pub use resolver::{Conflict, ConflictKind, DepNode, InstallPlan, ResolveOptions, Resolver};

/// User Agent string for registry requests
pub const USER_AGENT: &str = concat!("cpm/", env!("CARGO_PKG_VERSION"));
