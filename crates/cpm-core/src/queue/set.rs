use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpm_schema::PackageName;

use super::{HardenedQueue, QueueConfig, QueueStats};
use crate::engine::Engine;
use crate::promise::{Promise, all, lock};

/// One queue per resource identifier, created on first use.
pub struct QueueSet {
    engine: Engine,
    config: QueueConfig,
    queues: Mutex<HashMap<String, Arc<HardenedQueue>>>,
}

impl fmt::Debug for QueueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSet")
            .field("config", &self.config)
            .field("queues", &lock(&self.queues).len())
            .finish_non_exhaustive()
    }
}

impl QueueSet {
    /// An empty set whose queues all use `config`.
    pub fn new(engine: &Engine, config: QueueConfig) -> Self {
        Self {
            engine: engine.clone(),
            config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Limits shared by every queue in the set.
    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// The queue for `resource`, creating it if needed.
    pub fn queue(&self, resource: &str) -> Arc<HardenedQueue> {
        let mut queues = lock(&self.queues);
        Arc::clone(queues.entry(resource.to_string()).or_insert_with(|| {
            Arc::new(HardenedQueue::new(&self.engine, resource, self.config))
        }))
    }

    /// Queue serializing registry requests for one package.
    pub fn registry(&self, name: &PackageName) -> Arc<HardenedQueue> {
        self.queue(&format!("registry:{name}"))
    }

    /// Queue serializing filesystem writes under one install path.
    pub fn install(&self, path: &Path) -> Arc<HardenedQueue> {
        self.queue(&format!("install:{}", path.display()))
    }

    /// Number of queues created so far.
    pub fn len(&self) -> usize {
        lock(&self.queues).len()
    }

    /// No queue has been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters for every queue, sorted by resource.
    pub fn stats(&self) -> Vec<(String, QueueStats)> {
        let mut stats: Vec<_> = lock(&self.queues)
            .iter()
            .map(|(resource, queue)| (resource.clone(), queue.stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Close every queue; fulfills when all of them have drained.
    pub fn close_all(&self, timeout: Duration) -> Promise<Vec<()>> {
        let queues: Vec<_> = lock(&self.queues).values().cloned().collect();
        all(&self.engine, queues.iter().map(|q| q.close(timeout)))
    }
}
