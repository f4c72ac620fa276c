use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sluice_core::{ExecutionResources, RuntimeConfig};
use tracing::{debug, info, warn};

use super::{PlacementHint, TaskRef, TaskSlot, TaskSubstrate, TaskWork};

#[derive(Debug, thiserror::Error)]
pub enum SubstrateError {
    #[error("failed to build worker pool: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),
}

/// Error reported for a task whose work panicked.
#[derive(Debug, thiserror::Error)]
#[error("task panicked: {0}")]
pub struct TaskPanicked(pub String);

/// In-process substrate: every task runs on a shared rayon pool and
/// placement hints are only recorded.
pub struct LocalSubstrate {
    pool: rayon::ThreadPool,
    resources: ExecutionResources,
    node_id: String,
    submitted: AtomicUsize,
    placements: Mutex<HashMap<PlacementHint, usize>>,
}

impl LocalSubstrate {
    /// Build a substrate advertising the worker threads, GPUs and object
    /// store memory of `config`.
    pub fn new(config: &RuntimeConfig) -> Result<Self, SubstrateError> {
        let num_workers = config.resolved_worker_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|i| format!("sluice-worker-{i}"))
            .build()?;
        let resources = ExecutionResources::new(
            num_workers as f64,
            config.num_gpus,
            config.object_store_memory_bytes as f64,
        );
        info!(
            workers = num_workers,
            node = %config.node_id,
            "Local substrate ready ({})",
            resources
        );
        Ok(Self {
            pool,
            resources,
            node_id: config.node_id.clone(),
            submitted: AtomicUsize::new(0),
            placements: Mutex::new(HashMap::new()),
        })
    }

    /// Override the advertised cluster resources. The worker pool size is
    /// unaffected.
    pub fn with_cluster_resources(mut self, resources: ExecutionResources) -> Self {
        self.resources = resources;
        self
    }

    /// Number of tasks submitted so far.
    pub fn num_submitted(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }

    /// How many tasks were submitted with each placement hint.
    pub fn placement_counts(&self) -> HashMap<PlacementHint, usize> {
        self.placements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl TaskSubstrate for LocalSubstrate {
    fn submit(&self, work: TaskWork, placement: &PlacementHint) -> TaskRef {
        let slot = TaskSlot::new();
        let task_slot = Arc::clone(&slot);
        let n = self.submitted.fetch_add(1, Ordering::Relaxed);
        *self
            .placements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(placement.clone())
            .or_default() += 1;
        debug!(task = n, placement = %placement, "Submitting task");

        self.pool.spawn(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(task = n, "Task panicked: {}", message);
                    Err(TaskPanicked(message).into())
                }
            };
            task_slot.complete(outcome);
        });
        slot
    }

    fn cluster_resources(&self) -> ExecutionResources {
        self.resources
    }

    fn current_node_id(&self) -> String {
        self.node_id.clone()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
