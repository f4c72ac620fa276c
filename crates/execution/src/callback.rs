use std::sync::Arc;

use sluice_core::ExecutionError;
use uuid::Uuid;

use crate::metrics::ExecutorStats;
use crate::topology::Topology;

/// Read-only view of a run handed to callbacks.
pub struct ExecutorView<'a> {
    pub(crate) run_id: Uuid,
    pub(crate) topology: &'a Topology,
    pub(crate) stats: &'a ExecutorStats,
}

impl<'a> ExecutorView<'a> {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn topology(&self) -> &'a Topology {
        self.topology
    }

    pub fn stats(&self) -> &'a ExecutorStats {
        self.stats
    }

    /// Operator names in topology order.
    pub fn operator_names(&self) -> Vec<&'a str> {
        self.topology.values().map(|state| state.name()).collect()
    }
}

/// Lifecycle hooks of one execution. Each hook fires at most once per run,
/// synchronously on the driver thread.
pub trait ExecutionCallback: Send + Sync {
    fn before_execution_starts(&self, _executor: &ExecutorView<'_>) {}

    fn after_execution_succeeds(&self, _executor: &ExecutorView<'_>) {}

    /// `error` is the task error that ended the run, unchanged, or
    /// [`ExecutionError::Cancelled`].
    fn after_execution_fails(&self, _executor: &ExecutorView<'_>, _error: &ExecutionError) {}
}

/// Run-scoped settings owned by the caller and handed to the executor.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    callbacks: Vec<Arc<dyn ExecutionCallback>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Callbacks fire in registration order.
    pub fn add_execution_callback(&mut self, callback: Arc<dyn ExecutionCallback>) {
        self.callbacks.push(callback);
    }

    /// Unregister `callback` (compared by identity). Returns whether it was
    /// registered.
    pub fn remove_execution_callback(&mut self, callback: &Arc<dyn ExecutionCallback>) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|registered| !Arc::ptr_eq(registered, callback));
        self.callbacks.len() != before
    }

    pub fn execution_callbacks(&self) -> &[Arc<dyn ExecutionCallback>] {
        &self.callbacks
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}
