use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use serde::Serialize;
use sluice_core::{ExecutionError, ExecutionOptions, SchedulerConfig};
use tracing::info;
use uuid::Uuid;

use crate::callback::ExecutionContext;
use crate::metrics::ExecutorStats;
use crate::queue::OpBufferQueue;
use crate::scheduler::{Autoscaler, NoopAutoscaler};
use crate::substrate::TaskSubstrate;

/// Lifecycle of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutorState::Succeeded | ExecutorState::Failed | ExecutorState::Cancelled
        )
    }
}

/// State published by the driver thread, read by output consumers.
#[derive(Debug)]
pub(super) struct RunStatus {
    pub(super) state: ExecutorState,
    pub(super) error: Option<ExecutionError>,
}

/// Executes a DAG of physical operators as a stream.
///
/// [`execute`](Self::execute) builds and validates the topology, then hands
/// it to a dedicated driver thread that loops over completion processing,
/// state updates, operator selection and dispatch. Results are pulled from
/// the root operator with [`get_next`](Self::get_next), which may be called
/// from several threads at once (one per output split).
pub struct StreamingExecutor {
    pub(super) options: ExecutionOptions,
    pub(super) context: ExecutionContext,
    pub(super) substrate: Arc<dyn TaskSubstrate>,
    pub(super) scheduler_config: SchedulerConfig,
    pub(super) autoscaler: Arc<dyn Autoscaler>,
    pub(super) run_id: Uuid,
    /// Terminal state and error, published by the driver.
    pub(super) status: Arc<RwLock<RunStatus>>,
    pub(super) stats: Arc<RwLock<ExecutorStats>>,
    /// Cancellation signal.
    pub(super) shutdown: Arc<AtomicBool>,
    /// Outqueue of the root operator.
    pub(super) output: Option<Arc<OpBufferQueue>>,
    pub(super) driver: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingExecutor {
    /// Create an executor. `context` carries the run's callbacks.
    pub fn new(
        options: ExecutionOptions,
        context: ExecutionContext,
        substrate: Arc<dyn TaskSubstrate>,
    ) -> Self {
        let run_id = Uuid::new_v4();
        Self {
            options,
            context,
            substrate,
            scheduler_config: SchedulerConfig::default(),
            autoscaler: Arc::new(NoopAutoscaler),
            run_id,
            status: Arc::new(RwLock::new(RunStatus {
                state: ExecutorState::NotStarted,
                error: None,
            })),
            stats: Arc::new(RwLock::new(ExecutorStats::new(run_id))),
            shutdown: Arc::new(AtomicBool::new(false)),
            output: None,
            driver: Mutex::new(None),
        }
    }

    pub fn with_scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    pub fn with_autoscaler(mut self, autoscaler: Arc<dyn Autoscaler>) -> Self {
        self.autoscaler = autoscaler;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn state(&self) -> ExecutorState {
        self.status.read().unwrap_or_else(|e| e.into_inner()).state
    }

    /// The error that ended the run, if it failed.
    pub fn error(&self) -> Option<ExecutionError> {
        self.status
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .error
            .clone()
    }

    /// Get a snapshot of the execution stats.
    pub fn stats(&self) -> ExecutorStats {
        self.stats.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Get an Arc to the stats (for external reads without cloning).
    pub fn stats_handle(&self) -> Arc<RwLock<ExecutorStats>> {
        Arc::clone(&self.stats)
    }

    /// Request cancellation. The driver stops at its next iteration and
    /// reports [`ExecutionError::Cancelled`] to the failure callbacks.
    pub fn cancel(&self) {
        if !self.shutdown.swap(true, Ordering::Relaxed) {
            info!(run_id = %self.run_id, "Execution cancellation requested");
        }
    }

    /// Get an Arc to the cancellation flag (for external cancellation).
    pub fn cancel_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub(super) fn cancel_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

impl Drop for StreamingExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
