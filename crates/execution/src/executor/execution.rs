use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use sluice_core::{ExecutionError, SchedulerConfig};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::callback::{ExecutionCallback, ExecutorView};
use crate::dag::Dag;
use crate::metrics::ExecutorStats;
use crate::operator::{OperatorContext, OperatorId};
use crate::progress::ProgressReporter;
use crate::resource_manager::{validate_dag, ResourceManager};
use crate::scheduler::{
    process_completed_tasks, select_operator_to_run, update_operator_states, Autoscaler,
};
use crate::substrate::local::panic_message;
use crate::topology::{build_streaming_topology, Topology};

use super::core::{ExecutorState, RunStatus};
use super::StreamingExecutor;

impl StreamingExecutor {
    /// Start executing `dag`, whose final operator is `root`.
    ///
    /// Construction errors (duplicate operators, infeasible resource
    /// requirements, operator start failures) are returned here, before any
    /// callback fires. On success the run proceeds on a driver thread and
    /// results are read with [`get_next`](Self::get_next).
    pub fn execute(&mut self, dag: Dag, root: OperatorId) -> Result<(), ExecutionError> {
        if self.state() != ExecutorState::NotStarted {
            return Err(ExecutionError::InvalidState(format!(
                "execute called on a {:?} executor",
                self.state()
            )));
        }

        let current_node = self.substrate.current_node_id();
        let (mut topology, _) =
            build_streaming_topology(dag, root, &self.options, &current_node)?;
        let resource_manager = ResourceManager::new(&self.options, self.substrate.cluster_resources());
        validate_dag(&topology, &resource_manager.get_global_limits())?;

        let ctx = OperatorContext {
            substrate: Arc::clone(&self.substrate),
            options: self.options.clone(),
        };
        if let Err(e) = topology
            .values_mut()
            .try_for_each(|state| state.operator.start(&ctx))
        {
            topology.values_mut().for_each(|state| state.operator.shutdown());
            return Err(e);
        }

        let output = topology
            .get(&root)
            .map(|state| Arc::clone(&state.outqueue))
            .ok_or_else(|| ExecutionError::OperatorNotFound(root.to_string()))?;
        self.output = Some(output);

        info!(
            run_id = %self.run_id,
            operators = topology.len(),
            "Starting execution: {}",
            topology
                .values()
                .map(|state| state.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        {
            let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
            stats.started_at = Some(Utc::now());
            stats.state = ExecutorState::Running;
            stats.refresh_operators(&topology);
        }
        self.status.write().unwrap_or_else(|e| e.into_inner()).state = ExecutorState::Running;

        let driver = Driver {
            run_id: self.run_id,
            progress: ProgressReporter::new(
                self.scheduler_config.progress_interval(),
                self.options.verbose_progress,
            ),
            topology,
            resource_manager,
            callbacks: self.context.execution_callbacks().to_vec(),
            autoscaler: Arc::clone(&self.autoscaler),
            config: self.scheduler_config.clone(),
            shutdown: Arc::clone(&self.shutdown),
            status: Arc::clone(&self.status),
            stats: Arc::clone(&self.stats),
            operators_shut_down: false,
        };
        // On a spawn failure the closure, and with it the driver, is dropped
        // here, which shuts the started operators down.
        let handle = std::thread::Builder::new()
            .name(format!("sluice-driver-{}", &self.run_id.simple().to_string()[..8]))
            .spawn(move || driver.run())
            .map_err(|e| {
                let err = ExecutionError::InvalidState(format!("failed to spawn driver thread: {e}"));
                let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
                status.state = ExecutorState::Failed;
                status.error = Some(err.clone());
                err
            })?;
        *self.driver.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }
}

/// Owns the topology for the duration of the run.
struct Driver {
    run_id: Uuid,
    topology: Topology,
    resource_manager: ResourceManager,
    callbacks: Vec<Arc<dyn ExecutionCallback>>,
    autoscaler: Arc<dyn Autoscaler>,
    config: SchedulerConfig,
    progress: ProgressReporter,
    shutdown: Arc<AtomicBool>,
    status: Arc<RwLock<RunStatus>>,
    stats: Arc<RwLock<ExecutorStats>>,
    operators_shut_down: bool,
}

impl Driver {
    fn run(mut self) {
        let result = self
            .notify(|cb, view| cb.before_execution_starts(view))
            .and_then(|()| {
                catch_panic(|| self.scheduling_loop()).and_then(|result| result)
            });

        self.shutdown_operators();
        {
            let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
            stats.refresh_operators(&self.topology);
            stats.finished_at = Some(Utc::now());
        }

        let (state, error) = match result {
            Ok(()) => {
                info!(run_id = %self.run_id, "Execution succeeded");
                if let Err(e) = self.notify(|cb, view| cb.after_execution_succeeds(view)) {
                    warn!(run_id = %self.run_id, "Success callback failed: {}", e);
                }
                (ExecutorState::Succeeded, None)
            }
            Err(err) => {
                let state = if err.is_cancelled() {
                    warn!(run_id = %self.run_id, "Execution cancelled");
                    ExecutorState::Cancelled
                } else {
                    error!(run_id = %self.run_id, "Execution failed: {}", err);
                    ExecutorState::Failed
                };
                if let Err(e) = self.notify(|cb, view| cb.after_execution_fails(view, &err)) {
                    warn!(run_id = %self.run_id, "Failure callback failed: {}", e);
                }
                (state, Some(err))
            }
        };

        self.stats.write().unwrap_or_else(|e| e.into_inner()).state = state;
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        status.state = state;
        status.error = error;
    }

    /// Shut down every operator exactly once, even if one of them panics.
    fn shutdown_operators(&mut self) {
        if self.operators_shut_down {
            return;
        }
        self.operators_shut_down = true;
        for state in self.topology.values_mut() {
            if let Err(e) = catch_panic(|| state.operator.shutdown()) {
                warn!(run_id = %self.run_id, operator = state.name(), "Operator shutdown failed: {}", e);
            }
        }
    }

    fn scheduling_loop(&mut self) -> Result<(), ExecutionError> {
        let mut backpressured: Vec<OperatorId> = Vec::new();
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(ExecutionError::Cancelled);
            }
            let started = Instant::now();

            let completed = process_completed_tasks(
                &mut self.topology,
                &mut self.resource_manager,
                self.config.completion_iteration_budget,
            )?;
            let newly_completed = update_operator_states(&mut self.topology);

            let selected = select_operator_to_run(
                &mut self.topology,
                &self.resource_manager,
                &backpressured,
                self.autoscaler.as_ref(),
                true,
            );
            let mut dispatched = false;
            if let Some(id) = selected {
                if let Some(state) = self.topology.get_mut(&id) {
                    dispatched = state.dispatch_next_task()?;
                }
            }
            backpressured = self.backpressured_operators();

            {
                let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
                stats.record_iteration(started.elapsed(), completed, dispatched);
                stats.refresh_operators(&self.topology);
            }
            self.progress
                .maybe_report(&self.topology, &self.resource_manager);

            if self.all_done() {
                return Ok(());
            }
            if completed == 0 && newly_completed == 0 && !dispatched {
                std::thread::sleep(self.config.poll_interval());
            }
        }
    }

    /// Operators with queued input held back by the resource budget.
    fn backpressured_operators(&self) -> Vec<OperatorId> {
        let ids: Vec<OperatorId> = self
            .topology
            .iter()
            .filter(|(_, state)| state.status.runnable && !state.status.under_resource_limits)
            .map(|(id, _)| *id)
            .collect();
        if !ids.is_empty() {
            debug!(operators = ids.len(), "Operators backpressured");
        }
        ids
    }

    fn all_done(&self) -> bool {
        self.topology
            .values()
            .all(|state| state.operator.completed() && !state.operator.has_next())
    }

    /// Invoke `f` on every callback. Stops at the first callback that
    /// panics and reports it as [`ExecutionError::DriverPanicked`].
    fn notify(
        &self,
        f: impl Fn(&dyn ExecutionCallback, &ExecutorView<'_>),
    ) -> Result<(), ExecutionError> {
        if self.callbacks.is_empty() {
            return Ok(());
        }
        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner()).clone();
        let view = ExecutorView {
            run_id: self.run_id,
            topology: &self.topology,
            stats: &stats,
        };
        for callback in &self.callbacks {
            catch_panic(|| f(callback.as_ref(), &view))?;
        }
        Ok(())
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        // Reached without `run` when the driver thread never started.
        if !self.operators_shut_down {
            warn!(run_id = %self.run_id, "Driver dropped before finishing; shutting down operators");
            self.shutdown_operators();
        }
    }
}

/// Run `f`, turning a panic into [`ExecutionError::DriverPanicked`].
fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, ExecutionError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| ExecutionError::DriverPanicked(panic_message(payload.as_ref())))
}
