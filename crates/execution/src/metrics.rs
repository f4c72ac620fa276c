use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::executor::ExecutorState;
use crate::topology::Topology;

/// Counters of one operator, refreshed every scheduling iteration.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorStats {
    pub name: String,
    pub bundles_dispatched: u64,
    pub bundles_produced: u64,
    pub rows_produced: u64,
    pub queued_bundles: usize,
    pub active_tasks: usize,
    pub completed: bool,
}

/// Snapshot of an execution, shared with callers through
/// [`StreamingExecutor::stats`](crate::executor::StreamingExecutor::stats).
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub run_id: Uuid,
    pub state: ExecutorState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Scheduling loop iterations.
    pub iterations: u64,
    /// Time spent inside scheduling iterations (excluding idle sleeps).
    pub scheduling_time: Duration,
    pub tasks_completed: u64,
    pub bundles_dispatched: u64,
    /// Bundles handed to callers via `get_next`.
    pub bundles_emitted: u64,
    /// Per-operator counters, in topology order.
    pub operators: Vec<OperatorStats>,
}

impl ExecutorStats {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: ExecutorState::NotStarted,
            started_at: None,
            finished_at: None,
            iterations: 0,
            scheduling_time: Duration::ZERO,
            tasks_completed: 0,
            bundles_dispatched: 0,
            bundles_emitted: 0,
            operators: Vec::new(),
        }
    }

    /// Record one scheduling iteration.
    pub fn record_iteration(&mut self, duration: Duration, tasks_completed: usize, dispatched: bool) {
        self.iterations += 1;
        self.scheduling_time += duration;
        self.tasks_completed += tasks_completed as u64;
        if dispatched {
            self.bundles_dispatched += 1;
        }
    }

    pub fn refresh_operators(&mut self, topology: &Topology) {
        self.operators = topology
            .values()
            .map(|state| OperatorStats {
                name: state.name().to_string(),
                bundles_dispatched: state.bundles_dispatched(),
                bundles_produced: state.bundles_produced(),
                rows_produced: state.rows_produced,
                queued_bundles: state.num_queued(),
                active_tasks: state.operator().num_active_tasks(),
                completed: state.operator().completed(),
            })
            .collect();
    }

    /// Wall time from start to finish (or to now while running).
    pub fn wall_time(&self) -> Option<Duration> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - started).to_std().ok()
    }

    /// Mean time per scheduling iteration.
    pub fn avg_iteration_time(&self) -> Duration {
        if self.iterations == 0 {
            return Duration::ZERO;
        }
        let nanos = self.scheduling_time.as_nanos() / self.iterations as u128;
        Duration::from_nanos(nanos as u64)
    }
}
