//! Physical operators: the DAG nodes the executor schedules.
//!
//! Every operator implements [`PhysicalOperator`]. Task-based operators
//! ([`MapOperator`], [`SinkOperator`]) run their work on the
//! [`TaskSubstrate`]; the others ([`InputDataBuffer`], [`UnionOperator`],
//! [`LimitOperator`], [`OutputSplitter`]) transform bundles inline and are
//! never throttled.

pub mod input_buffer;
pub mod limit;
pub mod map;
pub mod output_splitter;
pub mod sink;
pub(crate) mod task_pool;
pub mod union;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use sluice_core::{Bundle, ExecutionError, ExecutionOptions, ExecutionResources};

use crate::locality::PlacementSelector;
use crate::substrate::{PlacementHint, TaskOutcome, TaskRef, TaskSubstrate};

pub use input_buffer::InputDataBuffer;
pub use limit::LimitOperator;
pub use map::{BlockTransform, ComputeStrategy, MapOperator};
pub use output_splitter::OutputSplitter;
pub use sink::{SinkOperator, WriteFn};
pub use union::UnionOperator;

static NEXT_OPERATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an operator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OperatorId(u64);

impl OperatorId {
    pub fn next() -> Self {
        Self(NEXT_OPERATOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Identifier of a task, unique within its operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// An in-flight task of an operator, as seen by the completion processor.
#[derive(Debug, Clone)]
pub struct OpTask {
    pub task_id: TaskId,
    pub handle: TaskRef,
}

/// Everything an operator needs at start time.
#[derive(Clone)]
pub struct OperatorContext {
    pub substrate: Arc<dyn TaskSubstrate>,
    pub options: ExecutionOptions,
}

impl fmt::Debug for OperatorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorContext")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A node of the physical plan.
///
/// The executor drives an operator entirely through this interface from a
/// single driver thread:
///
/// 1. [`start`](Self::start) once, before any input.
/// 2. [`add_input`](Self::add_input) for each bundle taken from one of its
///    input queues, tagged with the upstream index it came from.
/// 3. [`on_task_completed`](Self::on_task_completed) once per finished task
///    reported by [`get_active_tasks`](Self::get_active_tasks).
/// 4. [`input_done`](Self::input_done) once per input, then
///    [`all_inputs_done`](Self::all_inputs_done) exactly once.
/// 5. Outputs are pulled with [`has_next`](Self::has_next) /
///    [`get_next`](Self::get_next) until the operator completes.
pub trait PhysicalOperator: Send {
    fn id(&self) -> OperatorId;

    /// Human-readable name, e.g. `Map(double)`.
    fn name(&self) -> &str;

    fn start(&mut self, ctx: &OperatorContext) -> Result<(), ExecutionError>;

    /// Accept one bundle from upstream slot `input_index`.
    fn add_input(&mut self, bundle: Bundle, input_index: usize) -> Result<(), ExecutionError>;

    /// Upstream `input_index` will produce no more bundles.
    fn input_done(&mut self, _input_index: usize) -> Result<(), ExecutionError> {
        Ok(())
    }

    /// No more input will arrive on any index.
    fn all_inputs_done(&mut self) -> Result<(), ExecutionError>;

    /// Whether an output bundle is ready.
    fn has_next(&self) -> bool;

    fn get_next(&mut self) -> Option<Bundle>;

    /// Handles of the tasks currently in flight.
    fn get_active_tasks(&self) -> Vec<OpTask>;

    /// Completion callback for a task returned by `get_active_tasks`.
    fn on_task_completed(
        &mut self,
        _task_id: TaskId,
        _outcome: TaskOutcome,
    ) -> Result<(), ExecutionError> {
        Ok(())
    }

    /// All inputs are done and all work has finished, or execution was
    /// forced to complete.
    fn completed(&self) -> bool;

    /// Force completion (early exit or cancellation).
    fn mark_execution_completed(&mut self);

    fn num_active_tasks(&self) -> usize {
        0
    }

    /// Operators that never launch tasks bypass resource budget checks.
    fn throttling_disabled(&self) -> bool {
        false
    }

    /// Operator-level admission check (e.g. concurrency caps).
    fn should_add_input(&self) -> bool {
        true
    }

    /// Resources one more task would take.
    fn incremental_resource_usage(&self) -> ExecutionResources {
        ExecutionResources::zero()
    }

    /// Resources the operator needs to make any progress at all.
    fn min_resource_requirement(&self) -> ExecutionResources {
        ExecutionResources::zero()
    }

    /// CPU/GPU held by active tasks.
    fn current_processor_usage(&self) -> ExecutionResources {
        ExecutionResources::zero()
    }

    /// Bytes buffered inside the operator (not counting its outqueue).
    fn internal_queue_bytes(&self) -> u64 {
        0
    }

    fn set_placement(&mut self, _selector: PlacementSelector) {}

    /// Placement hint for the next task.
    fn next_placement(&self) -> PlacementHint {
        PlacementHint::Default
    }

    /// Release resources. Called once on every exit path.
    fn shutdown(&mut self) {}
}

impl fmt::Debug for dyn PhysicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalOperator")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("completed", &self.completed())
            .finish()
    }
}

/// Error for operators driven before `start` ran.
pub(crate) fn not_started(name: &str) -> ExecutionError {
    ExecutionError::InvalidState(format!("{name} received input before start"))
}
