use std::sync::Arc;

use serde_json::json;
use sluice_core::{BoxError, Bundle, ExecutionError, ExecutionResources};

use super::task_pool::TaskPool;
use super::{OpTask, OperatorContext, OperatorId, PhysicalOperator, TaskId};
use crate::locality::PlacementSelector;
use crate::substrate::{PlacementHint, TaskOutcome};

/// Writes one bundle to external storage.
pub type WriteFn = Arc<dyn Fn(&Bundle) -> Result<(), BoxError> + Send + Sync>;

/// Terminal write stage: one write task per input bundle. Each task emits
/// a single-row summary bundle `{"rows_written", "bytes_written"}`.
pub struct SinkOperator {
    id: OperatorId,
    name: String,
    write: WriteFn,
    tasks: TaskPool,
    rows_written: u64,
    completed: bool,
}

impl SinkOperator {
    pub fn new<F>(name: &str, write: F) -> Self
    where
        F: Fn(&Bundle) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let name = format!("Write({name})");
        let tasks = TaskPool::new(&name, ExecutionResources::cpu(1.0), PlacementHint::Default);
        Self {
            id: OperatorId::next(),
            name,
            write: Arc::new(write),
            tasks,
            rows_written: 0,
            completed: false,
        }
    }

    /// Rows reported written by completed tasks.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl PhysicalOperator for SinkOperator {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, ctx: &OperatorContext) -> Result<(), ExecutionError> {
        self.tasks.start(ctx);
        Ok(())
    }

    fn add_input(&mut self, bundle: Bundle, _input_index: usize) -> Result<(), ExecutionError> {
        if self.completed {
            return Ok(());
        }
        let write = Arc::clone(&self.write);
        self.tasks.submit(Box::new(move || -> TaskOutcome {
            write(&bundle)?;
            Ok(vec![Bundle::from_rows(vec![json!({
                "rows_written": bundle.num_rows(),
                "bytes_written": bundle.size_bytes(),
            })])])
        }))?;
        Ok(())
    }

    fn all_inputs_done(&mut self) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.tasks.has_output()
    }

    fn get_next(&mut self) -> Option<Bundle> {
        self.tasks.pop_output()
    }

    fn get_active_tasks(&self) -> Vec<OpTask> {
        self.tasks.active_tasks()
    }

    fn on_task_completed(&mut self, task_id: TaskId, outcome: TaskOutcome) -> Result<(), ExecutionError> {
        self.tasks.finish(task_id)?;
        let summaries = outcome.map_err(ExecutionError::task)?;
        self.rows_written += summaries
            .iter()
            .flat_map(Bundle::rows)
            .filter_map(|row| row.get("rows_written").and_then(|v| v.as_u64()))
            .sum::<u64>();
        self.tasks.push_outputs(task_id, summaries);
        Ok(())
    }

    fn completed(&self) -> bool {
        self.completed
    }

    fn mark_execution_completed(&mut self) {
        self.completed = true;
        self.tasks.abandon();
    }

    fn num_active_tasks(&self) -> usize {
        self.tasks.num_active()
    }

    fn incremental_resource_usage(&self) -> ExecutionResources {
        self.tasks.per_task()
    }

    fn min_resource_requirement(&self) -> ExecutionResources {
        self.tasks.per_task()
    }

    fn current_processor_usage(&self) -> ExecutionResources {
        self.tasks.processor_usage()
    }

    fn internal_queue_bytes(&self) -> u64 {
        self.tasks.buffered_bytes()
    }

    fn set_placement(&mut self, selector: PlacementSelector) {
        self.tasks.set_placement(selector);
    }

    fn next_placement(&self) -> PlacementHint {
        self.tasks.next_placement()
    }

    fn shutdown(&mut self) {
        self.tasks.abandon();
    }
}
