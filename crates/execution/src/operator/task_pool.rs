use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use sluice_core::{Bundle, ExecutionError, ExecutionResources};
use tracing::debug;

use super::{not_started, OpTask, OperatorContext, TaskId};
use crate::locality::PlacementSelector;
use crate::substrate::{PlacementHint, TaskRef, TaskSubstrate, TaskWork};

/// Bookkeeping shared by task-based operators: submission with placement,
/// the active task set, and the output buffer (reordered by submission
/// index when `preserve_order` is on).
pub(crate) struct TaskPool {
    owner: String,
    substrate: Option<Arc<dyn TaskSubstrate>>,
    placement: PlacementSelector,
    default_placement: PlacementHint,
    per_task: ExecutionResources,
    preserve_order: bool,
    active: BTreeMap<TaskId, TaskRef>,
    next_task: u64,
    next_to_emit: u64,
    /// Finished out of order, waiting for earlier tasks.
    held: BTreeMap<u64, Vec<Bundle>>,
    outputs: VecDeque<Bundle>,
    buffered_bytes: u64,
}

impl TaskPool {
    pub(crate) fn new(owner: &str, per_task: ExecutionResources, default_placement: PlacementHint) -> Self {
        Self {
            owner: owner.to_string(),
            substrate: None,
            placement: PlacementSelector::Disabled,
            default_placement,
            per_task,
            preserve_order: false,
            active: BTreeMap::new(),
            next_task: 0,
            next_to_emit: 0,
            held: BTreeMap::new(),
            outputs: VecDeque::new(),
            buffered_bytes: 0,
        }
    }

    pub(crate) fn start(&mut self, ctx: &OperatorContext) {
        self.substrate = Some(Arc::clone(&ctx.substrate));
        self.preserve_order = ctx.options.preserve_order;
    }

    pub(crate) fn set_placement(&mut self, selector: PlacementSelector) {
        self.placement = selector;
    }

    pub(crate) fn next_placement(&self) -> PlacementHint {
        self.placement
            .next_hint()
            .unwrap_or_else(|| self.default_placement.clone())
    }

    pub(crate) fn per_task(&self) -> ExecutionResources {
        self.per_task
    }

    pub(crate) fn submit(&mut self, work: TaskWork) -> Result<TaskId, ExecutionError> {
        let substrate = self
            .substrate
            .as_ref()
            .ok_or_else(|| not_started(&self.owner))?;
        let placement = self.next_placement();
        let task_id = TaskId(self.next_task);
        self.next_task += 1;
        let handle = substrate.submit(work, &placement);
        debug!(operator = %self.owner, task = %task_id, placement = %placement, "Task submitted");
        self.active.insert(task_id, handle);
        Ok(task_id)
    }

    pub(crate) fn active_tasks(&self) -> Vec<OpTask> {
        self.active
            .iter()
            .map(|(task_id, handle)| OpTask {
                task_id: *task_id,
                handle: Arc::clone(handle),
            })
            .collect()
    }

    pub(crate) fn num_active(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn num_submitted(&self) -> u64 {
        self.next_task
    }

    /// Retire a finished task. Fails if the task is not active, so each
    /// completion is accepted at most once.
    pub(crate) fn finish(&mut self, task_id: TaskId) -> Result<(), ExecutionError> {
        self.active.remove(&task_id).map(|_| ()).ok_or_else(|| {
            ExecutionError::InvalidState(format!("{} has no active {task_id}", self.owner))
        })
    }

    /// Buffer the outputs of a finished task.
    pub(crate) fn push_outputs(&mut self, task_id: TaskId, bundles: Vec<Bundle>) {
        self.buffered_bytes += bundles.iter().map(Bundle::size_bytes).sum::<u64>();
        if !self.preserve_order {
            self.outputs.extend(bundles);
            return;
        }
        self.held.insert(task_id.0, bundles);
        while let Some(ready) = self.held.remove(&self.next_to_emit) {
            self.outputs.extend(ready);
            self.next_to_emit += 1;
        }
    }

    pub(crate) fn has_output(&self) -> bool {
        !self.outputs.is_empty()
    }

    pub(crate) fn pop_output(&mut self) -> Option<Bundle> {
        let bundle = self.outputs.pop_front()?;
        self.buffered_bytes -= bundle.size_bytes();
        Some(bundle)
    }

    pub(crate) fn buffered_bytes(&self) -> u64 {
        self.buffered_bytes
    }

    pub(crate) fn processor_usage(&self) -> ExecutionResources {
        self.per_task.scale(self.active.len() as f64)
    }

    /// Drop buffered outputs and forget in-flight tasks. Their results, if
    /// any still arrive, are never collected.
    pub(crate) fn abandon(&mut self) {
        if !self.active.is_empty() {
            debug!(operator = %self.owner, tasks = self.active.len(), "Abandoning active tasks");
        }
        self.active.clear();
        self.held.clear();
        self.outputs.clear();
        self.buffered_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_core::ExecutionOptions;

    use crate::testing::{context, ManualSubstrate};

    fn started_pool(preserve_order: bool) -> TaskPool {
        let mut pool = TaskPool::new("Map(test)", ExecutionResources::cpu(1.0), PlacementHint::Default);
        pool.start(&context(
            ManualSubstrate::new(ExecutionResources::cpu(4.0)),
            ExecutionOptions::default().with_preserve_order(preserve_order),
        ));
        pool
    }

    fn noop() -> TaskWork {
        Box::new(|| Ok(vec![]))
    }

    fn out(x: i64) -> Vec<Bundle> {
        vec![Bundle::from_rows(vec![json!(x)])]
    }

    fn drain(pool: &mut TaskPool) -> Vec<i64> {
        std::iter::from_fn(|| pool.pop_output())
            .flat_map(|b| b.rows().filter_map(|v| v.as_i64()).collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn submit_requires_start() {
        let mut pool = TaskPool::new("Map(test)", ExecutionResources::cpu(1.0), PlacementHint::Default);
        assert!(matches!(pool.submit(noop()), Err(ExecutionError::InvalidState(_))));
    }

    #[test]
    fn tracks_active_tasks_and_usage() {
        let mut pool = started_pool(false);
        let a = pool.submit(noop()).unwrap();
        let b = pool.submit(noop()).unwrap();
        assert_eq!(pool.num_active(), 2);
        assert_eq!(pool.processor_usage().cpu, 2.0);
        assert_eq!(pool.active_tasks().len(), 2);

        pool.finish(a).unwrap();
        assert!(pool.finish(a).is_err());
        assert_eq!(pool.num_active(), 1);
        pool.finish(b).unwrap();
        assert_eq!(pool.processor_usage().cpu, 0.0);
        assert_eq!(pool.num_submitted(), 2);
    }

    #[test]
    fn completion_order_without_preserve_order() {
        let mut pool = started_pool(false);
        let a = pool.submit(noop()).unwrap();
        let b = pool.submit(noop()).unwrap();
        pool.finish(b).unwrap();
        pool.push_outputs(b, out(2));
        pool.finish(a).unwrap();
        pool.push_outputs(a, out(1));
        assert_eq!(drain(&mut pool), vec![2, 1]);
        assert_eq!(pool.buffered_bytes(), 0);
    }

    #[test]
    fn submission_order_with_preserve_order() {
        let mut pool = started_pool(true);
        let ids: Vec<_> = (0..3).map(|_| pool.submit(noop()).unwrap()).collect();
        pool.push_outputs(ids[2], out(3));
        pool.push_outputs(ids[1], out(2));
        assert!(!pool.has_output());
        assert!(pool.buffered_bytes() > 0);
        pool.push_outputs(ids[0], out(1));
        assert_eq!(drain(&mut pool), vec![1, 2, 3]);
    }

    #[test]
    fn placement_falls_back_to_default() {
        let mut pool = TaskPool::new("Map(test)", ExecutionResources::cpu(1.0), PlacementHint::Spread);
        assert_eq!(pool.next_placement(), PlacementHint::Spread);
        pool.set_placement(PlacementSelector::Pinned("n1".into()));
        assert_eq!(pool.next_placement(), PlacementHint::Node("n1".into()));
    }
}
