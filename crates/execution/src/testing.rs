//! Test doubles shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;
use sluice_core::{Bundle, ExecutionError, ExecutionOptions, ExecutionResources};

use crate::operator::{OpTask, OperatorContext, OperatorId, PhysicalOperator, TaskId};
use crate::substrate::{PlacementHint, TaskOutcome, TaskRef, TaskSlot, TaskSubstrate, TaskWork};

/// Substrate that queues work until the test runs it, on the test thread.
pub(crate) struct ManualSubstrate {
    resources: ExecutionResources,
    pending: Mutex<VecDeque<(TaskRef, TaskWork)>>,
    placements: Mutex<Vec<PlacementHint>>,
}

impl ManualSubstrate {
    pub(crate) fn new(resources: ExecutionResources) -> Arc<Self> {
        Arc::new(Self {
            resources,
            pending: Mutex::new(VecDeque::new()),
            placements: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn num_pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Run the most recently submitted task.
    pub(crate) fn run_last(&self) -> bool {
        let next = self.pending.lock().unwrap().pop_back();
        match next {
            Some((slot, work)) => {
                slot.complete(work());
                true
            }
            None => false,
        }
    }

    /// Run every pending task in submission order.
    pub(crate) fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.pending.lock().unwrap().pop_front();
            let Some((slot, work)) = next else { break };
            slot.complete(work());
            ran += 1;
        }
        ran
    }

    pub(crate) fn placements(&self) -> Vec<PlacementHint> {
        self.placements.lock().unwrap().clone()
    }
}

impl TaskSubstrate for ManualSubstrate {
    fn submit(&self, work: TaskWork, placement: &PlacementHint) -> TaskRef {
        let slot = TaskSlot::new();
        self.pending.lock().unwrap().push_back((Arc::clone(&slot), work));
        self.placements.lock().unwrap().push(placement.clone());
        slot
    }

    fn cluster_resources(&self) -> ExecutionResources {
        self.resources
    }

    fn current_node_id(&self) -> String {
        "local".to_string()
    }
}

pub(crate) fn context(substrate: Arc<ManualSubstrate>, options: ExecutionOptions) -> OperatorContext {
    OperatorContext { substrate, options }
}

pub(crate) fn int_bundle(x: i64) -> Bundle {
    Bundle::from_rows(vec![json!(x)])
}

pub(crate) fn ints(bundle: &Bundle) -> Vec<i64> {
    bundle.rows().filter_map(|v| v.as_i64()).collect()
}

/// Calls recorded by a [`MockOperator`], shared with the test.
#[derive(Debug, Default)]
pub(crate) struct MockLog {
    pub inputs: Vec<(usize, Bundle)>,
    pub input_done: Vec<usize>,
    pub all_inputs_done: usize,
    pub completions: Vec<TaskId>,
    pub marked_completed: usize,
    pub shutdowns: usize,
}

/// Scriptable operator for scheduler and topology tests.
pub(crate) struct MockOperator {
    id: OperatorId,
    name: String,
    pub throttling_disabled: bool,
    pub should_add_input: bool,
    pub incremental: ExecutionResources,
    pub min_requirement: ExecutionResources,
    pub processor_usage: ExecutionResources,
    pub internal_bytes: u64,
    /// Panic with this message when an input arrives.
    pub panic_on_input: Option<&'static str>,
    pub tasks: Vec<OpTask>,
    pub outputs: VecDeque<Bundle>,
    completed: bool,
    log: Arc<Mutex<MockLog>>,
}

impl MockOperator {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            id: OperatorId::next(),
            name: name.to_string(),
            throttling_disabled: false,
            should_add_input: true,
            incremental: ExecutionResources::cpu(1.0),
            min_requirement: ExecutionResources::cpu(1.0),
            processor_usage: ExecutionResources::zero(),
            internal_bytes: 0,
            panic_on_input: None,
            tasks: Vec::new(),
            outputs: VecDeque::new(),
            completed: false,
            log: Arc::new(Mutex::new(MockLog::default())),
        }
    }

    pub(crate) fn log(&self) -> Arc<Mutex<MockLog>> {
        Arc::clone(&self.log)
    }

    /// Register an in-flight task and return its handle.
    pub(crate) fn with_task(mut self, task_id: u64) -> (Self, TaskRef) {
        let handle = TaskSlot::new();
        self.tasks.push(OpTask {
            task_id: TaskId(task_id),
            handle: Arc::clone(&handle),
        });
        (self, handle)
    }
}

impl PhysicalOperator for MockOperator {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, _ctx: &OperatorContext) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn add_input(&mut self, bundle: Bundle, input_index: usize) -> Result<(), ExecutionError> {
        if let Some(message) = self.panic_on_input {
            panic!("{message}");
        }
        self.log.lock().unwrap().inputs.push((input_index, bundle));
        Ok(())
    }

    fn input_done(&mut self, input_index: usize) -> Result<(), ExecutionError> {
        self.log.lock().unwrap().input_done.push(input_index);
        Ok(())
    }

    fn all_inputs_done(&mut self) -> Result<(), ExecutionError> {
        self.log.lock().unwrap().all_inputs_done += 1;
        Ok(())
    }

    fn has_next(&self) -> bool {
        !self.outputs.is_empty()
    }

    fn get_next(&mut self) -> Option<Bundle> {
        self.outputs.pop_front()
    }

    fn get_active_tasks(&self) -> Vec<OpTask> {
        self.tasks.clone()
    }

    fn on_task_completed(&mut self, task_id: TaskId, outcome: TaskOutcome) -> Result<(), ExecutionError> {
        self.tasks.retain(|t| t.task_id != task_id);
        self.log.lock().unwrap().completions.push(task_id);
        let bundles = outcome.map_err(ExecutionError::task)?;
        self.outputs.extend(bundles);
        Ok(())
    }

    fn completed(&self) -> bool {
        self.completed
    }

    fn mark_execution_completed(&mut self) {
        self.completed = true;
        self.log.lock().unwrap().marked_completed += 1;
    }

    fn num_active_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn throttling_disabled(&self) -> bool {
        self.throttling_disabled
    }

    fn should_add_input(&self) -> bool {
        self.should_add_input
    }

    fn incremental_resource_usage(&self) -> ExecutionResources {
        self.incremental
    }

    fn min_resource_requirement(&self) -> ExecutionResources {
        self.min_requirement
    }

    fn current_processor_usage(&self) -> ExecutionResources {
        self.processor_usage
    }

    fn internal_queue_bytes(&self) -> u64 {
        self.internal_bytes
    }

    fn shutdown(&mut self) {
        self.log.lock().unwrap().shutdowns += 1;
    }
}
