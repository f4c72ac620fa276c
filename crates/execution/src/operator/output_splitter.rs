use std::collections::VecDeque;

use sluice_core::{Bundle, ExecutionError};

use super::{OpTask, OperatorContext, OperatorId, PhysicalOperator};

/// Tags bundles with partitions `0..n` round-robin so `n` consumers can
/// each pull their own split from the executor.
pub struct OutputSplitter {
    id: OperatorId,
    name: String,
    num_splits: usize,
    next_split: usize,
    outputs: VecDeque<Bundle>,
    buffered_bytes: u64,
    completed: bool,
}

impl OutputSplitter {
    pub fn new(num_splits: usize) -> Self {
        Self {
            id: OperatorId::next(),
            name: format!("Split[{num_splits}]"),
            num_splits: num_splits.max(1),
            next_split: 0,
            outputs: VecDeque::new(),
            buffered_bytes: 0,
            completed: false,
        }
    }

    pub fn num_splits(&self) -> usize {
        self.num_splits
    }
}

impl PhysicalOperator for OutputSplitter {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, _ctx: &OperatorContext) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn add_input(&mut self, bundle: Bundle, _input_index: usize) -> Result<(), ExecutionError> {
        let tagged = bundle.with_partition(self.next_split);
        self.next_split = (self.next_split + 1) % self.num_splits;
        self.buffered_bytes += tagged.size_bytes();
        self.outputs.push_back(tagged);
        Ok(())
    }

    fn all_inputs_done(&mut self) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn has_next(&self) -> bool {
        !self.outputs.is_empty()
    }

    fn get_next(&mut self) -> Option<Bundle> {
        let bundle = self.outputs.pop_front()?;
        self.buffered_bytes -= bundle.size_bytes();
        Some(bundle)
    }

    fn get_active_tasks(&self) -> Vec<OpTask> {
        Vec::new()
    }

    fn completed(&self) -> bool {
        self.completed
    }

    fn mark_execution_completed(&mut self) {
        self.completed = true;
        self.outputs.clear();
        self.buffered_bytes = 0;
    }

    fn throttling_disabled(&self) -> bool {
        true
    }

    fn internal_queue_bytes(&self) -> u64 {
        self.buffered_bytes
    }
}
