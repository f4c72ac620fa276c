use std::collections::VecDeque;

use sluice_core::{Bundle, ExecutionError};

use super::{OpTask, OperatorContext, OperatorId, PhysicalOperator};

/// Source operator over an in-memory list of bundles.
///
/// All bundles are available as outputs as soon as the operator starts.
pub struct InputDataBuffer {
    id: OperatorId,
    name: String,
    pending: Vec<Bundle>,
    outputs: VecDeque<Bundle>,
    buffered_bytes: u64,
    completed: bool,
}

impl InputDataBuffer {
    pub fn new(bundles: Vec<Bundle>) -> Self {
        Self::with_name("Input", bundles)
    }

    pub fn with_name(name: &str, bundles: Vec<Bundle>) -> Self {
        Self {
            id: OperatorId::next(),
            name: name.to_string(),
            pending: bundles,
            outputs: VecDeque::new(),
            buffered_bytes: 0,
            completed: false,
        }
    }
}

impl PhysicalOperator for InputDataBuffer {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, _ctx: &OperatorContext) -> Result<(), ExecutionError> {
        self.buffered_bytes = self.pending.iter().map(Bundle::size_bytes).sum();
        self.outputs.extend(self.pending.drain(..));
        Ok(())
    }

    fn add_input(&mut self, _bundle: Bundle, input_index: usize) -> Result<(), ExecutionError> {
        Err(ExecutionError::InvalidState(format!(
            "{} has no inputs, got a bundle on input {input_index}",
            self.name
        )))
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
