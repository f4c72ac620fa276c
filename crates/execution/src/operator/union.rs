use std::collections::VecDeque;

use sluice_core::{Bundle, ExecutionError};

use super::{OpTask, OperatorContext, OperatorId, PhysicalOperator};

/// Concatenates several inputs into one stream.
///
/// Without `preserve_order` bundles pass straight through in arrival
/// order. With it, input 0 is emitted in full, then input 1, and so on;
/// later inputs are buffered until every earlier input is done.
pub struct UnionOperator {
    id: OperatorId,
    name: String,
    num_inputs: usize,
    preserve_order: bool,
    /// Per-input buffers, only used with `preserve_order`.
    buffers: Vec<VecDeque<Bundle>>,
    done: Vec<bool>,
    /// Input currently being emitted.
    cursor: usize,
    outputs: VecDeque<Bundle>,
    buffered_bytes: u64,
    completed: bool,
}

impl UnionOperator {
    pub fn new(num_inputs: usize) -> Self {
        Self {
            id: OperatorId::next(),
            name: "Union".to_string(),
            num_inputs,
            preserve_order: false,
            buffers: (0..num_inputs).map(|_| VecDeque::new()).collect(),
            done: vec![false; num_inputs],
            cursor: 0,
            outputs: VecDeque::new(),
            buffered_bytes: 0,
            completed: false,
        }
    }

    fn check_index(&self, input_index: usize) -> Result<(), ExecutionError> {
        if input_index >= self.num_inputs {
            return Err(ExecutionError::InvalidState(format!(
                "{} has {} inputs, got input {input_index}",
                self.name, self.num_inputs
            )));
        }
        Ok(())
    }

    /// Move everything that may be emitted now into the output buffer.
    fn advance(&mut self) {
        while self.cursor < self.num_inputs {
            self.outputs.extend(self.buffers[self.cursor].drain(..));
            if !self.done[self.cursor] {
                break;
            }
            self.cursor += 1;
        }
    }
}

impl PhysicalOperator for UnionOperator {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, ctx: &OperatorContext) -> Result<(), ExecutionError> {
        self.preserve_order = ctx.options.preserve_order;
        Ok(())
    }

    fn add_input(&mut self, bundle: Bundle, input_index: usize) -> Result<(), ExecutionError> {
        self.check_index(input_index)?;
        if self.completed {
            return Ok(());
        }
        self.buffered_bytes += bundle.size_bytes();
        if self.preserve_order {
            self.buffers[input_index].push_back(bundle);
            self.advance();
        } else {
            self.outputs.push_back(bundle);
        }
        Ok(())
    }

    fn input_done(&mut self, input_index: usize) -> Result<(), ExecutionError> {
        self.check_index(input_index)?;
        self.done[input_index] = true;
        if self.preserve_order {
            self.advance();
        }
        Ok(())
    }

    fn all_inputs_done(&mut self) -> Result<(), ExecutionError> {
        self.done.iter_mut().for_each(|d| *d = true);
        self.advance();
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
        self.buffers.iter_mut().for_each(VecDeque::clear);
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
