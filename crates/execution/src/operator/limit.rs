use std::collections::VecDeque;

use sluice_core::{Block, Bundle, ExecutionError};
use tracing::debug;

use super::{OpTask, OperatorContext, OperatorId, PhysicalOperator};

/// Passes through at most `limit` rows, then completes on its own.
///
/// Completing early lets the executor stop every upstream operator whose
/// output is no longer needed.
pub struct LimitOperator {
    id: OperatorId,
    name: String,
    limit: usize,
    consumed: usize,
    outputs: VecDeque<Bundle>,
    buffered_bytes: u64,
    completed: bool,
}

impl LimitOperator {
    pub fn new(limit: usize) -> Self {
        Self {
            id: OperatorId::next(),
            name: format!("Limit[{limit}]"),
            limit,
            consumed: 0,
            outputs: VecDeque::new(),
            buffered_bytes: 0,
            completed: limit == 0,
        }
    }

    pub fn rows_consumed(&self) -> usize {
        self.consumed
    }

    fn emit(&mut self, bundle: Bundle) {
        self.buffered_bytes += bundle.size_bytes();
        self.outputs.push_back(bundle);
    }
}

/// First `n` rows of `bundle`, keeping block boundaries.
fn truncate(bundle: &Bundle, n: usize) -> Bundle {
    let mut remaining = n;
    let mut blocks = Vec::new();
    for block in bundle.blocks() {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(block.num_rows());
        blocks.push(Block::new(block.rows()[..take].to_vec()));
        remaining -= take;
    }
    Bundle::new(blocks)
}

impl PhysicalOperator for LimitOperator {
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
        if self.consumed >= self.limit {
            return Ok(());
        }
        let remaining = self.limit - self.consumed;
        if bundle.num_rows() <= remaining {
            self.consumed += bundle.num_rows();
            self.emit(bundle);
        } else {
            self.consumed = self.limit;
            self.emit(truncate(&bundle, remaining));
        }
        if self.consumed >= self.limit {
            debug!(operator = %self.name, "Limit reached");
            self.completed = true;
        }
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

    /// Outputs already produced are kept: they are the rows the limit
    /// lets through.
    fn mark_execution_completed(&mut self) {
        self.completed = true;
    }

    fn throttling_disabled(&self) -> bool {
        true
    }

    fn internal_queue_bytes(&self) -> u64 {
        self.buffered_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testing::{int_bundle, ints};

    #[test]
    fn truncates_the_crossing_bundle() {
        let mut op = LimitOperator::new(3);
        op.add_input(int_bundle(1), 0).unwrap();
        assert!(!op.completed());
        op.add_input(
            Bundle::new(vec![
                Block::new(vec![json!(2)]),
                Block::new(vec![json!(3), json!(4)]),
            ]),
            0,
        )
        .unwrap();
        assert!(op.completed());
        assert_eq!(op.rows_consumed(), 3);

        let out: Vec<_> = std::iter::from_fn(|| op.get_next()).collect();
        assert_eq!(out.len(), 2);
        assert_eq!(ints(&out[1]), vec![2, 3]);
        assert_eq!(out[1].num_blocks(), 2);

        op.add_input(int_bundle(5), 0).unwrap();
        assert!(!op.has_next());
    }

    #[test]
    fn zero_limit_starts_completed() {
        let op = LimitOperator::new(0);
        assert!(op.completed());
        assert_eq!(op.name(), "Limit[0]");
    }
}
