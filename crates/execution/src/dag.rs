use indexmap::IndexMap;
use sluice_core::ExecutionError;

use crate::operator::{OperatorId, PhysicalOperator};

pub(crate) struct DagNode {
    pub(crate) operator: Box<dyn PhysicalOperator>,
    pub(crate) inputs: Vec<OperatorId>,
}

/// Logical wiring of operators, built bottom-up: an operator can only
/// take inputs that were added before it.
#[derive(Default)]
pub struct Dag {
    pub(crate) nodes: IndexMap<OperatorId, DagNode>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `operator` fed by `inputs` (in input-index order).
    pub fn add_operator(
        &mut self,
        operator: Box<dyn PhysicalOperator>,
        inputs: &[OperatorId],
    ) -> Result<OperatorId, ExecutionError> {
        let id = operator.id();
        if self.nodes.contains_key(&id) {
            return Err(ExecutionError::DuplicateOperator(operator.name().to_string()));
        }
        if let Some(missing) = inputs.iter().find(|input| !self.nodes.contains_key(*input)) {
            return Err(ExecutionError::OperatorNotFound(missing.to_string()));
        }
        self.nodes.insert(
            id,
            DagNode {
                operator,
                inputs: inputs.to_vec(),
            },
        );
        Ok(id)
    }

    /// Convenience wrapper around [`add_operator`](Self::add_operator).
    pub fn add<O: PhysicalOperator + 'static>(
        &mut self,
        operator: O,
        inputs: &[OperatorId],
    ) -> Result<OperatorId, ExecutionError> {
        self.add_operator(Box::new(operator), inputs)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: OperatorId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn inputs_of(&self, id: OperatorId) -> Option<&[OperatorId]> {
        self.nodes.get(&id).map(|node| node.inputs.as_slice())
    }

    pub fn name_of(&self, id: OperatorId) -> Option<&str> {
        self.nodes.get(&id).map(|node| node.operator.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{InputDataBuffer, OperatorId};
    use crate::testing::MockOperator;

    #[test]
    fn wires_inputs_in_order() {
        let mut dag = Dag::new();
        let a = dag.add(InputDataBuffer::new(vec![]), &[]).unwrap();
        let b = dag.add(InputDataBuffer::new(vec![]), &[]).unwrap();
        let c = dag.add(MockOperator::new("Join"), &[b, a]).unwrap();
        assert_eq!(dag.len(), 3);
        assert_eq!(dag.inputs_of(c), Some(&[b, a][..]));
        assert_eq!(dag.name_of(c), Some("Join"));
    }

    #[test]
    fn rejects_unknown_input() {
        let mut dag = Dag::new();
        let ghost = OperatorId::next();
        let err = dag.add(MockOperator::new("Orphan"), &[ghost]).unwrap_err();
        assert!(matches!(err, ExecutionError::OperatorNotFound(ref id) if *id == ghost.to_string()));
        assert!(dag.is_empty());
    }
}
