use std::collections::HashSet;

use sluice_core::ExecutionError;
use tracing::debug;

use crate::operator::OperatorId;
use crate::resource_manager::ResourceManager;
use crate::topology::Topology;

/// Collect finished tasks, move operator outputs into outqueues and deliver
/// input-done notifications.
///
/// Never blocks: only tasks whose handle is already ready are handled, at
/// most `iteration_budget` of them (0 means no cap). Each outcome goes to
/// the owning operator's completion callback exactly once. A task error is
/// returned as-is and stops processing.
///
/// Refreshes the resource manager's usage snapshot before returning.
pub fn process_completed_tasks(
    topology: &mut Topology,
    resource_manager: &mut ResourceManager,
    iteration_budget: usize,
) -> Result<usize, ExecutionError> {
    let mut handled = 0;
    'operators: for state in topology.values_mut() {
        for task in state.operator.get_active_tasks() {
            if iteration_budget > 0 && handled >= iteration_budget {
                break 'operators;
            }
            if !task.handle.is_ready() {
                continue;
            }
            let Some(outcome) = task.handle.take_outcome() else {
                continue;
            };
            state.operator.on_task_completed(task.task_id, outcome)?;
            handled += 1;
        }
    }

    for state in topology.values_mut() {
        state.drain_outputs();
    }

    deliver_inputs_done(topology)?;
    resource_manager.update_usages(topology);
    Ok(handled)
}

/// Call `input_done(i)` once upstream `i` is completed and its queue is
/// drained, then `all_inputs_done()` once every input is done.
fn deliver_inputs_done(topology: &mut Topology) -> Result<(), ExecutionError> {
    let completed: HashSet<OperatorId> = topology
        .iter()
        .filter(|(_, state)| state.operator.completed())
        .map(|(id, _)| *id)
        .collect();

    for state in topology.values_mut() {
        for i in 0..state.upstreams.len() {
            if state.input_done_called[i]
                || !completed.contains(&state.upstreams[i])
                || !state.inqueues[i].is_empty()
            {
                continue;
            }
            state.operator.input_done(i)?;
            state.input_done_called[i] = true;
        }
        if !state.inputs_done_called && state.input_done_called.iter().all(|done| *done) {
            debug!(operator = %state.name(), "All inputs done");
            state.operator.all_inputs_done()?;
            state.inputs_done_called = true;
        }
    }
    Ok(())
}

/// Advance operator completion. Returns how many operators completed.
///
/// Forward pass, in topology order: an operator completes once it has no
/// active tasks, no ready outputs, no queued input, has been told all its
/// inputs are done, and every upstream is completed.
///
/// Backward pass, in reverse order: an operator whose consumers have all
/// completed is no longer needed. It is completed too and its outqueue
/// dropped, which lets a satisfied limit stop everything upstream of it.
pub fn update_operator_states(topology: &mut Topology) -> usize {
    let ids: Vec<OperatorId> = topology.keys().copied().collect();
    let mut newly_completed = 0;

    for id in &ids {
        let state = &topology[id];
        let op = state.operator();
        let done = !op.completed()
            && op.num_active_tasks() == 0
            && !op.has_next()
            && !state.has_pending_input()
            && state.inputs_done_called
            && state
                .upstreams
                .iter()
                .all(|up| topology.get(up).is_some_and(|u| u.operator.completed()));
        if done {
            if let Some(state) = topology.get_mut(id) {
                debug!(operator = %state.name(), "Operator completed");
                state.operator.mark_execution_completed();
                newly_completed += 1;
            }
        }
    }

    for id in ids.iter().rev() {
        let state = &topology[id];
        let unneeded = !state.downstreams.is_empty()
            && state
                .downstreams
                .iter()
                .all(|down| topology.get(down).is_some_and(|d| d.operator.completed()));
        if !unneeded {
            continue;
        }
        let was_completed = state.operator.completed();
        if let Some(state) = topology.get_mut(id) {
            if !was_completed {
                debug!(operator = %state.name(), "Consumers finished, completing early");
                state.operator.mark_execution_completed();
                newly_completed += 1;
            }
            state.outqueue.clear();
        }
    }
    newly_completed
}
