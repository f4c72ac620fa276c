use std::cmp::Ordering;

use tracing::trace;

use super::autoscaler::Autoscaler;
use crate::operator::OperatorId;
use crate::resource_manager::ResourceManager;
use crate::topology::{SchedulingStatus, Topology};

/// Pick the operator that should receive the next input bundle.
///
/// Candidates are operators that are not completed and have queued input.
/// They are filtered by the resource budget and operator admission, except
/// in deadlock-avoidance mode (`ensure_at_least_one_running` with no task
/// in flight anywhere), where the filter is skipped so the run can always
/// progress. Among the survivors, operators with throttling disabled win;
/// otherwise the one with the lowest memory usage does, ties going to the
/// earliest operator in topology order.
///
/// Refreshes every operator's [`SchedulingStatus`]. `backpressured` is
/// informational only.
pub fn select_operator_to_run(
    topology: &mut Topology,
    resource_manager: &ResourceManager,
    backpressured: &[OperatorId],
    autoscaler: &dyn Autoscaler,
    ensure_at_least_one_running: bool,
) -> Option<OperatorId> {
    let mut candidates = Vec::new();
    for (index, (id, state)) in topology.iter_mut().enumerate() {
        let op = state.operator.as_ref();
        let runnable = !op.completed() && state.inqueues.iter().any(|q| !q.is_empty());
        let under_resource_limits = op.should_add_input() && resource_manager.can_submit_new_task(op);
        state.status = SchedulingStatus {
            runnable,
            under_resource_limits,
            backpressured: backpressured.contains(id),
        };
        if runnable {
            candidates.push((index, *id));
        }
    }
    if candidates.is_empty() {
        return None;
    }

    let nothing_running = topology
        .values()
        .all(|state| state.operator.num_active_tasks() == 0);
    let eligible: Vec<(usize, OperatorId)> = if ensure_at_least_one_running && nothing_running {
        trace!("No task in flight, ignoring resource limits");
        candidates
    } else {
        candidates
            .into_iter()
            .filter(|(_, id)| topology[id].status.under_resource_limits)
            .collect()
    };
    if eligible.is_empty() {
        autoscaler.try_trigger_scaling(topology, resource_manager);
        return None;
    }

    if let Some((_, id)) = eligible
        .iter()
        .find(|(_, id)| topology[id].operator.throttling_disabled())
    {
        return Some(*id);
    }

    eligible
        .into_iter()
        .min_by(|(ia, a), (ib, b)| {
            let ma = resource_manager.get_op_usage(*a).object_store_memory;
            let mb = resource_manager.get_op_usage(*b).object_store_memory;
            ma.partial_cmp(&mb).unwrap_or(Ordering::Equal).then(ia.cmp(ib))
        })
        .map(|(_, id)| id)
}
