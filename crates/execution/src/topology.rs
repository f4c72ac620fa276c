//! Runtime wiring of one execution: an ordered map of per-operator state,
//! producers before consumers.

use std::fmt::Write as _;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use sluice_core::resources::format_bytes;
use sluice_core::{ExecutionError, ExecutionOptions};
use tracing::{debug, warn};

use crate::dag::{Dag, DagNode};
use crate::locality::PlacementSelector;
use crate::operator::{OperatorId, PhysicalOperator};
use crate::queue::OpBufferQueue;
use crate::resource_manager::ResourceManager;

/// Operators keyed by id, in post-order (every operator after its inputs).
pub type Topology = IndexMap<OperatorId, OpState>;

/// Outcome of the latest scheduling pass for one operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulingStatus {
    /// Not completed and has queued input.
    pub runnable: bool,
    /// Resource budget and operator admission allow a new task.
    pub under_resource_limits: bool,
    /// Reported as backpressured by the caller.
    pub backpressured: bool,
}

/// Execution state of one operator in a topology.
#[derive(Debug)]
pub struct OpState {
    pub(crate) operator: Box<dyn PhysicalOperator>,
    /// One queue per upstream, in input-index order. Each is the
    /// upstream's `outqueue`.
    pub(crate) inqueues: Vec<Arc<OpBufferQueue>>,
    pub(crate) outqueue: Arc<OpBufferQueue>,
    pub(crate) upstreams: Vec<OperatorId>,
    pub(crate) downstreams: Vec<OperatorId>,
    pub(crate) input_done_called: Vec<bool>,
    pub(crate) inputs_done_called: bool,
    pub(crate) status: SchedulingStatus,
    pub(crate) bundles_dispatched: u64,
    pub(crate) bundles_produced: u64,
    pub(crate) rows_produced: u64,
}

impl OpState {
    fn new(
        operator: Box<dyn PhysicalOperator>,
        inqueues: Vec<Arc<OpBufferQueue>>,
        upstreams: Vec<OperatorId>,
    ) -> Self {
        let num_inputs = inqueues.len();
        Self {
            operator,
            inqueues,
            outqueue: Arc::new(OpBufferQueue::new()),
            upstreams,
            downstreams: Vec::new(),
            input_done_called: vec![false; num_inputs],
            inputs_done_called: false,
            status: SchedulingStatus::default(),
            bundles_dispatched: 0,
            bundles_produced: 0,
            rows_produced: 0,
        }
    }

    pub fn id(&self) -> OperatorId {
        self.operator.id()
    }

    pub fn name(&self) -> &str {
        self.operator.name()
    }

    pub fn operator(&self) -> &dyn PhysicalOperator {
        self.operator.as_ref()
    }

    pub fn operator_mut(&mut self) -> &mut dyn PhysicalOperator {
        self.operator.as_mut()
    }

    pub fn inqueues(&self) -> &[Arc<OpBufferQueue>] {
        &self.inqueues
    }

    pub fn outqueue(&self) -> &Arc<OpBufferQueue> {
        &self.outqueue
    }

    pub fn upstreams(&self) -> &[OperatorId] {
        &self.upstreams
    }

    pub fn downstreams(&self) -> &[OperatorId] {
        &self.downstreams
    }

    pub fn status(&self) -> SchedulingStatus {
        self.status
    }

    /// Bundles waiting across all input queues.
    pub fn num_queued(&self) -> usize {
        self.inqueues.iter().map(|q| q.len()).sum()
    }

    pub fn has_pending_input(&self) -> bool {
        self.inqueues.iter().any(|q| !q.is_empty())
    }

    pub fn bundles_dispatched(&self) -> u64 {
        self.bundles_dispatched
    }

    pub fn bundles_produced(&self) -> u64 {
        self.bundles_produced
    }

    /// Hand the oldest bundle of the first non-empty input queue to the
    /// operator. Returns `false` if every input queue is empty.
    pub fn dispatch_next_task(&mut self) -> Result<bool, ExecutionError> {
        let next = self
            .inqueues
            .iter()
            .enumerate()
            .find_map(|(i, q)| q.pop(None).map(|bundle| (i, bundle)));
        let Some((input_index, bundle)) = next else {
            return Ok(false);
        };
        self.operator.add_input(bundle, input_index)?;
        self.bundles_dispatched += 1;
        Ok(true)
    }

    /// Move every ready output of the operator into its outqueue.
    pub(crate) fn drain_outputs(&mut self) -> usize {
        let mut moved = 0;
        while self.operator.has_next() {
            let Some(bundle) = self.operator.get_next() else { break };
            self.rows_produced += bundle.num_rows() as u64;
            self.outqueue.append(bundle);
            moved += 1;
        }
        self.bundles_produced += moved as u64;
        moved
    }
}

/// Wire the operators reachable from `root` into a [`Topology`].
///
/// Returns the topology and the number of progress indicators to show
/// (one, or one per operator with `verbose_progress`). Fails with
/// [`ExecutionError::DuplicateOperator`] if an operator is reachable along
/// more than one path.
pub fn build_streaming_topology(
    dag: Dag,
    root: OperatorId,
    options: &ExecutionOptions,
    current_node: &str,
) -> Result<(Topology, usize), ExecutionError> {
    let mut nodes = dag.nodes;
    let mut topology = Topology::new();
    visit(root, &mut nodes, &mut topology)?;

    for (id, node) in nodes {
        warn!(operator = %id, "Dropping {}: not reachable from the root operator", node.operator.name());
    }

    for state in topology.values_mut() {
        state.operator.set_placement(PlacementSelector::from_options(
            &options.locality_with_output,
            current_node,
        ));
    }

    let progress_bars = if options.verbose_progress {
        topology.len()
    } else {
        1
    };
    debug!(operators = topology.len(), progress_bars, "Built streaming topology");
    Ok((topology, progress_bars))
}

fn visit(
    id: OperatorId,
    nodes: &mut IndexMap<OperatorId, DagNode>,
    topology: &mut Topology,
) -> Result<Arc<OpBufferQueue>, ExecutionError> {
    if let Some(state) = topology.get(&id) {
        return Err(ExecutionError::DuplicateOperator(state.name().to_string()));
    }
    let node = nodes
        .shift_remove(&id)
        .ok_or_else(|| ExecutionError::OperatorNotFound(id.to_string()))?;

    let inqueues = node
        .inputs
        .iter()
        .map(|input| visit(*input, nodes, topology))
        .collect::<Result<Vec<_>, _>>()?;
    for upstream in &node.inputs {
        if let Some(state) = topology.get_mut(upstream) {
            state.downstreams.push(id);
        }
    }

    let state = OpState::new(node.operator, inqueues, node.inputs);
    let outqueue = Arc::clone(&state.outqueue);
    topology.insert(id, state);
    Ok(outqueue)
}

/// Render one line per operator and log it at debug level.
pub fn debug_dump_topology(topology: &Topology, resource_manager: &ResourceManager) -> String {
    let mut dump = String::new();
    for (i, (id, state)) in topology.iter().enumerate() {
        let _ = writeln!(
            dump,
            "{i}: {}: {} queued, {} active, outqueue {} ({}), usage [{}]{}",
            state.name(),
            state.num_queued(),
            state.operator.num_active_tasks(),
            state.outqueue.len(),
            format_bytes(state.outqueue.memory_usage() as f64),
            resource_manager.get_op_usage(*id),
            if state.operator.completed() { ", completed" } else { "" },
        );
    }
    debug!("Execution progress:\n{}", dump);
    dump
}
