use std::collections::HashMap;

use sluice_core::{ExecutionError, ExecutionOptions, ExecutionResources};
use tracing::{debug, info};

use crate::operator::{OperatorId, PhysicalOperator};
use crate::topology::Topology;

/// Share of the cluster's object store memory usable by one execution when
/// no explicit limit is configured.
pub const DEFAULT_OBJECT_STORE_MEMORY_LIMIT_FRACTION: f64 = 0.25;

/// Tracks global limits and per-operator usage for one execution.
///
/// Usage is a snapshot refreshed by [`update_usages`](Self::update_usages)
/// once per scheduling iteration, so every decision within an iteration
/// sees the same numbers.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    global_limits: ExecutionResources,
    global_usage: ExecutionResources,
    op_usages: HashMap<OperatorId, ExecutionResources>,
}

impl ResourceManager {
    pub fn new(options: &ExecutionOptions, cluster: ExecutionResources) -> Self {
        let defaults = ExecutionResources::new(
            cluster.cpu,
            cluster.gpu,
            cluster.object_store_memory * DEFAULT_OBJECT_STORE_MEMORY_LIMIT_FRACTION,
        )
        .subtract(&options.exclude_resources.as_exclusion());
        let overrides = &options.resource_limits;
        let global_limits = ExecutionResources::new(
            overrides.cpu.unwrap_or(defaults.cpu),
            overrides.gpu.unwrap_or(defaults.gpu),
            overrides.object_store_memory.unwrap_or(defaults.object_store_memory),
        );
        info!("Execution resource limits: {}", global_limits);
        Self {
            global_limits,
            global_usage: ExecutionResources::zero(),
            op_usages: HashMap::new(),
        }
    }

    /// Recompute per-operator and global usage from the topology.
    ///
    /// An operator's usage is the CPU/GPU of its active tasks plus the
    /// memory of bundles buffered inside it and in its outqueue.
    pub fn update_usages(&mut self, topology: &Topology) {
        self.op_usages.clear();
        let mut global = ExecutionResources::zero();
        for (id, state) in topology {
            let op = state.operator();
            let memory = op.internal_queue_bytes() + state.outqueue().memory_usage();
            let usage = op
                .current_processor_usage()
                .add(&ExecutionResources::memory(memory as f64));
            global = global.add(&usage);
            self.op_usages.insert(*id, usage);
        }
        self.global_usage = global;
    }

    pub fn get_global_limits(&self) -> ExecutionResources {
        self.global_limits
    }

    pub fn get_global_usage(&self) -> ExecutionResources {
        self.global_usage
    }

    /// Usage of one operator as of the last `update_usages`.
    pub fn get_op_usage(&self, id: OperatorId) -> ExecutionResources {
        self.op_usages.get(&id).copied().unwrap_or_default()
    }

    /// Whether `op` may launch one more task within the global limits.
    pub fn can_submit_new_task(&self, op: &dyn PhysicalOperator) -> bool {
        if op.throttling_disabled() {
            return true;
        }
        self.global_usage
            .add(&op.incremental_resource_usage())
            .satisfies_limit(&self.global_limits)
    }
}

/// Reject a topology containing an operator that could never run under
/// `limits`.
pub fn validate_dag(topology: &Topology, limits: &ExecutionResources) -> Result<(), ExecutionError> {
    for state in topology.values() {
        let required = state.operator().min_resource_requirement();
        if let Some(resource) = required.first_exceeded(limits) {
            return Err(ExecutionError::InfeasibleResources {
                operator: state.name().to_string(),
                resource,
                required: required.get(resource),
                available: limits.get(resource),
            });
        }
    }
    debug!(operators = topology.len(), "Resource requirements validated");
    Ok(())
}
