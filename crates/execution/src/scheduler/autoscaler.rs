use tracing::trace;

use crate::resource_manager::ResourceManager;
use crate::topology::Topology;

/// Hook consulted when operators have work but the budget blocks all of
/// them. Implementations may request more capacity; they never change the
/// current scheduling decision.
pub trait Autoscaler: Send + Sync {
    fn try_trigger_scaling(&self, topology: &Topology, resource_manager: &ResourceManager);
}

/// Autoscaler that never scales.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAutoscaler;

impl Autoscaler for NoopAutoscaler {
    fn try_trigger_scaling(&self, topology: &Topology, resource_manager: &ResourceManager) {
        trace!(
            operators = topology.len(),
            usage = %resource_manager.get_global_usage(),
            "Scaling requested, ignoring"
        );
    }
}
