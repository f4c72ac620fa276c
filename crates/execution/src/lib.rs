pub mod callback;
pub mod dag;
pub mod executor;
pub mod locality;
pub mod metrics;
pub mod operator;
pub mod progress;
pub mod queue;
pub mod resource_manager;
pub mod scheduler;
pub mod substrate;
pub mod topology;

#[cfg(test)]
mod testing;

pub use callback::{ExecutionCallback, ExecutionContext, ExecutorView};
pub use dag::Dag;
pub use executor::{ExecutorState, OutputIter, StreamingExecutor};
pub use metrics::{ExecutorStats, OperatorStats};
pub use operator::{
    ComputeStrategy, InputDataBuffer, LimitOperator, MapOperator, OperatorContext, OperatorId,
    OutputSplitter, PhysicalOperator, SinkOperator, UnionOperator,
};
pub use queue::OpBufferQueue;
pub use resource_manager::ResourceManager;
pub use scheduler::{Autoscaler, NoopAutoscaler};
pub use substrate::{LocalSubstrate, PlacementHint, TaskSubstrate};
pub use topology::{OpState, SchedulingStatus, Topology};
