use std::sync::Arc;

use sluice_core::{Block, BoxError, Bundle, ExecutionError, ExecutionResources};
use tracing::debug;

use super::task_pool::TaskPool;
use super::{OpTask, OperatorContext, OperatorId, PhysicalOperator, TaskId};
use crate::locality::PlacementSelector;
use crate::substrate::{PlacementHint, TaskOutcome};

/// Per-block transform run inside a task.
pub type BlockTransform = Arc<dyn Fn(&Block) -> Result<Block, BoxError> + Send + Sync>;

/// How a map operator runs its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeStrategy {
    /// One stateless task per input bundle, optionally capped.
    Tasks { max_concurrency: Option<usize> },
    /// A pool of long-lived workers: `min_size` slots are reserved up
    /// front, at most `max_size` tasks run at once.
    Pool { min_size: usize, max_size: usize },
}

impl Default for ComputeStrategy {
    fn default() -> Self {
        ComputeStrategy::Tasks {
            max_concurrency: None,
        }
    }
}

impl ComputeStrategy {
    fn default_placement(&self) -> PlacementHint {
        match self {
            ComputeStrategy::Tasks { .. } => PlacementHint::Default,
            ComputeStrategy::Pool { .. } => PlacementHint::Spread,
        }
    }
}

/// Applies a [`BlockTransform`] to every block of every input bundle, one
/// task per bundle. Each task produces one output bundle.
pub struct MapOperator {
    id: OperatorId,
    name: String,
    transform: BlockTransform,
    strategy: ComputeStrategy,
    tasks: TaskPool,
    inputs_done: bool,
    completed: bool,
}

impl MapOperator {
    pub fn new<F>(name: &str, transform: F) -> Self
    where
        F: Fn(&Block) -> Result<Block, BoxError> + Send + Sync + 'static,
    {
        let name = format!("Map({name})");
        let strategy = ComputeStrategy::default();
        let tasks = TaskPool::new(&name, ExecutionResources::cpu(1.0), strategy.default_placement());
        Self {
            id: OperatorId::next(),
            name,
            transform: Arc::new(transform),
            strategy,
            tasks,
            inputs_done: false,
            completed: false,
        }
    }

    /// Per-row transform, applied to each row of each block.
    pub fn map_rows<F>(name: &str, f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<serde_json::Value, BoxError> + Send + Sync + 'static,
    {
        Self::new(name, move |block: &Block| {
            let rows = block.rows().iter().map(&f).collect::<Result<Vec<_>, _>>()?;
            Ok(Block::new(rows))
        })
    }

    pub fn with_strategy(mut self, strategy: ComputeStrategy) -> Self {
        self.strategy = strategy;
        self.tasks = TaskPool::new(&self.name, self.tasks.per_task(), strategy.default_placement());
        self
    }

    /// Resources each task holds while running (default: one CPU).
    pub fn with_resources(mut self, per_task: ExecutionResources) -> Self {
        self.tasks = TaskPool::new(&self.name, per_task, self.strategy.default_placement());
        self
    }

    pub fn strategy(&self) -> ComputeStrategy {
        self.strategy
    }

    pub fn num_tasks_submitted(&self) -> u64 {
        self.tasks.num_submitted()
    }
}

impl PhysicalOperator for MapOperator {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, ctx: &OperatorContext) -> Result<(), ExecutionError> {
        self.tasks.start(ctx);
        Ok(())
    }

    fn add_input(&mut self, bundle: Bundle, _input_index: usize) -> Result<(), ExecutionError> {
        if self.completed {
            debug!(operator = %self.name, bundle = %bundle.id(), "Dropping input after completion");
            return Ok(());
        }
        let transform = Arc::clone(&self.transform);
        self.tasks.submit(Box::new(move || -> TaskOutcome {
            let blocks = bundle
                .blocks()
                .iter()
                .map(|block| transform(block))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(vec![Bundle::new(blocks)])
        }))?;
        Ok(())
    }

    fn all_inputs_done(&mut self) -> Result<(), ExecutionError> {
        self.inputs_done = true;
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.tasks.has_output()
    }

    fn get_next(&mut self) -> Option<Bundle> {
        self.tasks.pop_output()
    }

    fn get_active_tasks(&self) -> Vec<OpTask> {
        self.tasks.active_tasks()
    }

    fn on_task_completed(&mut self, task_id: TaskId, outcome: TaskOutcome) -> Result<(), ExecutionError> {
        self.tasks.finish(task_id)?;
        let bundles = outcome.map_err(ExecutionError::task)?;
        if !self.completed {
            self.tasks.push_outputs(task_id, bundles);
        }
        Ok(())
    }

    fn completed(&self) -> bool {
        self.completed
    }

    fn mark_execution_completed(&mut self) {
        self.completed = true;
        self.tasks.abandon();
    }

    fn num_active_tasks(&self) -> usize {
        self.tasks.num_active()
    }

    fn should_add_input(&self) -> bool {
        let active = self.tasks.num_active();
        match self.strategy {
            ComputeStrategy::Tasks {
                max_concurrency: Some(cap),
            } => active < cap,
            ComputeStrategy::Tasks {
                max_concurrency: None,
            } => true,
            ComputeStrategy::Pool { max_size, .. } => active < max_size,
        }
    }

    fn incremental_resource_usage(&self) -> ExecutionResources {
        match self.strategy {
            // Reserved pool slots are already counted in processor usage.
            ComputeStrategy::Pool { min_size, .. } if self.tasks.num_active() < min_size => {
                ExecutionResources::zero()
            }
            _ => self.tasks.per_task(),
        }
    }

    fn min_resource_requirement(&self) -> ExecutionResources {
        match self.strategy {
            ComputeStrategy::Tasks { .. } => self.tasks.per_task(),
            ComputeStrategy::Pool { min_size, .. } => self.tasks.per_task().scale(min_size as f64),
        }
    }

    fn current_processor_usage(&self) -> ExecutionResources {
        let active = self.tasks.num_active();
        let slots = match self.strategy {
            ComputeStrategy::Pool { min_size, .. } if !self.completed => active.max(min_size),
            _ => active,
        };
        self.tasks.per_task().scale(slots as f64)
    }

    fn internal_queue_bytes(&self) -> u64 {
        self.tasks.buffered_bytes()
    }

    fn set_placement(&mut self, selector: PlacementSelector) {
        self.tasks.set_placement(selector);
    }

    fn next_placement(&self) -> PlacementHint {
        self.tasks.next_placement()
    }

    fn shutdown(&mut self) {
        self.tasks.abandon();
    }
}
