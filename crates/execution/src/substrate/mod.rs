//! Interface to the task-execution substrate.
//!
//! Operators never run their work inline: they hand closures to a
//! [`TaskSubstrate`], keep the returned [`TaskRef`] and let the completion
//! processor poll it. The substrate owns parallelism, placement and retries.

pub mod local;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sluice_core::{BoxError, Bundle, ExecutionResources};

pub use local::LocalSubstrate;

/// What a finished task hands back: produced bundles in substrate order,
/// or the error raised by the operator's work.
pub type TaskOutcome = Result<Vec<Bundle>, BoxError>;

/// A unit of operator work.
pub type TaskWork = Box<dyn FnOnce() -> TaskOutcome + Send + 'static>;

/// Placement preference attached to a submitted task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum PlacementHint {
    /// Let the substrate decide.
    #[default]
    Default,
    /// Spread tasks across nodes.
    Spread,
    /// Prefer the named node.
    Node(String),
}

impl fmt::Display for PlacementHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementHint::Default => write!(f, "default"),
            PlacementHint::Spread => write!(f, "spread"),
            PlacementHint::Node(node) => write!(f, "node:{node}"),
        }
    }
}

/// Completion slot shared between the substrate and the submitting operator.
#[derive(Default)]
pub struct TaskSlot {
    done: AtomicBool,
    outcome: Mutex<Option<TaskOutcome>>,
}

/// Handle to a submitted task.
pub type TaskRef = Arc<TaskSlot>;

impl TaskSlot {
    pub fn new() -> TaskRef {
        Arc::new(Self::default())
    }

    /// Store the task's outcome. Called once by the substrate.
    pub fn complete(&self, outcome: TaskOutcome) {
        let mut slot = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(outcome);
        self.done.store(true, Ordering::Release);
    }

    /// Non-blocking: has the task finished?
    pub fn is_ready(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Take the outcome of a finished task. Returns `None` before the task
    /// finishes and on every call after the first successful one.
    pub fn take_outcome(&self) -> Option<TaskOutcome> {
        if !self.is_ready() {
            return None;
        }
        self.outcome.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl fmt::Debug for TaskSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSlot")
            .field("done", &self.is_ready())
            .finish()
    }
}

/// The distributed (or local) runtime that executes operator tasks.
pub trait TaskSubstrate: Send + Sync {
    /// Submit work for asynchronous execution. Must not block on the work.
    fn submit(&self, work: TaskWork, placement: &PlacementHint) -> TaskRef;

    /// Total resources of the cluster.
    fn cluster_resources(&self) -> ExecutionResources;

    /// Identifier of the node the executor runs on.
    fn current_node_id(&self) -> String;
}
