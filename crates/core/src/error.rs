use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::resources::ResourceKind;

/// Boxed error returned by operator work (transforms, writes).
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("operator {0} appears more than once in the DAG; every operator must be unique")]
    DuplicateOperator(String),

    #[error("operator not found: {0}")]
    OperatorNotFound(String),

    #[error(
        "operator {operator} needs {required} {resource}, but the cluster only has {available}"
    )]
    InfeasibleResources {
        operator: String,
        resource: ResourceKind,
        required: f64,
        available: f64,
    },

    /// Error raised by operator work, carried as-is.
    #[error(transparent)]
    Task(Arc<dyn StdError + Send + Sync + 'static>),

    #[error("execution cancelled")]
    Cancelled,

    /// A panic on the driver thread, from an operator or a callback.
    #[error("driver panicked: {0}")]
    DriverPanicked(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl ExecutionError {
    pub fn task(err: impl Into<BoxError>) -> Self {
        ExecutionError::Task(Arc::from(err.into()))
    }

    /// The original task error, if this is a task failure of type `E`.
    pub fn downcast_task_error<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            ExecutionError::Task(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutionError::Cancelled)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
