//! Streaming executor -- drives one execution of a DAG to completion.
//!
//! Split into focused submodules:
//! - `core`: executor struct, constructor, state and accessor methods
//! - `execution`: topology setup and the driver thread's scheduling loop
//! - `output`: blocking output retrieval, cancellation and shutdown

mod core;
mod execution;
mod output;
#[cfg(test)]
mod tests;

pub use self::core::{ExecutorState, StreamingExecutor};
pub use self::output::OutputIter;
