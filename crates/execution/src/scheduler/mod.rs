//! Per-iteration scheduling: completion processing, state transitions and
//! operator selection.

pub mod autoscaler;
pub mod completion;
pub mod select;

pub use autoscaler::{Autoscaler, NoopAutoscaler};
pub use completion::{process_completed_tasks, update_operator_states};
pub use select::select_operator_to_run;
