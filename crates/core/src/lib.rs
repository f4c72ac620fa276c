pub mod bundle;
pub mod config;
pub mod error;
pub mod options;
pub mod resources;

pub use bundle::{make_bundles, Block, Bundle, BundleId};
pub use config::{EngineConfig, RuntimeConfig, SchedulerConfig};
pub use error::{BoxError, ConfigError, ExecutionError};
pub use options::{ExecutionOptions, OutputLocality};
pub use resources::{ExecutionResources, ResourceKind, ResourceLimits};
