use serde::{Deserialize, Serialize};

use crate::resources::ResourceLimits;

/// Where output-producing tasks should be placed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLocality {
    /// No placement preference.
    #[default]
    Disabled,
    /// Pin every operator's tasks to the node running the executor.
    CurrentNode,
    /// Rotate task placement across the listed nodes.
    Nodes(Vec<String>),
}

/// Immutable configuration of one execution run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// One progress indicator per operator instead of a single aggregate one.
    #[serde(default)]
    pub verbose_progress: bool,
    #[serde(default)]
    pub locality_with_output: OutputLocality,
    /// Overrides for the global limits. Unset entries default to the
    /// cluster totals.
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    /// Resources reserved for other work, subtracted from cluster totals.
    #[serde(default)]
    pub exclude_resources: ResourceLimits,
    /// Emit operator outputs in input order rather than completion order.
    #[serde(default)]
    pub preserve_order: bool,
}

impl ExecutionOptions {
    pub fn with_verbose_progress(mut self, verbose: bool) -> Self {
        self.verbose_progress = verbose;
        self
    }

    pub fn with_locality(mut self, locality: OutputLocality) -> Self {
        self.locality_with_output = locality;
        self
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    pub fn with_preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }
}
