use std::fmt;

use serde::{Deserialize, Serialize};

/// Names of the three tracked resources, used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Cpu,
    Gpu,
    ObjectStoreMemory,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Cpu => write!(f, "CPU"),
            ResourceKind::Gpu => write!(f, "GPU"),
            ResourceKind::ObjectStoreMemory => write!(f, "object store memory"),
        }
    }
}

/// A (cpu, gpu, object store memory) triple.
///
/// Used both as a limit and as a usage snapshot. `f64::INFINITY` stands for
/// "unbounded"; memory is measured in bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionResources {
    pub cpu: f64,
    pub gpu: f64,
    pub object_store_memory: f64,
}

impl ExecutionResources {
    pub fn new(cpu: f64, gpu: f64, object_store_memory: f64) -> Self {
        Self {
            cpu: cpu.max(0.0),
            gpu: gpu.max(0.0),
            object_store_memory: object_store_memory.max(0.0),
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn unbounded() -> Self {
        Self::new(f64::INFINITY, f64::INFINITY, f64::INFINITY)
    }

    /// Limits where every unset resource is unbounded.
    pub fn for_limits(cpu: Option<f64>, gpu: Option<f64>, object_store_memory: Option<f64>) -> Self {
        Self::new(
            cpu.unwrap_or(f64::INFINITY),
            gpu.unwrap_or(f64::INFINITY),
            object_store_memory.unwrap_or(f64::INFINITY),
        )
    }

    pub fn cpu(cpu: f64) -> Self {
        Self::new(cpu, 0.0, 0.0)
    }

    pub fn gpu(gpu: f64) -> Self {
        Self::new(0.0, gpu, 0.0)
    }

    pub fn memory(bytes: f64) -> Self {
        Self::new(0.0, 0.0, bytes)
    }

    pub fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Gpu => self.gpu,
            ResourceKind::ObjectStoreMemory => self.object_store_memory,
        }
    }

    pub fn add(&self, other: &ExecutionResources) -> Self {
        Self::new(
            self.cpu + other.cpu,
            self.gpu + other.gpu,
            self.object_store_memory + other.object_store_memory,
        )
    }

    /// Pointwise subtraction, saturating at zero.
    pub fn subtract(&self, other: &ExecutionResources) -> Self {
        Self::new(
            self.cpu - other.cpu,
            self.gpu - other.gpu,
            self.object_store_memory - other.object_store_memory,
        )
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self::new(
            self.cpu * factor,
            self.gpu * factor,
            self.object_store_memory * factor,
        )
    }

    /// Pointwise minimum.
    pub fn min(&self, other: &ExecutionResources) -> Self {
        Self::new(
            self.cpu.min(other.cpu),
            self.gpu.min(other.gpu),
            self.object_store_memory.min(other.object_store_memory),
        )
    }

    /// Whether every component fits within `limit`.
    pub fn satisfies_limit(&self, limit: &ExecutionResources) -> bool {
        self.first_exceeded(limit).is_none()
    }

    /// The first resource (cpu, gpu, memory order) exceeding `limit`.
    pub fn first_exceeded(&self, limit: &ExecutionResources) -> Option<ResourceKind> {
        [ResourceKind::Cpu, ResourceKind::Gpu, ResourceKind::ObjectStoreMemory]
            .into_iter()
            .find(|kind| self.get(*kind) > limit.get(*kind))
    }

    pub fn is_zero(&self) -> bool {
        self.cpu == 0.0 && self.gpu == 0.0 && self.object_store_memory == 0.0
    }
}

impl Default for ExecutionResources {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for ExecutionResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={}, gpu={}, object_store_memory={}",
            format_amount(self.cpu),
            format_amount(self.gpu),
            format_bytes(self.object_store_memory)
        )
    }
}

fn format_amount(v: f64) -> String {
    if v.is_infinite() {
        "inf".to_string()
    } else {
        format!("{v}")
    }
}

/// Human-readable byte count (`1.5MB`, `512B`, `inf`).
pub fn format_bytes(bytes: f64) -> String {
    if bytes.is_infinite() {
        return "inf".to_string();
    }
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", value as u64, UNITS[unit])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

/// Optional per-resource overrides, as they appear in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub gpu: Option<f64>,
    #[serde(default)]
    pub object_store_memory: Option<f64>,
}

impl ResourceLimits {
    /// Overrides as resources, with unset entries treated as zero.
    pub fn as_exclusion(&self) -> ExecutionResources {
        ExecutionResources::new(
            self.cpu.unwrap_or(0.0),
            self.gpu.unwrap_or(0.0),
            self.object_store_memory.unwrap_or(0.0),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.gpu.is_none() && self.object_store_memory.is_none()
    }
}
