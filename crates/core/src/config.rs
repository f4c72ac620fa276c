use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::options::{ExecutionOptions, OutputLocality};
use crate::resources::ResourceLimits;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str) -> Option<T> {
    profiled_env_opt(profile, key).and_then(|v| v.parse().ok())
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("1") | Some("true") | Some("TRUE") | Some("yes") => true,
        Some("0") | Some("false") | Some("FALSE") | Some("no") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub execution: ExecutionOptions,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SLUICE_PROFILE`. When set (e.g. `BENCH`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SLUICE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            execution: execution_from_env_profiled(p),
            runtime: RuntimeConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.poll_interval_ms must be positive".into(),
            ));
        }
        if self.scheduler.output_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.output_poll_interval_ms must be positive".into(),
            ));
        }
        let limits = &self.execution.resource_limits;
        for (name, value) in [
            ("cpu", limits.cpu),
            ("gpu", limits.gpu),
            ("object_store_memory", limits.object_store_memory),
        ] {
            if let Some(v) = value {
                if v.is_nan() || v < 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "execution.resource_limits.{name} must be non-negative"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  execution:   verbose_progress={}, preserve_order={}, locality={:?}",
            self.execution.verbose_progress,
            self.execution.preserve_order,
            self.execution.locality_with_output
        );
        tracing::info!(
            "  limits:      cpu={:?}, gpu={:?}, object_store_memory={:?}",
            self.execution.resource_limits.cpu,
            self.execution.resource_limits.gpu,
            self.execution.resource_limits.object_store_memory
        );
        tracing::info!(
            "  runtime:     worker_threads={}, gpus={}, object_store_memory={}",
            self.runtime.resolved_worker_threads(),
            self.runtime.num_gpus,
            self.runtime.object_store_memory_bytes
        );
        tracing::info!(
            "  scheduler:   poll={}ms, output_poll={}ms, progress={}s, iteration_budget={}",
            self.scheduler.poll_interval_ms,
            self.scheduler.output_poll_interval_ms,
            self.scheduler.progress_interval_secs,
            self.scheduler.completion_iteration_budget
        );
    }
}

fn execution_from_env_profiled(p: &str) -> ExecutionOptions {
    let locality = match profiled_env_opt(p, "SLUICE_LOCALITY").as_deref() {
        None | Some("") | Some("disabled") | Some("none") => OutputLocality::Disabled,
        Some("current") | Some("current_node") => OutputLocality::CurrentNode,
        Some(nodes) => OutputLocality::Nodes(
            nodes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        ),
    };
    ExecutionOptions {
        verbose_progress: profiled_env_bool(p, "SLUICE_VERBOSE_PROGRESS", false),
        locality_with_output: locality,
        resource_limits: ResourceLimits {
            cpu: profiled_env_parse(p, "SLUICE_CPU_LIMIT"),
            gpu: profiled_env_parse(p, "SLUICE_GPU_LIMIT"),
            object_store_memory: profiled_env_parse(p, "SLUICE_MEMORY_LIMIT"),
        },
        exclude_resources: ResourceLimits {
            cpu: profiled_env_parse(p, "SLUICE_EXCLUDE_CPU"),
            gpu: profiled_env_parse(p, "SLUICE_EXCLUDE_GPU"),
            object_store_memory: profiled_env_parse(p, "SLUICE_EXCLUDE_MEMORY"),
        },
        preserve_order: profiled_env_bool(p, "SLUICE_PRESERVE_ORDER", false),
    }
}

// ── Runtime (local task substrate) ────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// GPUs advertised by the local substrate.
    #[serde(default)]
    pub num_gpus: f64,
    /// Object store capacity advertised by the local substrate, in bytes.
    #[serde(default = "default_object_store_memory")]
    pub object_store_memory_bytes: u64,
    /// Identifier of the node running the executor.
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

fn default_worker_threads() -> usize { 0 }
fn default_object_store_memory() -> u64 { 2 * 1024 * 1024 * 1024 }
fn default_node_id() -> String { "local".to_string() }

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            num_gpus: 0.0,
            object_store_memory_bytes: default_object_store_memory(),
            node_id: default_node_id(),
        }
    }
}

impl RuntimeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            worker_threads: profiled_env_parse(p, "SLUICE_WORKER_THREADS")
                .unwrap_or_else(default_worker_threads),
            num_gpus: profiled_env_parse(p, "SLUICE_NUM_GPUS").unwrap_or(0.0),
            object_store_memory_bytes: profiled_env_parse(p, "SLUICE_OBJECT_STORE_MEMORY")
                .unwrap_or_else(default_object_store_memory),
            node_id: profiled_env_opt(p, "SLUICE_NODE_ID").unwrap_or_else(default_node_id),
        }
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }
}

// ── Scheduler loop ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Sleep between driver iterations that made no progress.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Sleep between checks of a blocked output consumer.
    #[serde(default = "default_output_poll_interval")]
    pub output_poll_interval_ms: u64,
    /// Interval between progress log lines. 0 disables progress logging.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
    /// Completed tasks handled per iteration. 0 = unlimited.
    #[serde(default)]
    pub completion_iteration_budget: usize,
}

fn default_poll_interval() -> u64 { 1 }
fn default_output_poll_interval() -> u64 { 5 }
fn default_progress_interval() -> u64 { 5 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            output_poll_interval_ms: default_output_poll_interval(),
            progress_interval_secs: default_progress_interval(),
            completion_iteration_budget: 0,
        }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            poll_interval_ms: profiled_env_parse(p, "SLUICE_POLL_INTERVAL_MS")
                .unwrap_or_else(default_poll_interval),
            output_poll_interval_ms: profiled_env_parse(p, "SLUICE_OUTPUT_POLL_INTERVAL_MS")
                .unwrap_or_else(default_output_poll_interval),
            progress_interval_secs: profiled_env_parse(p, "SLUICE_PROGRESS_INTERVAL_SECS")
                .unwrap_or_else(default_progress_interval),
            completion_iteration_budget: profiled_env_parse(p, "SLUICE_ITERATION_BUDGET")
                .unwrap_or(0),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn output_poll_interval(&self) -> Duration {
        Duration::from_millis(self.output_poll_interval_ms)
    }

    /// `None` when progress logging is disabled.
    pub fn progress_interval(&self) -> Option<Duration> {
        (self.progress_interval_secs > 0).then(|| Duration::from_secs(self.progress_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.profile_label(), "default");
        assert_eq!(config.runtime.worker_threads, 0);
        assert!(config.runtime.resolved_worker_threads() > 0);
        assert_eq!(config.scheduler.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.scheduler.progress_interval(), Some(Duration::from_secs(5)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [execution]
            preserve_order = true
            locality_with_output = "current_node"

            [runtime]
            worker_threads = 3

            [scheduler]
            progress_interval_secs = 0
            "#,
        )
        .unwrap();
        assert!(config.execution.preserve_order);
        assert_eq!(config.execution.locality_with_output, OutputLocality::CurrentNode);
        assert_eq!(config.runtime.resolved_worker_threads(), 3);
        assert_eq!(config.runtime.node_id, "local");
        assert_eq!(config.scheduler.progress_interval(), None);
        assert_eq!(config.scheduler.output_poll_interval_ms, 5);
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = EngineConfig::from_toml_str("[scheduler]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got {err:?}");
    }

    #[test]
    fn rejects_negative_limit() {
        let err = EngineConfig::from_toml_str("[execution.resource_limits]\ncpu = -1.0\n")
            .unwrap_err();
        assert!(err.to_string().contains("cpu"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\nnum_gpus = 2.0\nnode_id = \"node-a\"").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.runtime.num_gpus, 2.0);
        assert_eq!(config.runtime.node_id, "node-a");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = EngineConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn profile_prefixed_env_wins() {
        // Keys are unique to this test to avoid cross-test interference.
        env::set_var("SLUICETEST_SLUICE_WORKER_THREADS", "7");
        let config = EngineConfig::for_profile("sluicetest");
        assert_eq!(config.profile, "SLUICETEST");
        assert_eq!(config.runtime.worker_threads, 7);
        env::remove_var("SLUICETEST_SLUICE_WORKER_THREADS");
    }
}
