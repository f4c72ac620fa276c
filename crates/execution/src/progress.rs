use std::time::{Duration, Instant};

use tracing::info;

use crate::resource_manager::ResourceManager;
use crate::topology::{debug_dump_topology, Topology};

/// Periodic progress logging: one aggregate line, or one line per
/// operator when verbose progress is on.
#[derive(Debug)]
pub struct ProgressReporter {
    interval: Option<Duration>,
    verbose: bool,
    last_report: Instant,
}

impl ProgressReporter {
    /// `interval` of `None` disables reporting.
    pub fn new(interval: Option<Duration>, verbose: bool) -> Self {
        Self {
            interval,
            verbose,
            last_report: Instant::now(),
        }
    }

    /// Report if the interval has elapsed since the last report.
    pub fn maybe_report(&mut self, topology: &Topology, resource_manager: &ResourceManager) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        if self.last_report.elapsed() < interval {
            return false;
        }
        self.report(topology, resource_manager);
        self.last_report = Instant::now();
        true
    }

    pub fn report(&self, topology: &Topology, resource_manager: &ResourceManager) {
        for line in self.lines(topology, resource_manager) {
            info!("{}", line);
        }
        debug_dump_topology(topology, resource_manager);
    }

    /// The progress lines: one per operator when verbose, else one.
    pub fn lines(&self, topology: &Topology, resource_manager: &ResourceManager) -> Vec<String> {
        if self.verbose {
            return topology
                .values()
                .map(|state| {
                    format!(
                        "{}: {} bundles out, {} queued, {} active{}",
                        state.name(),
                        state.bundles_produced(),
                        state.num_queued(),
                        state.operator().num_active_tasks(),
                        if state.operator().completed() { ", done" } else { "" }
                    )
                })
                .collect();
        }
        let done = topology
            .values()
            .filter(|state| state.operator().completed())
            .count();
        let active: usize = topology
            .values()
            .map(|state| state.operator().num_active_tasks())
            .sum();
        let rows_out = topology.values().last().map_or(0, |state| state.rows_produced);
        vec![format!(
            "Running: {done}/{} operators done, {active} active tasks, {rows_out} rows out; usage [{}] of limits [{}]",
            topology.len(),
            resource_manager.get_global_usage(),
            resource_manager.get_global_limits(),
        )]
    }
}
