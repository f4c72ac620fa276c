use std::time::Duration;

use sluice_core::{Bundle, ExecutionError};
use tracing::{debug, error};

use super::core::ExecutorState;
use super::StreamingExecutor;

impl StreamingExecutor {
    /// Next output bundle of the root operator, blocking until one is
    /// available or the run ends.
    ///
    /// With `partition` set, only bundles tagged for that output split are
    /// returned; several threads may consume different splits concurrently.
    /// Returns `Ok(None)` once the run has succeeded and the output is
    /// drained. A failed run returns its error even if output is still
    /// buffered; a cancelled run returns [`ExecutionError::Cancelled`].
    pub fn get_next(&self, partition: Option<usize>) -> Result<Option<Bundle>, ExecutionError> {
        let Some(output) = self.output.as_ref() else {
            return Err(ExecutionError::InvalidState(
                "get_next called before execute".into(),
            ));
        };
        loop {
            let (state, error) = {
                let status = self.status.read().unwrap_or_else(|e| e.into_inner());
                (status.state, status.error.clone())
            };
            match state {
                ExecutorState::Failed => {
                    return Err(error.unwrap_or_else(|| {
                        ExecutionError::InvalidState("run failed without an error".into())
                    }));
                }
                ExecutorState::Cancelled => return Err(ExecutionError::Cancelled),
                ExecutorState::Running if self.cancel_requested() || self.driver_exited() => {
                    self.wait_for_termination();
                    continue;
                }
                _ => {}
            }

            if let Some(bundle) = output.pop(partition) {
                self.stats
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .bundles_emitted += 1;
                return Ok(Some(bundle));
            }
            // Outputs are published before the terminal state.
            if state == ExecutorState::Succeeded {
                return Ok(None);
            }
            std::thread::sleep(self.scheduler_config.output_poll_interval());
        }
    }

    /// Iterate over the output bundles of one split (or all of them).
    pub fn iter(&self, partition: Option<usize>) -> OutputIter<'_> {
        OutputIter {
            executor: self,
            partition,
            done: false,
        }
    }

    /// Block until the driver thread has exited.
    pub fn wait_for_termination(&self) {
        let handle = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take();
        match handle {
            Some(handle) => {
                let reason = match handle.join() {
                    Ok(()) => "driver thread exited without publishing a result",
                    Err(_) => "driver thread panicked",
                };
                let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
                if !status.state.is_terminal() {
                    error!(run_id = %self.run_id, "{}", reason);
                    status.state = ExecutorState::Failed;
                    status.error = Some(ExecutionError::DriverPanicked(reason.to_string()));
                }
            }
            // Another thread is joining, or the run never started.
            None => {
                while self.state() == ExecutorState::Running {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Whether the driver thread has exited but has not been joined yet.
    fn driver_exited(&self) -> bool {
        self.driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| handle.is_finished())
    }

    /// Cancel a running execution and wait for the driver to exit. Every
    /// operator is shut down by the driver before it exits.
    pub fn shutdown(&self) {
        if self.state() == ExecutorState::Running {
            debug!(run_id = %self.run_id, "Shutting down executor");
            self.cancel();
        }
        self.wait_for_termination();
    }
}

/// Iterator over [`StreamingExecutor::get_next`]. Ends after the first
/// error.
pub struct OutputIter<'a> {
    executor: &'a StreamingExecutor,
    partition: Option<usize>,
    done: bool,
}

impl Iterator for OutputIter<'_> {
    type Item = Result<Bundle, ExecutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.executor.get_next(self.partition) {
            Ok(Some(bundle)) => Some(Ok(bundle)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
