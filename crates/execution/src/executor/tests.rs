use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use sluice_core::{
    make_bundles, BoxError, ExecutionError, ExecutionOptions, ExecutionResources, RuntimeConfig,
    SchedulerConfig,
};

use super::{ExecutorState, StreamingExecutor};
use crate::callback::{ExecutionCallback, ExecutionContext, ExecutorView};
use crate::dag::Dag;
use crate::operator::{InputDataBuffer, MapOperator, OperatorId};
use crate::substrate::{LocalSubstrate, TaskSubstrate};
use crate::testing::{ints, ManualSubstrate, MockOperator};

#[derive(Debug, thiserror::Error)]
#[error("bad row {0}")]
struct BadRow(i64);

/// Callback that records which hooks fired.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ExecutionCallback for Recorder {
    fn before_execution_starts(&self, executor: &ExecutorView<'_>) {
        self.events
            .lock()
            .unwrap()
            .push(format!("start:{}", executor.operator_names().len()));
    }

    fn after_execution_succeeds(&self, _executor: &ExecutorView<'_>) {
        self.events.lock().unwrap().push("succeeded".into());
    }

    fn after_execution_fails(&self, _executor: &ExecutorView<'_>, error: &ExecutionError) {
        self.events.lock().unwrap().push(format!("failed:{error}"));
    }
}

fn local_substrate() -> Arc<dyn TaskSubstrate> {
    let config = RuntimeConfig {
        worker_threads: 2,
        ..Default::default()
    };
    Arc::new(
        LocalSubstrate::new(&config)
            .unwrap()
            .with_cluster_resources(ExecutionResources::new(4.0, 0.0, 1e9)),
    )
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        poll_interval_ms: 1,
        output_poll_interval_ms: 1,
        progress_interval_secs: 0,
        completion_iteration_budget: 0,
    }
}

fn executor(substrate: Arc<dyn TaskSubstrate>, context: ExecutionContext) -> StreamingExecutor {
    StreamingExecutor::new(ExecutionOptions::default(), context, substrate)
        .with_scheduler_config(fast_config())
}

fn source(n: i64) -> InputDataBuffer {
    InputDataBuffer::new(make_bundles((0..n).map(|i| vec![json!(i)]).collect()))
}

fn add_one(v: &Value) -> Result<Value, BoxError> {
    Ok(json!(v.as_i64().unwrap_or_default() + 1))
}

fn pipeline(n: i64) -> (Dag, OperatorId) {
    let mut dag = Dag::new();
    let input = dag.add(source(n), &[]).unwrap();
    let first = dag.add(MapOperator::map_rows("add_one", add_one), &[input]).unwrap();
    let root = dag.add(MapOperator::map_rows("add_one", add_one), &[first]).unwrap();
    (dag, root)
}

#[test]
fn get_next_before_execute_is_invalid() {
    let exec = executor(local_substrate(), ExecutionContext::new());
    assert_eq!(exec.state(), ExecutorState::NotStarted);
    assert!(matches!(exec.get_next(None), Err(ExecutionError::InvalidState(_))));
}

#[test]
fn runs_pipeline_to_completion() {
    let recorder = Arc::new(Recorder::default());
    let mut context = ExecutionContext::new();
    context.add_execution_callback(recorder.clone());
    let mut exec = executor(local_substrate(), context);

    let (dag, root) = pipeline(10);
    exec.execute(dag, root).unwrap();

    let mut values: Vec<i64> = exec
        .iter(None)
        .flat_map(|bundle| ints(&bundle.unwrap()))
        .collect();
    values.sort_unstable();
    assert_eq!(values, (2..12).collect::<Vec<_>>());

    exec.wait_for_termination();
    assert_eq!(exec.state(), ExecutorState::Succeeded);
    assert!(exec.error().is_none());
    assert_eq!(recorder.events(), vec!["start:3".to_string(), "succeeded".to_string()]);

    let stats = exec.stats();
    assert_eq!(stats.bundles_emitted, 10);
    assert_eq!(stats.tasks_completed, 20);
    assert!(stats.finished_at.is_some());
    assert!(stats.operators.iter().all(|op| op.completed));

    // Drained: further calls keep returning None.
    assert!(exec.get_next(None).unwrap().is_none());
}

#[test]
fn execute_twice_is_invalid() {
    let mut exec = executor(local_substrate(), ExecutionContext::new());
    let (dag, root) = pipeline(1);
    exec.execute(dag, root).unwrap();
    let (dag, root) = pipeline(1);
    assert!(matches!(exec.execute(dag, root), Err(ExecutionError::InvalidState(_))));
    exec.wait_for_termination();
}

#[test]
fn construction_errors_fire_no_callbacks() {
    let recorder = Arc::new(Recorder::default());
    let mut context = ExecutionContext::new();
    context.add_execution_callback(recorder.clone());
    let mut exec = executor(local_substrate(), context);

    let mut dag = Dag::new();
    let input = dag.add(source(1), &[]).unwrap();
    let heavy = MapOperator::map_rows("heavy", add_one).with_resources(ExecutionResources::cpu(20.0));
    let root = dag.add(heavy, &[input]).unwrap();

    let err = exec.execute(dag, root).unwrap_err();
    assert!(matches!(err, ExecutionError::InfeasibleResources { .. }));
    assert_eq!(exec.state(), ExecutorState::NotStarted);
    assert!(recorder.events().is_empty());
}

#[test]
fn task_failure_surfaces_original_error() {
    let recorder = Arc::new(Recorder::default());
    let mut context = ExecutionContext::new();
    context.add_execution_callback(recorder.clone());
    let mut exec = executor(local_substrate(), context);

    let mut dag = Dag::new();
    let input = dag.add(source(5), &[]).unwrap();
    let failing = MapOperator::map_rows("check", |v: &Value| {
        let x = v.as_i64().unwrap_or_default();
        if x == 3 {
            return Err(BadRow(x).into());
        }
        Ok(v.clone())
    });
    let root = dag.add(failing, &[input]).unwrap();
    exec.execute(dag, root).unwrap();

    let err = exec
        .iter(None)
        .find_map(Result::err)
        .expect("run should fail");
    assert_eq!(err.downcast_task_error::<BadRow>().map(|e| e.0), Some(3));

    exec.wait_for_termination();
    assert_eq!(exec.state(), ExecutorState::Failed);
    assert_eq!(recorder.events(), vec!["start:2".to_string(), "failed:bad row 3".to_string()]);
    // Every later call reports the same failure.
    assert!(exec.get_next(None).unwrap_err().downcast_task_error::<BadRow>().is_some());
}

#[test]
fn cancel_unblocks_consumer_and_shuts_down_operators() {
    // Tasks are never run, so the consumer blocks until cancelled.
    let substrate = ManualSubstrate::new(ExecutionResources::new(4.0, 0.0, 1e9));
    let recorder = Arc::new(Recorder::default());
    let mut context = ExecutionContext::new();
    context.add_execution_callback(recorder.clone());
    let mut exec = executor(substrate.clone(), context);

    let mock = MockOperator::new("Stalled");
    let log = mock.log();
    let mut dag = Dag::new();
    let input = dag.add(source(3), &[]).unwrap();
    let map = dag.add(MapOperator::map_rows("never_runs", add_one), &[input]).unwrap();
    let root = dag.add(mock, &[map]).unwrap();
    exec.execute(dag, root).unwrap();

    let returned = AtomicUsize::new(0);
    std::thread::scope(|s| {
        let consumer = s.spawn(|| {
            let result = exec.get_next(None);
            returned.fetch_add(1, Ordering::SeqCst);
            result
        });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(returned.load(Ordering::SeqCst), 0);
        exec.cancel();
        let result = consumer.join().unwrap();
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
    });

    assert_eq!(exec.state(), ExecutorState::Cancelled);
    assert_eq!(log.lock().unwrap().shutdowns, 1);
    assert!(substrate.num_pending() > 0);
    assert_eq!(
        recorder.events(),
        vec!["start:3".to_string(), "failed:execution cancelled".to_string()]
    );
}

#[test]
fn shutdown_of_idle_executor_is_noop() {
    let exec = executor(local_substrate(), ExecutionContext::new());
    exec.shutdown();
    assert_eq!(exec.state(), ExecutorState::NotStarted);
}

#[test]
fn drop_stops_running_execution() {
    let substrate = ManualSubstrate::new(ExecutionResources::new(4.0, 0.0, 1e9));
    let mock = MockOperator::new("Stalled");
    let log = mock.log();
    {
        let mut exec = executor(substrate.clone(), ExecutionContext::new());
        let mut dag = Dag::new();
        let input = dag.add(source(2), &[]).unwrap();
        let root = dag.add(mock, &[input]).unwrap();
        exec.execute(dag, root).unwrap();
        assert_eq!(exec.state(), ExecutorState::Running);
    }
    assert_eq!(log.lock().unwrap().shutdowns, 1);
}

#[test]
fn operator_panic_fails_run_and_unblocks_consumer() {
    let recorder = Arc::new(Recorder::default());
    let mut context = ExecutionContext::new();
    context.add_execution_callback(recorder.clone());
    let mut exec = executor(local_substrate(), context);

    let mut mock = MockOperator::new("Buggy");
    mock.panic_on_input = Some("operator bug");
    let log = mock.log();
    let mut dag = Dag::new();
    let input = dag.add(source(1), &[]).unwrap();
    let root = dag.add(mock, &[input]).unwrap();
    exec.execute(dag, root).unwrap();

    let (tx, rx) = mpsc::channel();
    std::thread::scope(|s| {
        s.spawn(|| {
            let _ = tx.send(exec.get_next(None));
        });
        let result = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("consumer stayed blocked after the driver panicked");
        match result {
            Err(ExecutionError::DriverPanicked(message)) => assert_eq!(message, "operator bug"),
            other => panic!("unexpected result: {other:?}"),
        }
    });

    assert_eq!(exec.state(), ExecutorState::Failed);
    assert_eq!(log.lock().unwrap().shutdowns, 1);
    assert_eq!(
        recorder.events(),
        vec![
            "start:2".to_string(),
            "failed:driver panicked: operator bug".to_string()
        ]
    );
}

/// Callback that panics before the run starts.
struct PanicsOnStart;

impl ExecutionCallback for PanicsOnStart {
    fn before_execution_starts(&self, _executor: &ExecutorView<'_>) {
        panic!("hook bug");
    }
}

#[test]
fn callback_panic_fails_run() {
    let recorder = Arc::new(Recorder::default());
    let mut context = ExecutionContext::new();
    context.add_execution_callback(Arc::new(PanicsOnStart));
    context.add_execution_callback(recorder.clone());
    let mut exec = executor(local_substrate(), context);

    let (dag, root) = pipeline(3);
    exec.execute(dag, root).unwrap();

    let err = exec.get_next(None).unwrap_err();
    assert!(matches!(err, ExecutionError::DriverPanicked(ref m) if m == "hook bug"));
    exec.wait_for_termination();
    assert_eq!(exec.state(), ExecutorState::Failed);
    // The later callback never saw the start, but still sees the failure.
    assert_eq!(recorder.events(), vec!["failed:driver panicked: hook bug".to_string()]);
}
