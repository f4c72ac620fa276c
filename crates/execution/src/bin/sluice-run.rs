use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use sluice_core::config::load_dotenv;
use sluice_core::{make_bundles, EngineConfig};
use tracing::info;

use sluice_execution::{
    ComputeStrategy, Dag, ExecutionContext, InputDataBuffer, LimitOperator, LocalSubstrate,
    MapOperator, StreamingExecutor,
};

/// Run a synthetic pipeline through the streaming executor.
///
/// Squares a range of integers, adds one on a fixed-size worker pool and
/// prints the run's stats as JSON.
#[derive(Parser, Debug)]
#[command(name = "sluice-run", version, about = "Run a synthetic streaming pipeline")]
struct Cli {
    /// TOML config file (default: environment variables)
    #[arg(long, env = "SLUICE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of input bundles
    #[arg(long, default_value_t = 100)]
    bundles: usize,

    /// Rows per input bundle
    #[arg(long, default_value_t = 1000)]
    rows_per_bundle: usize,

    /// Stop after this many output rows
    #[arg(long)]
    limit: Option<usize>,

    /// Size of the add-one worker pool
    #[arg(long, default_value_t = 2)]
    pool_size: usize,

    /// One progress line per operator
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    load_dotenv();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::from_env(),
    };
    if cli.verbose {
        config.execution.verbose_progress = true;
    }
    config.log_summary();

    let substrate = LocalSubstrate::new(&config.runtime).context("failed to start task substrate")?;

    let rows = cli.rows_per_bundle as i64;
    let input = make_bundles(
        (0..cli.bundles as i64)
            .map(|b| (b * rows..(b + 1) * rows).map(|x| json!(x)).collect())
            .collect(),
    );

    let mut dag = Dag::new();
    let source = dag.add(InputDataBuffer::new(input), &[])?;
    let square = dag.add(
        MapOperator::map_rows("square", |v| {
            let x = v.as_i64().ok_or("expected an integer row")?;
            Ok(json!(x * x))
        }),
        &[source],
    )?;
    let pool_size = cli.pool_size.max(1);
    let add_one = dag.add(
        MapOperator::map_rows("add_one", |v| {
            let x = v.as_i64().ok_or("expected an integer row")?;
            Ok(json!(x + 1))
        })
        .with_strategy(ComputeStrategy::Pool {
            min_size: pool_size,
            max_size: pool_size,
        }),
        &[square],
    )?;
    let root = match cli.limit {
        Some(limit) => dag.add(LimitOperator::new(limit), &[add_one])?,
        None => add_one,
    };

    let mut executor = StreamingExecutor::new(
        config.execution.clone(),
        ExecutionContext::new(),
        Arc::new(substrate),
    )
    .with_scheduler_config(config.scheduler.clone());
    executor.execute(dag, root)?;

    let mut rows_out = 0usize;
    let mut checksum = 0i64;
    for bundle in executor.iter(None) {
        let bundle = bundle?;
        rows_out += bundle.num_rows();
        checksum = bundle
            .rows()
            .filter_map(|v| v.as_i64())
            .fold(checksum, i64::wrapping_add);
    }
    executor.wait_for_termination();

    let stats = executor.stats();
    info!(
        rows = rows_out,
        checksum,
        wall_ms = stats.wall_time().map(|d| d.as_millis() as u64).unwrap_or(0),
        "Pipeline finished"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
