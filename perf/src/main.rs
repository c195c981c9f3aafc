use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vecsweep_common::cache::IndexCache;
use vecsweep_common::config::EnvConfig;
use vecsweep_common::harness::{
    Harness, MeasurementResult, SweepConfig, DEFAULT_DATABASE_ROWS, DEFAULT_NPROBE,
    DEFAULT_REPEAT_COUNT, DEFAULT_SEED, DEFAULT_TOP_K, DEFAULT_WARMUP_COUNT,
};
use vecsweep_common::index::{IndexKind, IndexSpec, DEFAULT_NLIST};
use vecsweep_common::profiler::EmonProfiler;
use vecsweep_common::report::{data_size_banner, write_summary, SweepReport};
use vecsweep_common::vector::DistanceMetric;

/// Per-point progress and profiler warnings are logged at `info`/`warn`.
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "vecsweep-perf",
    about = "Search latency sweep over vector dimensions and query batch sizes."
)]
struct Args {
    #[arg(long, value_delimiter = ',', default_value = "256,1024")]
    dimensions: Vec<usize>,

    #[arg(long, value_delimiter = ',', default_value = "1,16,32,64,128")]
    query_counts: Vec<usize>,

    #[arg(long, default_value_t = DEFAULT_DATABASE_ROWS)]
    database_rows: usize,

    #[arg(long, default_value_t = DEFAULT_REPEAT_COUNT)]
    repeat: usize,

    #[arg(long, default_value_t = DEFAULT_WARMUP_COUNT)]
    warmup: usize,

    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    #[arg(long, default_value_t = DEFAULT_NPROBE)]
    nprobe: usize,

    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    #[arg(long, value_enum, default_value_t = IndexVariant::Flat)]
    index: IndexVariant,

    #[arg(long, default_value_t = DEFAULT_NLIST)]
    nlist: usize,

    #[arg(long, value_enum, default_value_t = Metric::Ip)]
    metric: Metric,

    /// Overrides INDEX_CACHE_DIR.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long)]
    sanity_check: bool,

    #[arg(long)]
    output_json: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum IndexVariant {
    Flat,
    Ivf,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Metric {
    Ip,
    L2,
}

impl Args {
    fn index_spec(&self) -> IndexSpec {
        let metric = match self.metric {
            Metric::Ip => DistanceMetric::InnerProduct,
            Metric::L2 => DistanceMetric::L2,
        };
        let kind = match self.index {
            IndexVariant::Flat => IndexKind::Flat,
            IndexVariant::Ivf => IndexKind::Ivf { nlist: self.nlist },
        };
        IndexSpec { kind, metric }
    }

    fn sweep(&self) -> SweepConfig {
        SweepConfig {
            dimensions: self.dimensions.clone(),
            query_counts: self.query_counts.clone(),
            database_rows: self.database_rows,
            repeat_count: self.repeat,
            warmup_count: self.warmup,
            top_k: self.top_k,
            nprobe: self.nprobe,
            seed: self.seed,
            sanity_check: self.sanity_check,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    let args = Args::parse();
    let env = EnvConfig::from_env().context("invalid environment configuration")?;
    let sweep = args.sweep();
    sweep.validate().context("invalid sweep parameters")?;
    let spec = args.index_spec();

    let cache_dir = args
        .cache_dir
        .clone()
        .unwrap_or_else(|| env.index_cache_dir.clone());
    println!("{}", data_size_banner(sweep.database_rows));

    let mut harness = Harness::new(spec, IndexCache::new(cache_dir));
    if env.emon_enabled {
        info!("EMON profiling enabled ({})", env.emon_binary);
        harness = harness.with_profiler(Box::new(EmonProfiler::new(env.emon_settings())));
    }

    let outcome = harness.run(&sweep);
    let (results, failure) = match outcome {
        Ok(results) => (results, None),
        Err(aborted) => (aborted.partial, Some(aborted.error)),
    };

    print_summary(&results)?;

    if let Some(path) = &args.output_json {
        let report = SweepReport {
            index: spec.kind.to_string(),
            sweep: &sweep,
            completed: failure.is_none(),
            error: failure.as_ref().map(|err| err.to_string()),
            results: &results,
        };
        let contents = report.to_json_pretty()?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write output json to {}", path.display()))?;
    }

    if let Some(err) = failure {
        error!("{}", err);
        return Err(err.into());
    }
    Ok(())
}

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn print_summary(results: &[MeasurementResult]) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_summary(&mut out, results)?;
    out.flush()?;
    Ok(())
}
