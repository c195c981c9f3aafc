//! Parameter sweep driver.
//!
//! For every (dimension, query count) point the harness resolves an index,
//! warms it up, times `repeat_count` identical searches and records the
//! average. Points run strictly one after another on the calling thread.

use std::hint::black_box;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{ArtifactKey, CacheError, IndexCache, Resolution};
use crate::config::ConfigError;
use crate::dataset::{query_batch, VectorSet};
use crate::index::{IndexBackend, IndexError, VectorIndex};
use crate::profiler::{ProfileGuard, ProfileTarget, Profiler};
use crate::stats::{LatencyRecorder, LatencySummary};

pub const DEFAULT_DIMENSIONS: [usize; 2] = [256, 1024];
pub const DEFAULT_QUERY_COUNTS: [usize; 5] = [1, 16, 32, 64, 128];
pub const DEFAULT_DATABASE_ROWS: usize = 10_000_000;
pub const DEFAULT_REPEAT_COUNT: usize = 5;
pub const DEFAULT_WARMUP_COUNT: usize = 1;
pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_NPROBE: usize = 10;
pub const DEFAULT_SEED: u64 = 1234;

#[derive(Debug, Clone, Serialize)]
pub struct SweepConfig {
    pub dimensions: Vec<usize>,
    pub query_counts: Vec<usize>,
    pub database_rows: usize,
    pub repeat_count: usize,
    pub warmup_count: usize,
    pub top_k: usize,
    pub nprobe: usize,
    pub seed: u64,
    pub sanity_check: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS.to_vec(),
            query_counts: DEFAULT_QUERY_COUNTS.to_vec(),
            database_rows: DEFAULT_DATABASE_ROWS,
            repeat_count: DEFAULT_REPEAT_COUNT,
            warmup_count: DEFAULT_WARMUP_COUNT,
            top_k: DEFAULT_TOP_K,
            nprobe: DEFAULT_NPROBE,
            seed: DEFAULT_SEED,
            sanity_check: false,
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: &str| ConfigError::Invalid {
            key,
            reason: reason.to_string(),
        };
        if self.dimensions.is_empty() || self.dimensions.contains(&0) {
            return Err(invalid("dimensions", "need at least one dimension, all > 0"));
        }
        if self.query_counts.is_empty() || self.query_counts.contains(&0) {
            return Err(invalid("query_counts", "need at least one query count, all > 0"));
        }
        if self.database_rows == 0 {
            return Err(invalid("database_rows", "must be > 0"));
        }
        if self.repeat_count == 0 {
            return Err(invalid("repeat_count", "must be > 0"));
        }
        if self.top_k == 0 {
            return Err(invalid("top_k", "must be > 0"));
        }
        Ok(())
    }

    /// Sweep order: dimension-major, then query count. Repeated values are
    /// measured once, at their first position.
    pub fn points(&self) -> Vec<BenchmarkConfig> {
        let dimensions = dedup(&self.dimensions);
        let query_counts = dedup(&self.query_counts);
        dimensions
            .iter()
            .flat_map(|&dimension| {
                query_counts.iter().map(move |&query_count| BenchmarkConfig {
                    dimension,
                    query_count,
                })
            })
            .collect()
    }
}

fn dedup(values: &[usize]) -> Vec<usize> {
    let mut out: Vec<usize> = Vec::with_capacity(values.len());
    for &v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BenchmarkConfig {
    pub dimension: usize,
    pub query_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeasurementResult {
    pub dimension: usize,
    pub query_count: usize,
    pub database_rows: usize,
    pub repeat_count: usize,
    pub average_search_seconds: f64,
    pub cache_hit: bool,
    pub build_seconds: Option<f64>,
    pub latency_us: Option<LatencySummary>,
    pub profile_artifact: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("search failed: {0}")]
    Search(#[from] IndexError),
    #[error("latency recorder: {0}")]
    Stats(#[from] hdrhistogram::CreationError),
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("invalid sweep parameters: {0}")]
    Config(#[from] ConfigError),
    #[error("sweep aborted at dimension {dimension}, number of queries {query_count}: {source}")]
    Step {
        dimension: usize,
        query_count: usize,
        #[source]
        source: StepError,
    },
}

impl SweepError {
    /// The sweep point that failed, if the sweep got as far as running one.
    pub fn point(&self) -> Option<BenchmarkConfig> {
        match self {
            SweepError::Config(_) => None,
            SweepError::Step {
                dimension,
                query_count,
                ..
            } => Some(BenchmarkConfig {
                dimension: *dimension,
                query_count: *query_count,
            }),
        }
    }
}

/// A fatal error together with everything measured before it.
#[derive(Debug)]
pub struct SweepAborted {
    pub partial: Vec<MeasurementResult>,
    pub error: SweepError,
}

struct LoadedIndex {
    key: ArtifactKey,
    index: Box<dyn VectorIndex>,
}

pub struct Harness<B: IndexBackend> {
    backend: B,
    cache: IndexCache,
    profiler: Option<Box<dyn Profiler>>,
}

impl<B: IndexBackend> Harness<B> {
    pub fn new(backend: B, cache: IndexCache) -> Self {
        Self {
            backend,
            cache,
            profiler: None,
        }
    }

    pub fn with_profiler(mut self, profiler: Box<dyn Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    pub fn run(&mut self, sweep: &SweepConfig) -> Result<Vec<MeasurementResult>, SweepAborted> {
        if let Err(err) = sweep.validate() {
            return Err(SweepAborted {
                partial: Vec::new(),
                error: err.into(),
            });
        }
        let mut results = Vec::new();
        let mut current: Option<LoadedIndex> = None;

        for point in sweep.points() {
            info!(
                "Testing with dimension: {}, number of queries: {}",
                point.dimension, point.query_count
            );
            match self.run_point(sweep, point, &mut current) {
                Ok(result) => {
                    info!(
                        "Avg. search time for dimension {}, number of queries {}: {:.6} s",
                        result.dimension, result.query_count, result.average_search_seconds
                    );
                    results.push(result);
                }
                Err(source) => {
                    return Err(SweepAborted {
                        partial: results,
                        error: SweepError::Step {
                            dimension: point.dimension,
                            query_count: point.query_count,
                            source,
                        },
                    });
                }
            }
        }

        Ok(results)
    }

    fn run_point(
        &mut self,
        sweep: &SweepConfig,
        point: BenchmarkConfig,
        current: &mut Option<LoadedIndex>,
    ) -> Result<MeasurementResult, StepError> {
        let queries = query_batch(point.query_count, point.dimension, sweep.seed);

        let key = ArtifactKey::new(point.dimension, sweep.database_rows, &self.backend);
        let mut cache_hit = true;
        let mut build_seconds = None;
        let mut loaded = match current.take() {
            Some(loaded) if loaded.key == key => loaded,
            previous => {
                // Release the previous index before loading the next one.
                drop(previous);
                let resolved = self.cache.resolve(&key, &self.backend, sweep.seed)?;
                if let Resolution::Built { build_time } = resolved.origin {
                    cache_hit = false;
                    build_seconds = Some(build_time.as_secs_f64());
                }
                if sweep.sanity_check {
                    if let Some(sample) = &resolved.sample {
                        sanity_check(resolved.index.as_ref(), sample, sweep.top_k);
                    }
                }
                LoadedIndex {
                    key,
                    index: resolved.index,
                }
            }
        };
        let index = loaded.index.as_mut();

        index.set_nprobe(sweep.nprobe);

        for _ in 0..sweep.warmup_count {
            black_box(index.search(&queries, sweep.top_k)?);
        }

        let mut recorder = LatencyRecorder::new()?;
        let target = ProfileTarget {
            dimension: point.dimension,
            database_rows: sweep.database_rows,
            query_count: point.query_count,
        };
        let guard = self
            .profiler
            .as_deref_mut()
            .map(|profiler| ProfileGuard::start(profiler, target));
        let timed = timed_searches(index, &queries, sweep.top_k, sweep.repeat_count);
        let profile_artifact = guard.and_then(|guard| guard.finish());
        let (elapsed, laps) = timed?;
        for lap in laps {
            recorder.record(lap);
        }

        let average_search_seconds = elapsed.as_secs_f64() / sweep.repeat_count as f64;
        *current = Some(loaded);

        Ok(MeasurementResult {
            dimension: point.dimension,
            query_count: point.query_count,
            database_rows: sweep.database_rows,
            repeat_count: sweep.repeat_count,
            average_search_seconds,
            cache_hit,
            build_seconds,
            latency_us: recorder.summary(),
            profile_artifact,
        })
    }
}

/// The timed phase. Nothing but the searches and their clock reads run here;
/// per-call laps go into a preallocated buffer.
fn timed_searches(
    index: &dyn VectorIndex,
    queries: &VectorSet,
    top_k: usize,
    repeat: usize,
) -> Result<(Duration, Vec<Duration>), IndexError> {
    let mut laps = Vec::with_capacity(repeat);
    let start = Instant::now();
    for _ in 0..repeat {
        let call = Instant::now();
        black_box(index.search(queries, top_k)?);
        laps.push(call.elapsed());
    }
    Ok((start.elapsed(), laps))
}

fn sanity_check(index: &dyn VectorIndex, sample: &VectorSet, top_k: usize) {
    match index.search(sample, top_k) {
        Ok(results) => {
            info!("Sanity check results:");
            for row in 0..results.queries() {
                let (distances, labels) = results.row(row);
                info!("  row {}: indices {:?} distances {:?}", row, labels, distances);
            }
        }
        Err(err) => warn!("Sanity check search failed: {}", err),
    }
}
