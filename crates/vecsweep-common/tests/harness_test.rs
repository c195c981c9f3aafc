use std::cell::RefCell;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::rc::Rc;

use vecsweep_common::cache::{ArtifactKey, IndexCache};
use vecsweep_common::dataset::VectorSet;
use vecsweep_common::harness::{BenchmarkConfig, Harness, StepError, SweepConfig, SweepError};
use vecsweep_common::index::{
    IndexBackend, IndexError, IndexKind, IndexSpec, SearchResults, VectorIndex,
};
use vecsweep_common::profiler::{ProfileTarget, Profiler, ProfilerError};
use vecsweep_common::report::format_summary;
use vecsweep_common::vector::DistanceMetric;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Create,
    Load,
    Train,
    Add,
    Search,
    ProfilerStart,
    ProfilerStop,
}

type Log = Rc<RefCell<Vec<Event>>>;

struct Tracked {
    inner: Box<dyn VectorIndex>,
    log: Log,
}

impl VectorIndex for Tracked {
    fn kind(&self) -> IndexKind {
        self.inner.kind()
    }
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
    fn metric(&self) -> DistanceMetric {
        self.inner.metric()
    }
    fn len(&self) -> usize {
        self.inner.len()
    }
    fn is_trained(&self) -> bool {
        self.inner.is_trained()
    }
    fn train(&mut self, vectors: &VectorSet) -> Result<(), IndexError> {
        self.log.borrow_mut().push(Event::Train);
        self.inner.train(vectors)
    }
    fn add(&mut self, vectors: &VectorSet) -> Result<(), IndexError> {
        self.log.borrow_mut().push(Event::Add);
        self.inner.add(vectors)
    }
    fn search(&self, queries: &VectorSet, k: usize) -> Result<SearchResults, IndexError> {
        self.log.borrow_mut().push(Event::Search);
        self.inner.search(queries, k)
    }
    fn set_nprobe(&mut self, nprobe: usize) {
        self.inner.set_nprobe(nprobe)
    }
    fn write_to(&self, out: &mut dyn Write) -> Result<(), IndexError> {
        self.inner.write_to(out)
    }
}

struct TrackingBackend {
    spec: IndexSpec,
    log: Log,
}

impl IndexBackend for TrackingBackend {
    fn create(&self, dimension: usize) -> Result<Box<dyn VectorIndex>, IndexError> {
        self.log.borrow_mut().push(Event::Create);
        Ok(Box::new(Tracked {
            inner: self.spec.create(dimension)?,
            log: self.log.clone(),
        }))
    }

    fn load(&self, input: &mut dyn Read) -> Result<Box<dyn VectorIndex>, IndexError> {
        self.log.borrow_mut().push(Event::Load);
        Ok(Box::new(Tracked {
            inner: self.spec.load(input)?,
            log: self.log.clone(),
        }))
    }

    fn artifact_extension(&self) -> String {
        self.spec.artifact_extension()
    }
}

struct RecordingProfiler {
    log: Log,
    fail: bool,
}

impl Profiler for RecordingProfiler {
    fn start(&mut self, _target: &ProfileTarget) -> Result<(), ProfilerError> {
        self.log.borrow_mut().push(Event::ProfilerStart);
        if self.fail {
            return Err(ProfilerError::Stop("collector unavailable".into()));
        }
        Ok(())
    }

    fn stop(&mut self, target: &ProfileTarget) -> Result<Option<PathBuf>, ProfilerError> {
        self.log.borrow_mut().push(Event::ProfilerStop);
        Ok(Some(PathBuf::from(format!(
            "emon_d{}_q{}.dat",
            target.dimension, target.query_count
        ))))
    }
}

fn tracking_harness(dir: &std::path::Path) -> (Harness<TrackingBackend>, Log) {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let backend = TrackingBackend {
        spec: IndexSpec::flat(DistanceMetric::InnerProduct),
        log: log.clone(),
    };
    (Harness::new(backend, IndexCache::new(dir)), log)
}

fn small_sweep() -> SweepConfig {
    SweepConfig {
        dimensions: vec![8],
        query_counts: vec![1],
        database_rows: 1000,
        repeat_count: 2,
        ..Default::default()
    }
}

#[test]
fn end_to_end_single_point() {
    let dir = tempfile::tempdir().unwrap();
    let mut harness = Harness::new(
        IndexSpec::flat(DistanceMetric::InnerProduct),
        IndexCache::new(dir.path()),
    );

    let results = harness.run(&small_sweep()).unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.dimension, 8);
    assert_eq!(result.query_count, 1);
    assert!(result.average_search_seconds >= 0.0);
    assert!(result.average_search_seconds.is_finite());
    assert!(!result.cache_hit);
    assert_eq!(result.latency_us.map(|l| l.samples), Some(2));

    let summary = format_summary(&results);
    let matching: Vec<&str> = summary
        .lines()
        .filter(|line| line.starts_with("Dimension:"))
        .collect();
    assert_eq!(matching.len(), 1);
    assert!(matching[0].contains("Dimension: 8, Number of Queries: 1,"));

    assert!(dir.path().join("trained_index_d8_db0.001M.flat").is_file());
}

#[test]
fn averages_are_finite_across_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let mut harness = Harness::new(
        IndexSpec::ivf(8, DistanceMetric::L2),
        IndexCache::new(dir.path()),
    );
    let sweep = SweepConfig {
        dimensions: vec![4, 12],
        query_counts: vec![1, 3, 5],
        database_rows: 300,
        repeat_count: 3,
        nprobe: 2,
        ..Default::default()
    };

    let results = harness.run(&sweep).unwrap();
    let points: Vec<(usize, usize)> = results
        .iter()
        .map(|r| (r.dimension, r.query_count))
        .collect();
    assert_eq!(points, vec![(4, 1), (4, 3), (4, 5), (12, 1), (12, 3), (12, 5)]);
    for r in &results {
        assert!(r.average_search_seconds.is_finite() && r.average_search_seconds >= 0.0);
    }
    // Only the first point of each dimension builds.
    let built: Vec<bool> = results.iter().map(|r| r.cache_hit).collect();
    assert_eq!(built, vec![false, true, true, false, true, true]);
}

#[test]
fn cached_artifact_skips_train_and_add() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (mut harness, log) = tracking_harness(dir.path());
        harness.run(&small_sweep()).unwrap();
        let events = log.borrow();
        assert!(events.contains(&Event::Train));
        assert!(events.contains(&Event::Add));
    }

    let (mut harness, log) = tracking_harness(dir.path());
    let results = harness.run(&small_sweep()).unwrap();
    assert!(results[0].cache_hit);
    assert_eq!(results[0].build_seconds, None);

    let events = log.borrow();
    assert_eq!(events[0], Event::Load);
    assert!(!events.contains(&Event::Create));
    assert!(!events.contains(&Event::Train));
    assert!(!events.contains(&Event::Add));
    assert!(events[1..].iter().all(|e| *e == Event::Search));
}

#[test]
fn cache_key_isolation_across_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let spec = IndexSpec::flat(DistanceMetric::InnerProduct);
    let cache = IndexCache::new(dir.path());

    let small = ArtifactKey::new(4, 200, &spec);
    let large = ArtifactKey::new(16, 200, &spec);
    cache.resolve(&small, &spec, 1).unwrap();
    assert!(cache.contains(&small));
    assert!(!cache.contains(&large));

    let resolved = cache.resolve(&large, &spec, 1).unwrap();
    assert_eq!(resolved.index.dimension(), 16);
    assert!(resolved.sample.is_some());
}

#[test]
fn stale_artifact_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let spec = IndexSpec::flat(DistanceMetric::InnerProduct);
    let cache = IndexCache::new(dir.path());

    let key = ArtifactKey::new(8, 100, &spec);
    cache.resolve(&key, &spec, 1).unwrap();

    // An artifact for another dimension placed under this key's name.
    let other = ArtifactKey::new(4, 100, &spec);
    cache.resolve(&other, &spec, 1).unwrap();
    fs::copy(cache.path_for(&other), cache.path_for(&key)).unwrap();

    let err = cache.resolve(&key, &spec, 1).err().expect("stale artifact");
    assert!(err.to_string().contains("stale artifact"));
}

#[test]
fn corrupt_artifact_aborts_without_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let (mut harness, log) = tracking_harness(dir.path());
    let key = ArtifactKey::new(8, 1000, harness.backend());
    fs::write(harness.cache().path_for(&key), b"not an index").unwrap();

    let aborted = harness.run(&small_sweep()).err().expect("corrupt cache must abort");
    assert!(aborted.partial.is_empty());
    assert!(matches!(
        aborted.error,
        SweepError::Step {
            dimension: 8,
            query_count: 1,
            source: StepError::Cache(_),
        }
    ));
    assert!(aborted.error.to_string().contains("dimension 8"));

    let events = log.borrow();
    assert!(!events.contains(&Event::Train));
    assert_eq!(
        fs::read(harness.cache().path_for(&key)).unwrap(),
        b"not an index".to_vec()
    );
}

#[test]
fn partial_results_survive_a_later_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (mut harness, _log) = tracking_harness(dir.path());
    let key = ArtifactKey::new(16, 1000, harness.backend());
    fs::write(harness.cache().path_for(&key), b"garbage").unwrap();

    let sweep = SweepConfig {
        dimensions: vec![8, 16],
        query_counts: vec![1, 2],
        ..small_sweep()
    };
    let aborted = harness.run(&sweep).err().expect("second dimension is corrupt");
    assert_eq!(aborted.partial.len(), 2);
    assert!(aborted.partial.iter().all(|r| r.dimension == 8));
    assert_eq!(
        aborted.error.point(),
        Some(BenchmarkConfig {
            dimension: 16,
            query_count: 1,
        })
    );
}

#[test]
fn zero_repeat_count_is_rejected_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let (mut harness, log) = tracking_harness(dir.path());
    let sweep = SweepConfig {
        repeat_count: 0,
        ..small_sweep()
    };

    let aborted = harness.run(&sweep).err().expect("repeat_count 0 is invalid");
    assert!(aborted.partial.is_empty());
    assert!(matches!(aborted.error, SweepError::Config(_)));
    assert_eq!(aborted.error.point(), None);
    assert!(log.borrow().is_empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn profiler_brackets_exactly_the_timed_searches() {
    let dir = tempfile::tempdir().unwrap();
    let (harness, log) = tracking_harness(dir.path());
    let mut harness = harness.with_profiler(Box::new(RecordingProfiler {
        log: log.clone(),
        fail: false,
    }));

    let sweep = SweepConfig {
        repeat_count: 3,
        warmup_count: 1,
        ..small_sweep()
    };
    let results = harness.run(&sweep).unwrap();
    assert_eq!(
        results[0].profile_artifact,
        Some(PathBuf::from("emon_d8_q1.dat"))
    );

    let events = log.borrow();
    assert_eq!(
        events.as_slice(),
        &[
            Event::Create,
            Event::Train,
            Event::Add,
            Event::Search,
            Event::ProfilerStart,
            Event::Search,
            Event::Search,
            Event::Search,
            Event::ProfilerStop,
        ]
    );
}

#[test]
fn profiler_failure_does_not_abort_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let (harness, log) = tracking_harness(dir.path());
    let mut harness = harness.with_profiler(Box::new(RecordingProfiler {
        log: log.clone(),
        fail: true,
    }));

    let sweep = SweepConfig {
        query_counts: vec![1, 4],
        ..small_sweep()
    };
    let results = harness.run(&sweep).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.profile_artifact.is_none()));
    assert!(!log.borrow().contains(&Event::ProfilerStop));
}
