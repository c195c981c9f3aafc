//! Vector index service consumed by the harness.
//!
//! The harness only talks to [`VectorIndex`] and [`IndexBackend`]; the flat and
//! IVF implementations behind them are interchangeable.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ordered_float::OrderedFloat;

use crate::dataset::VectorSet;
use crate::vector::DistanceMetric;

pub mod flat;
pub mod ivf;

pub use flat::FlatIndex;
pub use ivf::IvfIndex;

pub const DEFAULT_NLIST: usize = 100;

const IO_CHUNK: usize = 1 << 16;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("training failed: {0}")]
    Training(String),
    #[error("dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("index is not trained")]
    NotTrained,
    #[error("corrupt index data: {0}")]
    Corrupt(String),
    #[error("index io error: {0}")]
    Io(#[source] std::io::Error),
}

/// Running out of input while decoding means the data is truncated; any
/// other I/O failure is reported as such.
impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => IndexError::Corrupt(err.to_string()),
            _ => IndexError::Io(err),
        }
    }
}

/// Neighbors for a batch of queries, flattened row-major (`queries * k`).
/// Slots without a neighbor carry label `-1` and the worst possible distance
/// for the metric (`-inf` for inner product, `+inf` for L2).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    pub k: usize,
    pub distances: Vec<f32>,
    pub labels: Vec<i64>,
}

impl SearchResults {
    pub fn with_capacity(queries: usize, k: usize) -> Self {
        Self {
            k,
            distances: Vec::with_capacity(queries * k),
            labels: Vec::with_capacity(queries * k),
        }
    }

    pub fn queries(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.labels.len() / self.k
        }
    }

    pub fn row(&self, idx: usize) -> (&[f32], &[i64]) {
        let start = idx * self.k;
        (
            &self.distances[start..start + self.k],
            &self.labels[start..start + self.k],
        )
    }

    pub(crate) fn push_row(&mut self, top: TopK, metric: DistanceMetric) {
        let k = self.k;
        let hits = top.into_sorted();
        let found = hits.len();
        for (dist, label) in hits {
            self.distances.push(metric.reported(dist));
            self.labels.push(label);
        }
        for _ in found..k {
            self.distances.push(metric.reported(f32::INFINITY));
            self.labels.push(-1);
        }
    }
}

pub trait VectorIndex {
    fn kind(&self) -> IndexKind;
    fn dimension(&self) -> usize;
    fn metric(&self) -> DistanceMetric;
    /// Number of stored vectors.
    fn len(&self) -> usize;
    fn is_trained(&self) -> bool;
    fn train(&mut self, vectors: &VectorSet) -> Result<(), IndexError>;
    fn add(&mut self, vectors: &VectorSet) -> Result<(), IndexError>;
    fn search(&self, queries: &VectorSet, k: usize) -> Result<SearchResults, IndexError>;
    /// Accuracy/speed knob. Indexes without one ignore it.
    fn set_nprobe(&mut self, nprobe: usize);
    fn write_to(&self, out: &mut dyn Write) -> Result<(), IndexError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Flat,
    Ivf { nlist: usize },
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Flat => write!(f, "flat"),
            IndexKind::Ivf { nlist } => write!(f, "ivf{}", nlist),
        }
    }
}

/// Creates fresh indexes and decodes persisted ones.
pub trait IndexBackend {
    fn create(&self, dimension: usize) -> Result<Box<dyn VectorIndex>, IndexError>;
    fn load(&self, input: &mut dyn Read) -> Result<Box<dyn VectorIndex>, IndexError>;
    /// File extension identifying the variant in artifact names.
    fn artifact_extension(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    pub kind: IndexKind,
    pub metric: DistanceMetric,
}

impl IndexSpec {
    pub fn flat(metric: DistanceMetric) -> Self {
        Self {
            kind: IndexKind::Flat,
            metric,
        }
    }

    pub fn ivf(nlist: usize, metric: DistanceMetric) -> Self {
        Self {
            kind: IndexKind::Ivf { nlist },
            metric,
        }
    }
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self::flat(DistanceMetric::InnerProduct)
    }
}

impl IndexBackend for IndexSpec {
    fn create(&self, dimension: usize) -> Result<Box<dyn VectorIndex>, IndexError> {
        if dimension == 0 {
            return Err(IndexError::Training("index dimension must be > 0".into()));
        }
        Ok(match self.kind {
            IndexKind::Flat => Box::new(FlatIndex::new(dimension, self.metric)),
            IndexKind::Ivf { nlist } => Box::new(IvfIndex::new(dimension, nlist, self.metric)),
        })
    }

    fn load(&self, input: &mut dyn Read) -> Result<Box<dyn VectorIndex>, IndexError> {
        let index = load_index(input)?;
        if index.kind() != self.kind || index.metric() != self.metric {
            return Err(IndexError::Corrupt(format!(
                "artifact holds {} ({}), expected {} ({})",
                index.kind(),
                index.metric().as_str(),
                self.kind,
                self.metric.as_str()
            )));
        }
        Ok(index)
    }

    fn artifact_extension(&self) -> String {
        match self.metric {
            DistanceMetric::InnerProduct => self.kind.to_string(),
            DistanceMetric::L2 => format!("{}.l2", self.kind),
        }
    }
}

/// Decodes any supported index, dispatching on the leading magic.
pub fn load_index(input: &mut dyn Read) -> Result<Box<dyn VectorIndex>, IndexError> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic)?;
    match &magic {
        flat::MAGIC => Ok(Box::new(FlatIndex::read_body(input)?)),
        ivf::MAGIC => Ok(Box::new(IvfIndex::read_body(input)?)),
        other => Err(IndexError::Corrupt(format!("unknown index magic {:?}", other))),
    }
}

pub(crate) fn check_dimension(expected: usize, vectors: &VectorSet) -> Result<(), IndexError> {
    if vectors.dimension() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vectors.dimension(),
        });
    }
    Ok(())
}

pub(crate) fn write_metric(out: &mut dyn Write, metric: DistanceMetric) -> Result<(), IndexError> {
    let bytes = metric.as_str().as_bytes();
    out.write_u32::<LittleEndian>(bytes.len() as u32)?;
    out.write_all(bytes)?;
    Ok(())
}

pub(crate) fn read_metric(input: &mut dyn Read) -> Result<DistanceMetric, IndexError> {
    let len = input.read_u32::<LittleEndian>()? as usize;
    if len == 0 || len > 64 {
        return Err(IndexError::Corrupt(format!("invalid metric length {}", len)));
    }
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes)?;
    let name = String::from_utf8_lossy(&bytes).to_string();
    match name.as_str() {
        "inner_product" => Ok(DistanceMetric::InnerProduct),
        "euclidean_squared" => Ok(DistanceMetric::L2),
        other => Err(IndexError::Corrupt(format!("unknown metric {}", other))),
    }
}

pub(crate) fn write_f32s(out: &mut dyn Write, values: &[f32]) -> Result<(), IndexError> {
    let mut buf = vec![0u8; IO_CHUNK.min(values.len()) * 4];
    for chunk in values.chunks(IO_CHUNK) {
        let bytes = &mut buf[..chunk.len() * 4];
        LittleEndian::write_f32_into(chunk, bytes);
        out.write_all(bytes)?;
    }
    Ok(())
}

/// Reads `count` floats in bounded chunks so a corrupt length fails on EOF
/// instead of allocating the claimed size up front.
pub(crate) fn read_f32s(input: &mut dyn Read, count: usize) -> Result<Vec<f32>, IndexError> {
    let mut values = Vec::with_capacity(count.min(IO_CHUNK));
    let mut chunk = vec![0.0f32; IO_CHUNK.min(count)];
    let mut remaining = count;
    while remaining > 0 {
        let n = remaining.min(IO_CHUNK);
        input.read_f32_into::<LittleEndian>(&mut chunk[..n])?;
        values.extend_from_slice(&chunk[..n]);
        remaining -= n;
    }
    Ok(values)
}

pub(crate) fn write_i64s(out: &mut dyn Write, values: &[i64]) -> Result<(), IndexError> {
    for &v in values {
        out.write_i64::<LittleEndian>(v)?;
    }
    Ok(())
}

pub(crate) fn read_i64s(input: &mut dyn Read, count: usize) -> Result<Vec<i64>, IndexError> {
    let mut values = Vec::with_capacity(count.min(IO_CHUNK));
    for _ in 0..count {
        values.push(input.read_i64::<LittleEndian>()?);
    }
    Ok(values)
}

/// Bounded max-heap keeping the `k` smallest `(distance, label)` pairs.
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<(OrderedFloat<f32>, i64)>,
}

impl TopK {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, dist: f32, label: i64) {
        if self.k == 0 {
            return;
        }
        let item = (OrderedFloat(dist), label);
        if self.heap.len() < self.k {
            self.heap.push(item);
        } else if let Some(top) = self.heap.peek() {
            if item.cmp(top) == Ordering::Less {
                self.heap.pop();
                self.heap.push(item);
            }
        }
    }

    pub(crate) fn into_sorted(self) -> Vec<(f32, i64)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|(d, l)| (d.0, l))
            .collect()
    }
}
