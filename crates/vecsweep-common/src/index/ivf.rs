use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{
    check_dimension, read_f32s, read_i64s, read_metric, write_f32s, write_i64s, write_metric,
    IndexError, IndexKind, SearchResults, TopK, VectorIndex,
};
use crate::dataset::VectorSet;
use crate::vector::{distance, euclidean_squared, DistanceMetric};

pub(crate) const MAGIC: &[u8; 4] = b"VSIV";
const VERSION: u32 = 1;

pub const DEFAULT_NPROBE: usize = 1;
pub const TRAIN_ITERS: usize = 20;
pub const TRAIN_SEED: u64 = 1234;
/// Training uses at most this many sampled rows per centroid.
pub const MAX_POINTS_PER_CENTROID: usize = 256;

/// Inverted-file index. The coarse quantizer clusters with squared L2; the
/// configured metric ranks candidates inside the probed lists.
#[derive(Debug, Clone)]
pub struct IvfIndex {
    nlist: usize,
    dimension: usize,
    metric: DistanceMetric,
    nprobe: usize,
    /// Flattened centroid matrix (nlist * dimension), empty until trained
    centroids: Vec<f32>,
    list_ids: Vec<Vec<i64>>,
    list_vectors: Vec<Vec<f32>>,
    ntotal: usize,
}

impl IvfIndex {
    pub fn new(dimension: usize, nlist: usize, metric: DistanceMetric) -> Self {
        Self {
            nlist: nlist.max(1),
            dimension,
            metric,
            nprobe: DEFAULT_NPROBE,
            centroids: Vec::new(),
            list_ids: Vec::new(),
            list_vectors: Vec::new(),
            ntotal: 0,
        }
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    fn centroid(&self, idx: usize) -> &[f32] {
        let start = idx * self.dimension;
        &self.centroids[start..start + self.dimension]
    }

    fn trained_lists(&self) -> usize {
        self.centroids.len() / self.dimension
    }

    fn nearest_centroid(&self, v: &[f32]) -> usize {
        let mut best = 0usize;
        let mut best_dist = f32::INFINITY;
        for c in 0..self.trained_lists() {
            let dist = euclidean_squared(v, self.centroid(c));
            if dist < best_dist {
                best_dist = dist;
                best = c;
            }
        }
        best
    }

    fn probe_order(&self, query: &[f32]) -> Vec<usize> {
        let mut order: Vec<(f32, usize)> = (0..self.trained_lists())
            .map(|c| (euclidean_squared(query, self.centroid(c)), c))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        order
            .into_iter()
            .take(self.nprobe)
            .map(|(_, c)| c)
            .collect()
    }

    pub(crate) fn read_body(input: &mut dyn Read) -> Result<Self, IndexError> {
        let version = input.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(IndexError::Corrupt(format!("unsupported IVF version: {}", version)));
        }
        let nlist = input.read_u32::<LittleEndian>()? as usize;
        let dimension = input.read_u32::<LittleEndian>()? as usize;
        if nlist == 0 || dimension == 0 {
            return Err(IndexError::Corrupt("invalid IVF header".into()));
        }
        let metric = read_metric(input)?;
        let nprobe = input.read_u32::<LittleEndian>()? as usize;
        let trained_lists = input.read_u32::<LittleEndian>()? as usize;
        if trained_lists > nlist {
            return Err(IndexError::Corrupt(format!(
                "{} trained lists exceed nlist {}",
                trained_lists, nlist
            )));
        }

        let centroids = read_f32s(input, trained_lists * dimension)?;
        let mut list_ids = Vec::with_capacity(trained_lists);
        let mut list_vectors = Vec::with_capacity(trained_lists);
        let mut ntotal = 0usize;
        for _ in 0..trained_lists {
            let len = input.read_u64::<LittleEndian>()? as usize;
            let total = len
                .checked_mul(dimension)
                .ok_or_else(|| IndexError::Corrupt(format!("list length {} overflows", len)))?;
            list_ids.push(read_i64s(input, len)?);
            list_vectors.push(read_f32s(input, total)?);
            ntotal += len;
        }

        let mut index = Self::new(dimension, nlist, metric);
        index.centroids = centroids;
        index.list_ids = list_ids;
        index.list_vectors = list_vectors;
        index.ntotal = ntotal;
        index.nprobe = nprobe.clamp(1, trained_lists.max(1));
        Ok(index)
    }
}

impl VectorIndex for IvfIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Ivf { nlist: self.nlist }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn len(&self) -> usize {
        self.ntotal
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn train(&mut self, vectors: &VectorSet) -> Result<(), IndexError> {
        if vectors.is_empty() {
            return Err(IndexError::Training("no vectors".into()));
        }
        let dims = self.dimension;
        if vectors.dimension() != dims {
            return Err(IndexError::Training(format!(
                "expected dimension {}, got {}",
                dims,
                vectors.dimension()
            )));
        }

        let mut rng = StdRng::seed_from_u64(TRAIN_SEED);

        let mut sample: Vec<usize> = (0..vectors.rows()).collect();
        sample.shuffle(&mut rng);
        sample.truncate(self.nlist * MAX_POINTS_PER_CENTROID);

        let k = self.nlist.min(sample.len());
        let mut centroids = vec![0.0f32; k * dims];
        for c in 0..k {
            let start = c * dims;
            centroids[start..start + dims].copy_from_slice(vectors.row(sample[c]));
        }

        let mut assignments = vec![usize::MAX; sample.len()];
        for _ in 0..TRAIN_ITERS {
            let mut changed = false;

            for (i, &row) in sample.iter().enumerate() {
                let v = vectors.row(row);
                let mut best = 0usize;
                let mut best_dist = f32::INFINITY;
                for c in 0..k {
                    let c_start = c * dims;
                    let dist = euclidean_squared(v, &centroids[c_start..c_start + dims]);
                    if dist < best_dist {
                        best_dist = dist;
                        best = c;
                    }
                }
                if assignments[i] != best {
                    assignments[i] = best;
                    changed = true;
                }
            }

            if !changed {
                break;
            }

            let mut counts = vec![0usize; k];
            let mut sums = vec![0.0f32; k * dims];
            for (i, &row) in sample.iter().enumerate() {
                let c = assignments[i];
                counts[c] += 1;
                let base = c * dims;
                for (d, x) in vectors.row(row).iter().enumerate() {
                    sums[base + d] += x;
                }
            }

            for c in 0..k {
                let base = c * dims;
                if counts[c] == 0 {
                    let row = sample[rng.gen_range(0..sample.len())];
                    centroids[base..base + dims].copy_from_slice(vectors.row(row));
                } else {
                    let inv = 1.0 / counts[c] as f32;
                    for d in 0..dims {
                        centroids[base + d] = sums[base + d] * inv;
                    }
                }
            }
        }

        self.centroids = centroids;
        self.list_ids = vec![Vec::new(); k];
        self.list_vectors = vec![Vec::new(); k];
        self.ntotal = 0;
        self.nprobe = self.nprobe.clamp(1, k);
        Ok(())
    }

    fn add(&mut self, vectors: &VectorSet) -> Result<(), IndexError> {
        check_dimension(self.dimension, vectors)?;
        if !self.is_trained() {
            return Err(IndexError::NotTrained);
        }
        for v in vectors.iter() {
            let c = self.nearest_centroid(v);
            self.list_ids[c].push(self.ntotal as i64);
            self.list_vectors[c].extend_from_slice(v);
            self.ntotal += 1;
        }
        Ok(())
    }

    fn search(&self, queries: &VectorSet, k: usize) -> Result<SearchResults, IndexError> {
        check_dimension(self.dimension, queries)?;
        if !self.is_trained() {
            return Err(IndexError::NotTrained);
        }
        let mut results = SearchResults::with_capacity(queries.rows(), k);
        for query in queries.iter() {
            let mut top = TopK::new(k);
            for c in self.probe_order(query) {
                let vectors = self.list_vectors[c].chunks_exact(self.dimension);
                for (&id, vector) in self.list_ids[c].iter().zip(vectors) {
                    top.push(distance(query, vector, self.metric), id);
                }
            }
            results.push_row(top, self.metric);
        }
        Ok(results)
    }

    fn set_nprobe(&mut self, nprobe: usize) {
        let lists = if self.is_trained() {
            self.trained_lists()
        } else {
            self.nlist
        };
        self.nprobe = nprobe.clamp(1, lists);
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), IndexError> {
        out.write_all(MAGIC)?;
        out.write_u32::<LittleEndian>(VERSION)?;
        out.write_u32::<LittleEndian>(self.nlist as u32)?;
        out.write_u32::<LittleEndian>(self.dimension as u32)?;
        write_metric(out, self.metric)?;
        out.write_u32::<LittleEndian>(self.nprobe as u32)?;
        out.write_u32::<LittleEndian>(self.trained_lists() as u32)?;
        write_f32s(out, &self.centroids)?;
        for (ids, vectors) in self.list_ids.iter().zip(&self.list_vectors) {
            out.write_u64::<LittleEndian>(ids.len() as u64)?;
            write_i64s(out, ids)?;
            write_f32s(out, vectors)?;
        }
        Ok(())
    }
}
