//! Row-major vector matrices and seeded synthetic data.
//!
//! Every generator takes an explicit `StdRng` so reproducibility never depends
//! on which configuration ran before.

use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Offset added to column 0 of row `i` is `i / PERTURBATION_SCALE`.
pub const PERTURBATION_SCALE: f32 = 1000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSet {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorSet {
    pub fn new(dimension: usize, data: Vec<f32>) -> Result<Self, String> {
        if dimension == 0 {
            return Err("vector dimension must be > 0".into());
        }
        if data.len() % dimension != 0 {
            return Err(format!(
                "data length {} is not a multiple of dimension {}",
                data.len(),
                dimension
            ));
        }
        Ok(Self { dimension, data })
    }

    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, String> {
        let dimension = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dimension);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dimension {
                return Err(format!("dimension mismatch at {}: {} != {}", i, row.len(), dimension));
            }
            data.extend_from_slice(row);
        }
        Self::new(dimension, data)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, idx: usize) -> &[f32] {
        let start = idx * self.dimension;
        &self.data[start..start + self.dimension]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// First `count` rows as a new set.
    pub fn head(&self, count: usize) -> Self {
        let count = count.min(self.rows());
        Self {
            dimension: self.dimension,
            data: self.data[..count * self.dimension].to_vec(),
        }
    }
}

/// Uniform `[0, 1)` vectors with column 0 of row `i` shifted by `i / 1000`.
pub fn perturbed_uniform(rows: usize, dimension: usize, rng: &mut StdRng) -> VectorSet {
    let dist = Uniform::new(0.0f32, 1.0f32);
    let mut data = Vec::with_capacity(rows * dimension);
    for i in 0..rows {
        let start = data.len();
        data.extend((0..dimension).map(|_| rng.sample(dist)));
        if dimension > 0 {
            data[start] += i as f32 / PERTURBATION_SCALE;
        }
    }
    VectorSet {
        dimension: dimension.max(1),
        data,
    }
}

/// Query batch for one sweep point. A fresh generator is seeded per call.
pub fn query_batch(query_count: usize, dimension: usize, seed: u64) -> VectorSet {
    let mut rng = StdRng::seed_from_u64(seed);
    perturbed_uniform(query_count, dimension, &mut rng)
}

/// Database vectors use a stream distinct from the query stream so the cached
/// artifact content does not depend on which query count triggered the build.
pub fn database_vectors(rows: usize, dimension: usize, seed: u64) -> VectorSet {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    perturbed_uniform(rows, dimension, &mut rng)
}
