use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{
    check_dimension, read_f32s, read_metric, write_f32s, write_metric, IndexError, IndexKind,
    SearchResults, TopK, VectorIndex,
};
use crate::dataset::VectorSet;
use crate::vector::{distance, DistanceMetric};

pub(crate) const MAGIC: &[u8; 4] = b"VSFL";
const VERSION: u32 = 1;

/// Exact search over every stored vector.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    metric: DistanceMetric,
    vectors: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            vectors: Vec::new(),
        }
    }

    pub(crate) fn read_body(input: &mut dyn Read) -> Result<Self, IndexError> {
        let version = input.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(IndexError::Corrupt(format!("unsupported flat version: {}", version)));
        }
        let dimension = input.read_u32::<LittleEndian>()? as usize;
        if dimension == 0 {
            return Err(IndexError::Corrupt("invalid flat header".into()));
        }
        let metric = read_metric(input)?;
        let count = input.read_u64::<LittleEndian>()? as usize;
        let total = count
            .checked_mul(dimension)
            .ok_or_else(|| IndexError::Corrupt(format!("vector count {} overflows", count)))?;
        let vectors = read_f32s(input, total)?;

        Ok(Self {
            dimension,
            metric,
            vectors,
        })
    }
}

impl VectorIndex for FlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn len(&self) -> usize {
        self.vectors.len() / self.dimension
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, vectors: &VectorSet) -> Result<(), IndexError> {
        if vectors.is_empty() {
            return Err(IndexError::Training("no vectors".into()));
        }
        if vectors.dimension() != self.dimension {
            return Err(IndexError::Training(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vectors.dimension()
            )));
        }
        Ok(())
    }

    fn add(&mut self, vectors: &VectorSet) -> Result<(), IndexError> {
        check_dimension(self.dimension, vectors)?;
        self.vectors.extend_from_slice(vectors.as_slice());
        Ok(())
    }

    fn search(&self, queries: &VectorSet, k: usize) -> Result<SearchResults, IndexError> {
        check_dimension(self.dimension, queries)?;
        let mut results = SearchResults::with_capacity(queries.rows(), k);
        for query in queries.iter() {
            let mut top = TopK::new(k);
            for (id, vector) in self.vectors.chunks_exact(self.dimension).enumerate() {
                top.push(distance(query, vector, self.metric), id as i64);
            }
            results.push_row(top, self.metric);
        }
        Ok(results)
    }

    fn set_nprobe(&mut self, _nprobe: usize) {}

    fn write_to(&self, out: &mut dyn Write) -> Result<(), IndexError> {
        out.write_all(MAGIC)?;
        out.write_u32::<LittleEndian>(VERSION)?;
        out.write_u32::<LittleEndian>(self.dimension as u32)?;
        write_metric(out, self.metric)?;
        out.write_u64::<LittleEndian>(self.len() as u64)?;
        write_f32s(out, &self.vectors)
    }
}
