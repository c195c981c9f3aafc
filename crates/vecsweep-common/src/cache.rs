//! On-disk index artifact cache.
//!
//! An artifact is identified by an [`ArtifactKey`]; its file name is a pure
//! function of the key, so the existence check and the write always agree.
//! Presence on disk is the only cache state: an interrupted sweep resumes by
//! finding the artifacts it already wrote.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::dataset::{database_vectors, VectorSet};
use crate::index::{IndexBackend, IndexError, VectorIndex};

/// Rows kept from a freshly generated database for the optional sanity check.
pub const SANITY_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub dimension: usize,
    pub database_rows: usize,
    /// Index variant tag, e.g. `flat` or `ivf100`.
    pub variant: String,
}

impl ArtifactKey {
    pub fn new(dimension: usize, database_rows: usize, backend: &dyn IndexBackend) -> Self {
        Self {
            dimension,
            database_rows,
            variant: backend.artifact_extension(),
        }
    }

    /// `trained_index_d{dimension}_db{rows in millions}M.{variant}`
    pub fn file_name(&self) -> String {
        format!(
            "trained_index_d{}_db{}M.{}",
            self.dimension,
            millions_label(self.database_rows),
            self.variant
        )
    }
}

/// Exact decimal rendering of `rows / 1_000_000` with trailing zeros dropped,
/// keeping one fractional digit: `10_000_000 -> "10.0"`, `1_000 -> "0.001"`,
/// `2_500_000 -> "2.5"`.
pub fn millions_label(rows: usize) -> String {
    let whole = rows / 1_000_000;
    let frac = rows % 1_000_000;
    if frac == 0 {
        return format!("{}.0", whole);
    }
    let digits = format!("{:06}", frac);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("index artifact {path} is corrupt: {reason}")]
    ArtifactCorrupt { path: PathBuf, reason: String },
    #[error("index artifact io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build index: {0}")]
    Build(#[from] IndexError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Loaded,
    Built { build_time: Duration },
}

pub struct ResolvedIndex {
    pub index: Box<dyn VectorIndex>,
    pub path: PathBuf,
    pub origin: Resolution,
    /// Leading database rows, only present when the index was just built.
    pub sample: Option<VectorSet>,
}

#[derive(Debug, Clone)]
pub struct IndexCache {
    dir: PathBuf,
}

impl IndexCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Loads the artifact for `key`, or builds it from seeded vectors and
    /// persists it. A present but undecodable artifact is an error, never a
    /// trigger for rebuilding.
    pub fn resolve(
        &self,
        key: &ArtifactKey,
        backend: &dyn IndexBackend,
        seed: u64,
    ) -> Result<ResolvedIndex, CacheError> {
        let path = self.path_for(key);
        if path.exists() {
            info!("Loading index from {}...", path.display());
            let index = self.load(key, backend, &path)?;
            return Ok(ResolvedIndex {
                index,
                path,
                origin: Resolution::Loaded,
                sample: None,
            });
        }

        info!(
            "Training new index (d={}, rows={})...",
            key.dimension, key.database_rows
        );
        let start = Instant::now();
        let database = database_vectors(key.database_rows, key.dimension, seed);
        let mut index = backend.create(key.dimension)?;
        index.train(&database)?;
        index.add(&database)?;
        let build_time = start.elapsed();
        let sample = database.head(SANITY_ROWS);
        drop(database);

        self.persist(index.as_ref(), &path)?;
        info!(
            "Index saved to {} (built in {:.2}s)",
            path.display(),
            build_time.as_secs_f64()
        );

        Ok(ResolvedIndex {
            index,
            path,
            origin: Resolution::Built { build_time },
            sample: Some(sample),
        })
    }

    fn load(
        &self,
        key: &ArtifactKey,
        backend: &dyn IndexBackend,
        path: &Path,
    ) -> Result<Box<dyn VectorIndex>, CacheError> {
        let file = File::open(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let index = backend
            .load(&mut reader)
            .map_err(|err| CacheError::ArtifactCorrupt {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;

        if index.dimension() != key.dimension || index.len() != key.database_rows {
            return Err(CacheError::ArtifactCorrupt {
                path: path.to_path_buf(),
                reason: format!(
                    "stale artifact holds d={} rows={}, key expects d={} rows={}",
                    index.dimension(),
                    index.len(),
                    key.dimension,
                    key.database_rows
                ),
            });
        }
        Ok(index)
    }

    /// Writes to a sibling temp file and renames it into place so an
    /// interrupted write never shows up under the real key. The temp file is
    /// removed if any step fails.
    fn persist(&self, index: &dyn VectorIndex, path: &Path) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut tmp_name = path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        debug!("Writing index to {}", tmp.display());

        let written = write_artifact(index, &tmp).and_then(|()| {
            fs::rename(&tmp, path).map_err(|source| CacheError::Io {
                path: path.to_path_buf(),
                source,
            })
        });
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written
    }
}

fn write_artifact(index: &dyn VectorIndex, tmp: &Path) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: tmp.to_path_buf(),
        source,
    };
    let file = File::create(tmp).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    index.write_to(&mut writer).map_err(|err| match err {
        IndexError::Io(source) => io_err(source),
        other => CacheError::Build(other),
    })?;
    writer.flush().map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexKind, IndexSpec, SearchResults};
    use crate::vector::DistanceMetric;
    use std::io::Read;

    #[test]
    fn millions_label_is_exact() {
        assert_eq!(millions_label(10_000_000), "10.0");
        assert_eq!(millions_label(1_000_000), "1.0");
        assert_eq!(millions_label(1_000), "0.001");
        assert_eq!(millions_label(2_500_000), "2.5");
        assert_eq!(millions_label(1), "0.000001");
        assert_ne!(millions_label(1_000_001), millions_label(1_000_010));
    }

    struct FullDisk;

    impl VectorIndex for FullDisk {
        fn kind(&self) -> IndexKind {
            IndexKind::Flat
        }
        fn dimension(&self) -> usize {
            4
        }
        fn metric(&self) -> DistanceMetric {
            DistanceMetric::InnerProduct
        }
        fn len(&self) -> usize {
            10
        }
        fn is_trained(&self) -> bool {
            true
        }
        fn train(&mut self, _vectors: &VectorSet) -> Result<(), IndexError> {
            Ok(())
        }
        fn add(&mut self, _vectors: &VectorSet) -> Result<(), IndexError> {
            Ok(())
        }
        fn search(&self, _queries: &VectorSet, k: usize) -> Result<SearchResults, IndexError> {
            Ok(SearchResults::with_capacity(0, k))
        }
        fn set_nprobe(&mut self, _nprobe: usize) {}
        fn write_to(&self, out: &mut dyn Write) -> Result<(), IndexError> {
            out.write_all(b"VSFL")?;
            Err(IndexError::from(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no space left on device",
            )))
        }
    }

    struct FullDiskBackend;

    impl IndexBackend for FullDiskBackend {
        fn create(&self, _dimension: usize) -> Result<Box<dyn VectorIndex>, IndexError> {
            Ok(Box::new(FullDisk))
        }
        fn load(&self, _input: &mut dyn Read) -> Result<Box<dyn VectorIndex>, IndexError> {
            Err(IndexError::Corrupt("unreadable".into()))
        }
        fn artifact_extension(&self) -> String {
            "flat".into()
        }
    }

    #[test]
    fn failed_write_is_io_and_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        let key = ArtifactKey::new(4, 10, &FullDiskBackend);

        let err = cache.resolve(&key, &FullDiskBackend, 1).err().expect("write fails");
        assert!(matches!(err, CacheError::Io { .. }), "got {}", err);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn file_name_binds_dimension_rows_and_variant() {
        let flat = IndexSpec::flat(DistanceMetric::InnerProduct);
        let ivf = IndexSpec::ivf(100, DistanceMetric::InnerProduct);
        let a = ArtifactKey::new(256, 10_000_000, &flat);
        assert_eq!(a.file_name(), "trained_index_d256_db10.0M.flat");
        assert_ne!(a.file_name(), ArtifactKey::new(1024, 10_000_000, &flat).file_name());
        assert_ne!(a.file_name(), ArtifactKey::new(256, 1_000_000, &flat).file_name());
        assert_ne!(a.file_name(), ArtifactKey::new(256, 10_000_000, &ivf).file_name());
    }
}
