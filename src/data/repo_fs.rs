//! Filesystem-backed document store.
//!
//! Layout: `<root>/ds<dsid>/<seq>-<checksum>.sample`, one bincode record per file.
//! The zero-padded sequence number keeps directory order equal to insertion order.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::common::config::AppCfg;
use crate::common::error::{MlaasError, MlaasResult};
use crate::common::ids::Fnv64;

use super::domain::{DatasetId, DocumentStore, LabeledSample, SampleId};

const SAMPLE_EXT: &str = "sample";

/// Document store rooted at `cfg.data_root/datasets`.
pub struct FsDocStore {
    root: PathBuf,
    // serializes sequence allocation within the process
    insert_lock: Mutex<()>,
}

impl FsDocStore {
    pub fn new(cfg: &AppCfg) -> Self {
        Self::with_root(cfg.datasets_dir())
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            insert_lock: Mutex::new(()),
        }
    }

    fn dataset_dir(&self, dsid: DatasetId) -> PathBuf {
        self.root.join(format!("ds{}", dsid.raw()))
    }

    fn sample_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(SAMPLE_EXT) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn next_seq(files: &[PathBuf]) -> u64 {
        files
            .iter()
            .filter_map(|p| p.file_stem()?.to_str()?.split('-').next()?.parse::<u64>().ok())
            .max()
            .map_or(0, |max| max + 1)
    }
}

impl DocumentStore for FsDocStore {
    fn find_samples(&self, dsid: DatasetId) -> MlaasResult<Vec<LabeledSample>> {
        let dir = self.dataset_dir(dsid);
        let files = match Self::sample_files(&dir) {
            Ok(files) => files,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MlaasError::document_store(format!(
                    "listing {}: {e}",
                    dir.display()
                )))
            }
        };

        files
            .iter()
            .map(|path| {
                let bytes = fs::read(path).map_err(|e| {
                    MlaasError::document_store(format!("reading {}: {e}", path.display()))
                })?;
                bincode::deserialize(&bytes).map_err(|e| {
                    MlaasError::document_store(format!("decoding {}: {e}", path.display()))
                })
            })
            .collect()
    }

    fn insert_sample(&self, sample: LabeledSample) -> MlaasResult<SampleId> {
        let dir = self.dataset_dir(sample.dsid);
        let encoded = bincode::serialize(&sample)
            .map_err(|e| MlaasError::document_store(format!("encoding sample: {e}")))?;

        let mut hasher = Fnv64::new();
        hasher.update(&sample.dsid.raw().to_le_bytes());
        hasher.update(&sample.label.to_le_bytes());
        hasher.update(&sample.image);

        let _guard = self
            .insert_lock
            .lock()
            .map_err(|_| MlaasError::document_store("insert lock poisoned"))?;

        fs::create_dir_all(&dir).map_err(|e| {
            MlaasError::document_store(format!("creating {}: {e}", dir.display()))
        })?;
        let files = Self::sample_files(&dir)
            .map_err(|e| MlaasError::document_store(format!("listing {}: {e}", dir.display())))?;

        let id = format!("{:010}-{}", Self::next_seq(&files), hasher.finish_hex());
        let path = dir.join(format!("{id}.{SAMPLE_EXT}"));
        let tmp = dir.join(format!(".{id}.tmp"));
        fs::write(&tmp, &encoded)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| MlaasError::document_store(format!("writing {}: {e}", path.display())))?;

        Ok(SampleId::new(id))
    }
}
