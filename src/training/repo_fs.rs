//! Filesystem repository for fitted model artifacts.
//!
//! One file per `(dsid, kind)`: `<models_dir>/<kind>_model_dsid<N>.mdl`, plus a
//! `dsid<N>.active` marker naming the kind most recently saved for the dsid.
//!
//! Artifact layout (little endian):
//!
//! | bytes  | field                         |
//! |--------|-------------------------------|
//! | 0..4   | magic `MLMD`                  |
//! | 4..6   | envelope version              |
//! | 6      | backend kind tag              |
//! | 7..15  | FNV-1a checksum of the payload|
//! | 15..   | backend-serialized state      |

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::config::AppCfg;
use crate::common::error::{MlaasError, MlaasResult};
use crate::common::ids;
use crate::data::domain::DatasetId;

use super::backend::{backend_of, FittedState};
use super::domain::{BackendKind, ModelStore};

const MAGIC: &[u8; 4] = b"MLMD";
const ENVELOPE_VERSION: u16 = 1;
const HEADER_LEN: usize = 15;

#[derive(Debug, Serialize, Deserialize)]
struct ActiveMarker {
    kind: BackendKind,
}

/// Persist fitted models on the local filesystem.
pub struct FsModelStore {
    root: PathBuf,
    tmp_seq: AtomicU64,
}

impl FsModelStore {
    pub fn new(cfg: &AppCfg) -> Self {
        Self::with_root(cfg.models_dir())
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tmp_seq: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic artifact location for `(dsid, kind)`.
    pub fn artifact_path(&self, dsid: DatasetId, kind: BackendKind) -> PathBuf {
        self.root
            .join(format!("{}_model_dsid{}.mdl", kind.as_str(), dsid.raw()))
    }

    fn marker_path(&self, dsid: DatasetId) -> PathBuf {
        self.root.join(format!("dsid{}.active", dsid.raw()))
    }

    /// Write `bytes` next to `path` under a unique name, then rename over it.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> MlaasResult<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact");
        let tmp = self.root.join(format!(
            ".{name}.{}.{}.tmp",
            std::process::id(),
            self.tmp_seq.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, bytes)
            .map_err(|e| MlaasError::io(format!("writing {}", tmp.display()), e))?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            MlaasError::io(format!("renaming onto {}", path.display()), e)
        })
    }

    fn encode(kind: BackendKind, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
        out.push(kind.tag());
        out.extend_from_slice(&ids::checksum(payload).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Validate the envelope and return the payload slice.
    fn decode<'a>(path: &Path, kind: BackendKind, bytes: &'a [u8]) -> MlaasResult<&'a [u8]> {
        if bytes.len() < HEADER_LEN {
            return Err(MlaasError::corrupt(path, "truncated header"));
        }
        let (header, payload) = bytes.split_at(HEADER_LEN);
        if &header[0..4] != MAGIC {
            return Err(MlaasError::corrupt(path, "bad magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != ENVELOPE_VERSION {
            return Err(MlaasError::corrupt(
                path,
                format!("unsupported envelope version {version}"),
            ));
        }
        match BackendKind::from_tag(header[6]) {
            Some(found) if found == kind => {}
            Some(found) => {
                return Err(MlaasError::corrupt(
                    path,
                    format!("holds a {found} model, expected {kind}"),
                ))
            }
            None => {
                return Err(MlaasError::corrupt(
                    path,
                    format!("unknown backend tag {}", header[6]),
                ))
            }
        }
        let mut sum = [0u8; 8];
        sum.copy_from_slice(&header[7..15]);
        if u64::from_le_bytes(sum) != ids::checksum(payload) {
            return Err(MlaasError::corrupt(path, "checksum mismatch"));
        }
        Ok(payload)
    }

    fn read_marker(&self, dsid: DatasetId) -> MlaasResult<Option<BackendKind>> {
        let path = self.marker_path(dsid);
        match fs::read(&path) {
            Ok(bytes) => {
                let marker: ActiveMarker = serde_json::from_slice(&bytes)
                    .map_err(|e| MlaasError::corrupt(&path, e.to_string()))?;
                Ok(Some(marker.kind))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MlaasError::io(format!("reading {}", path.display()), e)),
        }
    }

    /// Without a marker, the most recently written artifact is the active one.
    fn newest_artifact(&self, dsid: DatasetId) -> Option<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let meta = fs::metadata(self.artifact_path(dsid, kind)).ok()?;
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                Some((modified, kind))
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, kind)| kind)
    }
}

impl ModelStore for FsModelStore {
    fn save(
        &self,
        dsid: DatasetId,
        kind: BackendKind,
        state: &FittedState,
    ) -> MlaasResult<PathBuf> {
        let payload = backend_of(kind).serialize(state)?;
        fs::create_dir_all(&self.root)
            .map_err(|e| MlaasError::io(format!("creating {}", self.root.display()), e))?;

        let path = self.artifact_path(dsid, kind);
        let bytes = Self::encode(kind, &payload);
        self.write_atomic(&path, &bytes)?;

        // A same-kind retrain leaves the marker alone, so the artifact rename is its
        // only write. When switching kinds, a failed marker write keeps the old kind
        // active and the new artifact stays hidden.
        if self.read_marker(dsid).ok().flatten() != Some(kind) {
            let marker = serde_json::to_vec(&ActiveMarker { kind })
                .map_err(|e| MlaasError::invalid(format!("encoding marker: {e}")))?;
            self.write_atomic(&self.marker_path(dsid), &marker)?;
        }

        info!(
            dsid = %dsid,
            kind = %kind,
            bytes = bytes.len(),
            path = %path.display(),
            "model artifact saved"
        );
        Ok(path)
    }

    fn load(&self, dsid: DatasetId, kind: BackendKind) -> MlaasResult<FittedState> {
        let path = self.artifact_path(dsid, kind);
        let missing = || MlaasError::ArtifactMissing {
            dsid,
            kind,
            path: path.clone(),
        };

        if self.active_kind(dsid)? != Some(kind) {
            return Err(missing());
        }
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(missing()),
            Err(e) => return Err(MlaasError::io(format!("reading {}", path.display()), e)),
        };

        let payload = Self::decode(&path, kind, &bytes)?;
        let state = backend_of(kind)
            .deserialize(payload)
            .map_err(|e| MlaasError::corrupt(&path, e.to_string()))?;
        debug!(dsid = %dsid, kind = %kind, path = %path.display(), "model artifact loaded");
        Ok(state)
    }

    fn active_kind(&self, dsid: DatasetId) -> MlaasResult<Option<BackendKind>> {
        match self.read_marker(dsid)? {
            Some(kind) => Ok(Some(kind)),
            None => Ok(self.newest_artifact(dsid)),
        }
    }
}
