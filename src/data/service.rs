//! Ingestion boundary: validates incoming samples before they reach the document store.

use tracing::{debug, info};

use crate::common::config::AppCfg;
use crate::common::error::{MlaasError, MlaasResult};

use super::domain::{DatasetId, DocumentStore, Label, LabeledSample, SampleId};

/// Store one labeled image, enforcing `1 <= dsid <= cfg.max_dsid`.
pub fn ingest(
    store: &dyn DocumentStore,
    cfg: &AppCfg,
    dsid: DatasetId,
    label: Label,
    image: Vec<u8>,
) -> MlaasResult<SampleId> {
    if dsid.raw() == 0 || dsid.raw() > cfg.max_dsid {
        return Err(MlaasError::invalid(format!(
            "dsid must be between 1 and {}, got {dsid}",
            cfg.max_dsid
        )));
    }
    if image.is_empty() {
        return Err(MlaasError::invalid("image payload is empty"));
    }

    let bytes = image.len();
    let id = store.insert_sample(LabeledSample::new(dsid, label, image))?;
    info!(dsid = %dsid, label, bytes, sample = %id, "labeled sample stored");
    Ok(id)
}

/// Samples of a dataset, truncated to `cfg.list_limit`.
pub fn list(
    store: &dyn DocumentStore,
    cfg: &AppCfg,
    dsid: DatasetId,
) -> MlaasResult<Vec<LabeledSample>> {
    let mut samples = store.find_samples(dsid)?;
    if samples.len() > cfg.list_limit {
        debug!(dsid = %dsid, total = samples.len(), limit = cfg.list_limit, "listing truncated");
        samples.truncate(cfg.list_limit);
    }
    Ok(samples)
}
