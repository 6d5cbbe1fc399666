//! Prediction pipeline: resolve the model, extract features, predict.
//!
//! Blocking; callers on an async runtime go through the worker pool.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::common::error::MlaasResult;
use crate::common::log::elapsed_ms;
use crate::data::domain::DatasetId;
use crate::features::FeatureExtractor;
use crate::training::backend::backend_of;
use crate::training::domain::{BackendKind, TrainedModel};

use super::cache::ModelCache;
use super::domain::Prediction;

/// Predict with whichever backend is active for `dsid`.
pub fn predict(
    cache: &ModelCache,
    extractor: &FeatureExtractor,
    dsid: DatasetId,
    payload: &[u8],
) -> MlaasResult<Prediction> {
    let start = Instant::now();
    let model = cache.get_or_load_active(dsid)?;
    run(&model, extractor, payload, start)
}

/// Predict with the `kind` model of `dsid`; another active kind is `ModelUnavailable`.
pub fn predict_with(
    cache: &ModelCache,
    extractor: &FeatureExtractor,
    dsid: DatasetId,
    kind: BackendKind,
    payload: &[u8],
) -> MlaasResult<Prediction> {
    let start = Instant::now();
    let model = cache.get_or_load(dsid, kind)?;
    run(&model, extractor, payload, start)
}

fn run(
    model: &Arc<TrainedModel>,
    extractor: &FeatureExtractor,
    payload: &[u8],
    start: Instant,
) -> MlaasResult<Prediction> {
    let features = extractor.extract(payload)?;
    let label = backend_of(model.kind).predict(&model.state, &features)?;
    debug!(
        dsid = %model.dsid,
        kind = %model.kind,
        label,
        elapsed_ms = elapsed_ms(start),
        "prediction"
    );
    Ok(Prediction {
        dsid: model.dsid,
        kind: model.kind,
        label,
        trained_on: model.n_samples(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::MlaasCode;
    use crate::training::repo_fs::FsModelStore;

    #[test]
    fn missing_model_is_reported_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(Arc::new(FsModelStore::with_root(dir.path())));
        let extractor = FeatureExtractor::default();

        let err = predict(&cache, &extractor, DatasetId(99), b"garbage").unwrap_err();
        assert_eq!(err.code(), MlaasCode::ModelUnavailable);
        let err = predict_with(&cache, &extractor, DatasetId(99), BackendKind::Auto, b"")
            .unwrap_err();
        assert_eq!(err.code(), MlaasCode::ModelUnavailable);
    }
}
