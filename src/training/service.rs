//! Training pipeline: fetch samples, extract features, fit, persist, cache.
//!
//! Blocking. Callers serialize runs per dsid (see [`super::locks::DsidLocks`]) so the
//! cache and the stored artifact of a dataset always hold the same fit.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{info, warn};

use crate::common::error::{MlaasError, MlaasResult};
use crate::common::log::elapsed_ms;
use crate::data::domain::{DatasetId, DocumentStore, Label};
use crate::evaluation::service as evaluation;
use crate::features::{FeatureExtractor, FeatureVector};
use crate::inference::cache::ModelCache;

use super::backend::backend_for;
use super::domain::{BackendConfig, ModelStore, TrainedModel, TrainingSummary};

/// Minimum number of samples and of distinct labels a trainable dataset needs.
pub const MIN_SAMPLES: usize = 2;
pub const MIN_CLASSES: usize = 2;

/// Feature vectors paired with their labels, `labels[i]` belonging to `features[i]`.
#[derive(Clone, Debug)]
pub struct PreparedDataset {
    pub dsid: DatasetId,
    pub features: Vec<FeatureVector>,
    pub labels: Vec<Label>,
}

/// Fetch the samples of `dsid`, check trainability and extract features.
pub fn prepare(
    docs: &dyn DocumentStore,
    extractor: &FeatureExtractor,
    dsid: DatasetId,
) -> MlaasResult<PreparedDataset> {
    let samples = docs.find_samples(dsid)?;
    if samples.len() < MIN_SAMPLES {
        return Err(MlaasError::insufficient(
            dsid,
            format!("{} sample(s), need at least {MIN_SAMPLES}", samples.len()),
        ));
    }
    let distinct: BTreeSet<Label> = samples.iter().map(|s| s.label).collect();
    if distinct.len() < MIN_CLASSES {
        return Err(MlaasError::insufficient(
            dsid,
            format!(
                "{} distinct label(s), need at least {MIN_CLASSES}",
                distinct.len()
            ),
        ));
    }

    let payloads: Vec<&[u8]> = samples.iter().map(|s| s.image.as_slice()).collect();
    let features = extractor.extract_all(&payloads)?;
    let labels = samples.iter().map(|s| s.label).collect();
    Ok(PreparedDataset {
        dsid,
        features,
        labels,
    })
}

/// Fit `config` on `data`, then write through the store and replace the cache entry.
///
/// Nothing is saved or cached when the fit fails.
pub fn fit_and_commit(
    data: &PreparedDataset,
    config: &BackendConfig,
    store: &dyn ModelStore,
    cache: &ModelCache,
    start: Instant,
) -> MlaasResult<TrainingSummary> {
    let dsid = data.dsid;
    let backend = backend_for(config);
    let kind = backend.kind();

    let state = backend
        .fit(&data.features, &data.labels)
        .map_err(|e| {
            warn!(dsid = %dsid, kind = %kind, error = %e, "fit failed");
            e
        })?;
    let report = evaluation::evaluate(backend.as_ref(), &state, &data.features, &data.labels)?;
    let artifact = store.save(dsid, kind, &state)?;

    let summary = TrainingSummary {
        dsid,
        kind,
        samples: state.n_samples(),
        classes: state.classes().len(),
        artifact,
        training_accuracy: report.accuracy,
        elapsed_ms: elapsed_ms(start),
        details: state.details(),
    };
    cache.put(dsid, TrainedModel::new(dsid, kind, state));

    info!(
        dsid = %dsid,
        kind = %kind,
        samples = summary.samples,
        classes = summary.classes,
        accuracy = summary.training_accuracy,
        path = %summary.artifact.display(),
        elapsed_ms = summary.elapsed_ms,
        "model trained"
    );
    Ok(summary)
}

/// Full training run for `dsid`.
pub fn train(
    docs: &dyn DocumentStore,
    extractor: &FeatureExtractor,
    store: &dyn ModelStore,
    cache: &ModelCache,
    dsid: DatasetId,
    config: &BackendConfig,
) -> MlaasResult<TrainingSummary> {
    let start = Instant::now();
    config.validate()?;
    let data = prepare(docs, extractor, dsid)?;
    fit_and_commit(&data, config, store, cache, start)
}
