//! Accuracy scoring used by model selection and training summaries.

use crate::common::error::{MlaasError, MlaasResult};
use crate::data::domain::Label;
use crate::features::FeatureVector;
use crate::training::backend::{FittedState, ModelBackend};

use super::domain::EvalReport;

/// Fraction of positions where `predicted` equals `expected`.
///
/// Only the common prefix is compared; callers pass equally long slices.
pub fn accuracy<T: PartialEq>(predicted: &[T], expected: &[T]) -> EvalReport {
    let total = predicted.len().min(expected.len());
    let correct = predicted
        .iter()
        .zip(expected)
        .filter(|(p, e)| p == e)
        .count();
    EvalReport::new(correct, total)
}

/// Score a fitted state on labeled feature vectors.
pub fn evaluate(
    backend: &dyn ModelBackend,
    state: &FittedState,
    features: &[FeatureVector],
    labels: &[Label],
) -> MlaasResult<EvalReport> {
    if features.len() != labels.len() {
        return Err(MlaasError::invalid(format!(
            "{} feature vectors but {} labels",
            features.len(),
            labels.len()
        )));
    }
    let predicted = features
        .iter()
        .map(|f| backend.predict(state, f))
        .collect::<MlaasResult<Vec<_>>>()?;
    Ok(accuracy(&predicted, labels))
}
