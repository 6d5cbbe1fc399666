//! Model backends: the uniform `{fit, predict, serialize, deserialize}` contract
//! and its two variants.
//!
//! Callers obtain a `Box<dyn ModelBackend>` from [`backend_for`] / [`backend_of`]
//! and never branch on which variant they hold. [`FittedState`] is opaque outside
//! this module; each backend only accepts the state it produced.

mod auto;
mod scaler;
mod svm;

use bincode::Options;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::common::error::{MlaasError, MlaasResult};
use crate::data::domain::Label;
use crate::features::FeatureVector;

use super::domain::{AutoConfig, BackendConfig, BackendKind, SvmConfig};

pub use auto::AutoClassifier;
pub use scaler::StandardScaler;
pub use svm::ScaledSvm;

/// Bumped whenever the serialized layout of [`FittedState`] changes.
const STATE_VERSION: u32 = 1;

pub trait ModelBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// `labels[i]` is the class of `features[i]`.
    fn fit(&self, features: &[FeatureVector], labels: &[Label]) -> MlaasResult<FittedState>;

    fn predict(&self, state: &FittedState, features: &FeatureVector) -> MlaasResult<Label>;

    fn serialize(&self, state: &FittedState) -> MlaasResult<Vec<u8>> {
        ensure_kind(self.kind(), state)?;
        Ok(codec().serialize(&(STATE_VERSION, state))?)
    }

    fn deserialize(&self, bytes: &[u8]) -> MlaasResult<FittedState> {
        let (version, state): (u32, FittedState) = codec().deserialize(bytes)?;
        if version != STATE_VERSION {
            return Err(MlaasError::invalid(format!(
                "fitted state version mismatch: expected {STATE_VERSION}, found {version}"
            )));
        }
        ensure_kind(self.kind(), &state)?;
        Ok(state)
    }
}

/// Backend configured for fitting.
pub fn backend_for(config: &BackendConfig) -> Box<dyn ModelBackend> {
    match config {
        BackendConfig::Auto(cfg) => Box::new(AutoClassifier::new(cfg.clone())),
        BackendConfig::ScaledSvm(cfg) => Box::new(ScaledSvm::new(cfg.clone())),
    }
}

/// Backend with default configuration; enough for predict and (de)serialize,
/// which read everything they need from the fitted state.
pub fn backend_of(kind: BackendKind) -> Box<dyn ModelBackend> {
    match kind {
        BackendKind::Auto => Box::new(AutoClassifier::new(AutoConfig::default())),
        BackendKind::ScaledSvm => Box::new(ScaledSvm::new(SvmConfig::default())),
    }
}

/// Trained parameters produced by `fit`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FittedState {
    n_samples: usize,
    n_features: usize,
    /// Sorted distinct labels seen during fit.
    classes: Vec<Label>,
    params: FittedParams,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum FittedParams {
    Auto(auto::AutoParams),
    ScaledSvm(svm::SvmParams),
}

impl FittedState {
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn classes(&self) -> &[Label] {
        &self.classes
    }

    pub fn kind(&self) -> BackendKind {
        match self.params {
            FittedParams::Auto(_) => BackendKind::Auto,
            FittedParams::ScaledSvm(_) => BackendKind::ScaledSvm,
        }
    }

    /// Human-facing description of what was fitted.
    pub fn details(&self) -> ModelDetails {
        match &self.params {
            FittedParams::Auto(p) => p.details(),
            FittedParams::ScaledSvm(p) => p.details(),
        }
    }

    fn check_input(&self, features: &FeatureVector) -> MlaasResult<()> {
        if features.len() != self.n_features {
            return Err(MlaasError::invalid(format!(
                "feature vector has {} values, model expects {}",
                features.len(),
                self.n_features
            )));
        }
        Ok(())
    }
}

/// Effective parameters of a fitted model, reported in training summaries.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ModelDetails {
    Auto {
        selected: String,
        selection_accuracy: f64,
        validated: bool,
    },
    ScaledSvm {
        kernel: String,
        #[serde(rename = "C")]
        c: f64,
        gamma: String,
        gamma_value: f64,
        support_vectors: usize,
    },
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn ensure_kind(expected: BackendKind, state: &FittedState) -> MlaasResult<()> {
    if state.kind() != expected {
        return Err(MlaasError::invalid(format!(
            "fitted state belongs to the {} backend, not {expected}",
            state.kind()
        )));
    }
    Ok(())
}

/// Validated training matrix with labels mapped onto class indices.
struct TrainingSet {
    x: Array2<f64>,
    /// Index into `classes` for every row.
    y: Vec<usize>,
    classes: Vec<Label>,
}

impl TrainingSet {
    fn build(kind: BackendKind, features: &[FeatureVector], labels: &[Label]) -> MlaasResult<Self> {
        if features.len() != labels.len() {
            return Err(MlaasError::invalid(format!(
                "{} feature vectors but {} labels",
                features.len(),
                labels.len()
            )));
        }
        let n_features = features.first().map(FeatureVector::len).unwrap_or(0);
        if n_features == 0 {
            return Err(MlaasError::fit_failed(kind, "no training data"));
        }
        if features.iter().any(|f| f.len() != n_features) {
            return Err(MlaasError::invalid("feature vectors differ in length"));
        }

        let mut classes: Vec<Label> = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(MlaasError::fit_failed(
                kind,
                "at least two distinct labels are required",
            ));
        }

        let flat: Vec<f64> = features
            .iter()
            .flat_map(|f| f.as_slice().iter().copied())
            .collect();
        let x = Array2::from_shape_vec((features.len(), n_features), flat)
            .map_err(|e| MlaasError::fit_failed(kind, e.to_string()))?;
        let y = labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or_default())
            .collect();

        Ok(Self { x, y, classes })
    }

    fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    fn n_features(&self) -> usize {
        self.x.ncols()
    }
}
