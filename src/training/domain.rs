//! Domain types for model training: backend kinds, their configuration and the
//! artifact-store contract.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::error::{MlaasError, MlaasResult};
use crate::data::domain::DatasetId;

use super::backend::{FittedState, ModelDetails};

/// Which interchangeable training/prediction implementation is in use for a dsid.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// General classifier that picks its own model family.
    Auto,
    /// Standardization followed by a support-vector classifier.
    ScaledSvm,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Auto, BackendKind::ScaledSvm];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Auto => "auto",
            BackendKind::ScaledSvm => "scaled_svm",
        }
    }

    /// Stable one-byte tag used in artifact headers.
    pub(crate) fn tag(&self) -> u8 {
        match self {
            BackendKind::Auto => 1,
            BackendKind::ScaledSvm => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(BackendKind::Auto),
            2 => Some(BackendKind::ScaledSvm),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = MlaasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "scaled_svm" | "svm" => Ok(BackendKind::ScaledSvm),
            other => Err(MlaasError::invalid(format!("unknown backend kind {other:?}"))),
        }
    }
}

/// Kernel of the support-vector stage.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SvmKernel {
    Linear,
    Rbf,
    Poly,
}

impl SvmKernel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SvmKernel::Linear => "linear",
            SvmKernel::Rbf => "rbf",
            SvmKernel::Poly => "poly",
        }
    }
}

impl fmt::Display for SvmKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SvmKernel {
    type Err = MlaasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(SvmKernel::Linear),
            "rbf" => Ok(SvmKernel::Rbf),
            "poly" => Ok(SvmKernel::Poly),
            "sigmoid" => Err(MlaasError::invalid("the sigmoid kernel is not supported")),
            other => Err(MlaasError::invalid(format!("unknown kernel {other:?}"))),
        }
    }
}

/// Kernel coefficient: a named heuristic or an explicit positive value.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GammaRepr", into = "GammaRepr")]
pub enum Gamma {
    /// `1 / (n_features * Var(X))` over the standardized training matrix.
    Scale,
    /// `1 / n_features`.
    Auto,
    Value(f64),
}

impl Gamma {
    /// Numeric gamma for a standardized training matrix with `n_features`
    /// columns and overall variance `variance`.
    pub fn resolve(&self, n_features: usize, variance: f64) -> f64 {
        let n = n_features.max(1) as f64;
        match *self {
            Gamma::Scale if variance > 0.0 => 1.0 / (n * variance),
            Gamma::Scale => 1.0,
            Gamma::Auto => 1.0 / n,
            Gamma::Value(v) => v,
        }
    }
}

impl fmt::Display for Gamma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gamma::Scale => f.write_str("scale"),
            Gamma::Auto => f.write_str("auto"),
            Gamma::Value(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for Gamma {
    type Err = MlaasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scale" => Ok(Gamma::Scale),
            "auto" => Ok(Gamma::Auto),
            other => {
                let v: f64 = other
                    .parse()
                    .map_err(|_| MlaasError::invalid(format!("invalid gamma {s:?}")))?;
                Gamma::try_from(GammaRepr::Value(v))
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GammaRepr {
    Value(f64),
    Name(String),
}

impl TryFrom<GammaRepr> for Gamma {
    type Error = MlaasError;

    fn try_from(repr: GammaRepr) -> Result<Self, Self::Error> {
        match repr {
            GammaRepr::Value(v) if v.is_finite() && v > 0.0 => Ok(Gamma::Value(v)),
            GammaRepr::Value(v) => Err(MlaasError::invalid(format!(
                "gamma must be a positive number, got {v}"
            ))),
            GammaRepr::Name(name) => name.parse(),
        }
    }
}

impl From<Gamma> for GammaRepr {
    fn from(gamma: Gamma) -> Self {
        match gamma {
            Gamma::Value(v) => GammaRepr::Value(v),
            named => GammaRepr::Name(named.to_string()),
        }
    }
}

/// Largest accepted `poly` kernel degree.
pub const MAX_POLY_DEGREE: u32 = 32;

/// Hyperparameters of the scaled SVM backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmConfig {
    pub kernel: SvmKernel,
    #[serde(rename = "C")]
    pub c: f64,
    pub gamma: Gamma,
    /// Polynomial degree; only used by the `poly` kernel.
    pub degree: u32,
    /// Independent term of the `poly` kernel.
    pub coef0: f64,
}

impl Default for SvmConfig {
    fn default() -> Self {
        Self {
            kernel: SvmKernel::Rbf,
            c: 1.0,
            gamma: Gamma::Scale,
            degree: 3,
            coef0: 0.0,
        }
    }
}

impl SvmConfig {
    /// Build from the loosely typed values a client submits.
    pub fn from_params(kernel: &str, c: f64, gamma: &str) -> MlaasResult<Self> {
        let cfg = Self {
            kernel: kernel.parse()?,
            c,
            gamma: gamma.parse()?,
            ..Self::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> MlaasResult<()> {
        if !(self.c.is_finite() && self.c > 0.0) {
            return Err(MlaasError::invalid(format!(
                "C must be a positive number, got {}",
                self.c
            )));
        }
        if let Gamma::Value(v) = self.gamma {
            if !(v.is_finite() && v > 0.0) {
                return Err(MlaasError::invalid(format!(
                    "gamma must be a positive number, got {v}"
                )));
            }
        }
        if !(1..=MAX_POLY_DEGREE).contains(&self.degree) {
            return Err(MlaasError::invalid(format!(
                "degree must be between 1 and {MAX_POLY_DEGREE}, got {}",
                self.degree
            )));
        }
        Ok(())
    }
}

/// Knobs of the auto-selecting backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoConfig {
    /// Gradient steps for the softmax-regression candidate.
    pub max_iterations: usize,
    /// Step size relative to the inverse mean squared row norm.
    pub learning_rate: f64,
    pub l2: f64,
    /// Datasets at least this large hold out a validation split.
    pub validation_threshold: usize,
    /// Every `validation_every`-th sample goes to the validation split.
    pub validation_every: usize,
}

impl Default for AutoConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            learning_rate: 1.0,
            l2: 1e-4,
            validation_threshold: 100,
            validation_every: 20,
        }
    }
}

impl AutoConfig {
    pub fn validate(&self) -> MlaasResult<()> {
        if self.max_iterations == 0 {
            return Err(MlaasError::invalid("max_iterations must be at least 1"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(MlaasError::invalid("learning_rate must be positive"));
        }
        if !(self.l2.is_finite() && self.l2 >= 0.0) {
            return Err(MlaasError::invalid("l2 must be non-negative"));
        }
        if self.validation_every < 2 {
            return Err(MlaasError::invalid("validation_every must be at least 2"));
        }
        Ok(())
    }
}

/// Backend selection plus its configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    Auto(AutoConfig),
    ScaledSvm(SvmConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Auto(_) => BackendKind::Auto,
            BackendConfig::ScaledSvm(_) => BackendKind::ScaledSvm,
        }
    }

    pub fn default_for(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Auto => BackendConfig::Auto(AutoConfig::default()),
            BackendKind::ScaledSvm => BackendConfig::ScaledSvm(SvmConfig::default()),
        }
    }

    pub fn validate(&self) -> MlaasResult<()> {
        match self {
            BackendConfig::Auto(cfg) => cfg.validate(),
            BackendConfig::ScaledSvm(cfg) => cfg.validate(),
        }
    }
}

/// A fitted model bound to its dataset. Held by exactly one cache slot.
#[derive(Clone, Debug)]
pub struct TrainedModel {
    pub dsid: DatasetId,
    pub kind: BackendKind,
    pub state: FittedState,
}

impl TrainedModel {
    pub fn new(dsid: DatasetId, kind: BackendKind, state: FittedState) -> Self {
        Self { dsid, kind, state }
    }

    /// Size of the dataset the model was fitted on.
    pub fn n_samples(&self) -> usize {
        self.state.n_samples()
    }
}

/// What a successful `train` reports back.
#[derive(Clone, Debug, Serialize)]
pub struct TrainingSummary {
    pub dsid: DatasetId,
    pub kind: BackendKind,
    pub samples: usize,
    pub classes: usize,
    pub artifact: PathBuf,
    /// Accuracy of the fitted model on its own training samples.
    pub training_accuracy: f64,
    pub elapsed_ms: u64,
    /// Effective hyperparameters (scaled SVM) or the selected model (auto).
    pub details: ModelDetails,
}

/// Durable persistence of fitted state keyed by `(dsid, kind)`.
pub trait ModelStore: Send + Sync {
    /// Persist atomically and mark `kind` as the active backend of `dsid`.
    fn save(&self, dsid: DatasetId, kind: BackendKind, state: &FittedState)
        -> MlaasResult<PathBuf>;

    /// Fails with `ArtifactMissing` when nothing (or only a stale kind) is stored.
    fn load(&self, dsid: DatasetId, kind: BackendKind) -> MlaasResult<FittedState>;

    /// Backend kind most recently saved for `dsid`, if any.
    fn active_kind(&self, dsid: DatasetId) -> MlaasResult<Option<BackendKind>>;
}
