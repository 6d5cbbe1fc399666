//! Auto-selecting classifier.
//!
//! Features are always rescaled. Every candidate model family is fitted and scored;
//! the most accurate one (earliest on ties) is refitted on all samples and kept.
//! Datasets with at least `validation_threshold` samples are scored on a held-out
//! split, smaller ones on the training set itself.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::error::{MlaasError, MlaasResult};
use crate::data::domain::Label;
use crate::evaluation::service as evaluation;
use crate::features::FeatureVector;
use crate::training::domain::{AutoConfig, BackendKind};

use super::scaler::StandardScaler;
use super::{FittedParams, FittedState, ModelBackend, ModelDetails, TrainingSet};

const KIND: BackendKind = BackendKind::Auto;

pub struct AutoClassifier {
    config: AutoConfig,
}

impl AutoClassifier {
    pub fn new(config: AutoConfig) -> Self {
        Self { config }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Candidate {
    SoftmaxRegression,
    NearestCentroid,
}

impl Candidate {
    const ALL: [Candidate; 2] = [Candidate::SoftmaxRegression, Candidate::NearestCentroid];

    fn name(&self) -> &'static str {
        match self {
            Candidate::SoftmaxRegression => "softmax_regression",
            Candidate::NearestCentroid => "nearest_centroid",
        }
    }

    fn fit(&self, x: &Array2<f64>, y: &[usize], k: usize, cfg: &AutoConfig) -> MlaasResult<Model> {
        match self {
            Candidate::SoftmaxRegression => softmax_regression(x, y, k, cfg),
            Candidate::NearestCentroid => nearest_centroid(x, y, k),
        }
    }
}

/// A fitted candidate over standardized features.
#[derive(Clone, Debug, Serialize, Deserialize)]
enum Model {
    SoftmaxRegression {
        /// `[classes, features]`
        weights: Array2<f64>,
        bias: Array1<f64>,
    },
    NearestCentroid {
        /// `[classes, features]`
        centroids: Array2<f64>,
    },
}

impl Model {
    /// Index of the predicted class.
    fn predict(&self, x: ArrayView1<f64>) -> usize {
        match self {
            Model::SoftmaxRegression { weights, bias } => argmax((weights.dot(&x) + bias).view()),
            Model::NearestCentroid { centroids } => {
                let neg_dist: Array1<f64> = centroids
                    .axis_iter(Axis(0))
                    .map(|c| -c.iter().zip(x.iter()).map(|(a, b)| (a - b) * (a - b)).sum::<f64>())
                    .collect();
                argmax(neg_dist.view())
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(super) struct AutoParams {
    scaler: StandardScaler,
    model: Model,
    selected: String,
    selection_accuracy: f64,
    validated: bool,
}

impl AutoParams {
    pub(super) fn details(&self) -> ModelDetails {
        ModelDetails::Auto {
            selected: self.selected.clone(),
            selection_accuracy: self.selection_accuracy,
            validated: self.validated,
        }
    }
}

fn argmax(values: ArrayView1<f64>) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, v) in values.iter().enumerate() {
        if *v > best.1 {
            best = (i, *v);
        }
    }
    best.0
}

/// Full-batch gradient descent on the L2-regularized cross-entropy.
///
/// The step is `learning_rate / mean(|x|^2)`, which bounds it by the inverse
/// curvature of the loss, so convergence does not depend on the feature count.
fn softmax_regression(
    x: &Array2<f64>,
    y: &[usize],
    k: usize,
    cfg: &AutoConfig,
) -> MlaasResult<Model> {
    let (n, d) = x.dim();
    let mean_sq_norm = x.map_axis(Axis(1), |r| r.dot(&r)).mean().unwrap_or(1.0).max(1.0);
    let step = cfg.learning_rate / mean_sq_norm;

    let mut onehot = Array2::<f64>::zeros((n, k));
    for (i, &class) in y.iter().enumerate() {
        onehot[[i, class]] = 1.0;
    }

    let mut weights = Array2::<f64>::zeros((k, d));
    let mut bias = Array1::<f64>::zeros(k);
    for _ in 0..cfg.max_iterations {
        let mut probs = x.dot(&weights.t()) + &bias;
        for mut row in probs.rows_mut() {
            let max = row.fold(f64::NEG_INFINITY, |m, v| m.max(*v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        let residual = probs - &onehot;
        let grad_w = residual.t().dot(x) / n as f64 + &weights * cfg.l2;
        let grad_b = residual.sum_axis(Axis(0)) / n as f64;
        weights.scaled_add(-step, &grad_w);
        bias.scaled_add(-step, &grad_b);
    }

    if weights.iter().chain(bias.iter()).any(|v| !v.is_finite()) {
        return Err(MlaasError::fit_failed(KIND, "softmax regression diverged"));
    }
    Ok(Model::SoftmaxRegression { weights, bias })
}

fn nearest_centroid(x: &Array2<f64>, y: &[usize], k: usize) -> MlaasResult<Model> {
    let mut centroids = Array2::<f64>::zeros((k, x.ncols()));
    let mut counts = vec![0usize; k];
    for (row, &class) in x.axis_iter(Axis(0)).zip(y) {
        let mut c = centroids.row_mut(class);
        c += &row;
        counts[class] += 1;
    }
    for (mut c, &count) in centroids.axis_iter_mut(Axis(0)).zip(&counts) {
        if count == 0 {
            return Err(MlaasError::fit_failed(KIND, "a class has no samples"));
        }
        c /= count as f64;
    }
    Ok(Model::NearestCentroid { centroids })
}

/// Row indices for fitting and scoring candidates, plus whether they differ.
fn selection_split(y: &[usize], k: usize, cfg: &AutoConfig) -> (Vec<usize>, Vec<usize>, bool) {
    let all: Vec<usize> = (0..y.len()).collect();
    if y.len() < cfg.validation_threshold {
        return (all.clone(), all, false);
    }

    let (valid, train): (Vec<usize>, Vec<usize>) = all
        .into_iter()
        .partition(|i| i % cfg.validation_every == cfg.validation_every - 1);

    let mut seen = vec![false; k];
    for &i in &train {
        seen[y[i]] = true;
    }
    if seen.iter().all(|s| *s) {
        (train, valid, true)
    } else {
        // the split starved a class; fall back to scoring on everything
        let all: Vec<usize> = (0..y.len()).collect();
        (all.clone(), all, false)
    }
}

impl ModelBackend for AutoClassifier {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn fit(&self, features: &[FeatureVector], labels: &[Label]) -> MlaasResult<FittedState> {
        self.config.validate()?;
        let set = TrainingSet::build(KIND, features, labels)?;
        let scaler = StandardScaler::fit(&set.x)
            .ok_or_else(|| MlaasError::fit_failed(KIND, "no training data"))?;
        let x = scaler.transform(&set.x);
        let k = set.classes.len();

        let (fit_rows, score_rows, validated) = selection_split(&set.y, k, &self.config);
        let x_fit = x.select(Axis(0), &fit_rows);
        let y_fit: Vec<usize> = fit_rows.iter().map(|&i| set.y[i]).collect();
        let expected: Vec<usize> = score_rows.iter().map(|&i| set.y[i]).collect();

        let mut best: Option<(Candidate, f64, Model)> = None;
        for candidate in Candidate::ALL {
            let model = match candidate.fit(&x_fit, &y_fit, k, &self.config) {
                Ok(model) => model,
                Err(e) => {
                    warn!(candidate = candidate.name(), error = %e, "candidate failed to fit");
                    continue;
                }
            };
            let predicted: Vec<usize> = score_rows
                .iter()
                .map(|&i| model.predict(x.row(i)))
                .collect();
            let accuracy = evaluation::accuracy(&predicted, &expected).accuracy;
            debug!(candidate = candidate.name(), accuracy, validated, "candidate scored");
            if best.as_ref().map_or(true, |(_, acc, _)| accuracy > *acc) {
                best = Some((candidate, accuracy, model));
            }
        }

        let (candidate, accuracy, model) =
            best.ok_or_else(|| MlaasError::fit_failed(KIND, "no candidate model could be fitted"))?;
        let model = if validated {
            candidate.fit(&x, &set.y, k, &self.config)?
        } else {
            model
        };

        Ok(FittedState {
            n_samples: set.n_samples(),
            n_features: set.n_features(),
            classes: set.classes,
            params: FittedParams::Auto(AutoParams {
                scaler,
                model,
                selected: candidate.name().to_string(),
                selection_accuracy: accuracy,
                validated,
            }),
        })
    }

    fn predict(&self, state: &FittedState, features: &FeatureVector) -> MlaasResult<Label> {
        let FittedParams::Auto(params) = &state.params else {
            return Err(MlaasError::invalid(format!(
                "fitted state belongs to the {} backend",
                state.kind()
            )));
        };
        state.check_input(features)?;

        let x = params
            .scaler
            .transform_row(ArrayView1::from(features.as_slice()));
        let index = params.model.predict(x.view());
        state
            .classes
            .get(index)
            .copied()
            .ok_or_else(|| MlaasError::invalid("fitted state has no class for the prediction"))
    }
}
