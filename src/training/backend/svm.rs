//! Standardization composed with a support-vector classifier.
//!
//! Machines are solved with `linfa-svm`; only the non-zero dual coefficients and
//! their (standardized) training rows are kept, so prediction evaluates the kernel
//! expansion directly and needs nothing from the solver at load time.
//! Two classes train a single machine. More classes train one machine per class
//! (one-vs-rest) and predict by the largest decision value.

use linfa::prelude::*;
use linfa_svm::Svm;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::error::{MlaasError, MlaasResult};
use crate::data::domain::Label;
use crate::features::FeatureVector;
use crate::training::domain::{BackendKind, Gamma, SvmConfig, SvmKernel};

use super::scaler::StandardScaler;
use super::{FittedParams, FittedState, ModelBackend, ModelDetails, TrainingSet};

const KIND: BackendKind = BackendKind::ScaledSvm;

pub struct ScaledSvm {
    config: SvmConfig,
}

impl ScaledSvm {
    pub fn new(config: SvmConfig) -> Self {
        Self { config }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(super) struct SvmParams {
    scaler: StandardScaler,
    kernel: KernelFn,
    machines: Vec<Machine>,
    settings: SvmSettings,
}

/// Hyperparameters as requested, kept for summaries.
///
/// `SvmConfig` accepts gamma as a name or a number through an untagged form,
/// which the binary codec cannot read back, so fitted state stores this instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct SvmSettings {
    kernel: SvmKernel,
    c: f64,
    gamma: GammaSetting,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
enum GammaSetting {
    Scale,
    Auto,
    Value(f64),
}

impl From<&SvmConfig> for SvmSettings {
    fn from(cfg: &SvmConfig) -> Self {
        let gamma = match cfg.gamma {
            Gamma::Scale => GammaSetting::Scale,
            Gamma::Auto => GammaSetting::Auto,
            Gamma::Value(v) => GammaSetting::Value(v),
        };
        Self {
            kernel: cfg.kernel,
            c: cfg.c,
            gamma,
        }
    }
}

impl From<GammaSetting> for Gamma {
    fn from(setting: GammaSetting) -> Self {
        match setting {
            GammaSetting::Scale => Gamma::Scale,
            GammaSetting::Auto => Gamma::Auto,
            GammaSetting::Value(v) => Gamma::Value(v),
        }
    }
}

/// Kernel with every coefficient resolved to a number.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
enum KernelFn {
    Linear,
    Rbf { gamma: f64 },
    Poly { gamma: f64, coef0: f64, degree: u32 },
}

impl KernelFn {
    fn resolve(cfg: &SvmConfig, x: &Array2<f64>) -> Self {
        let gamma = cfg.gamma.resolve(x.ncols(), overall_variance(x));
        match cfg.kernel {
            SvmKernel::Linear => KernelFn::Linear,
            SvmKernel::Rbf => KernelFn::Rbf { gamma },
            SvmKernel::Poly => KernelFn::Poly {
                gamma,
                coef0: cfg.coef0,
                degree: cfg.degree,
            },
        }
    }

    fn gamma(&self) -> f64 {
        match *self {
            KernelFn::Linear => 0.0,
            KernelFn::Rbf { gamma } | KernelFn::Poly { gamma, .. } => gamma,
        }
    }

    fn eval(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match *self {
            KernelFn::Linear => a.dot(&b),
            KernelFn::Rbf { gamma } => {
                let sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
                (-gamma * sq).exp()
            }
            KernelFn::Poly {
                gamma,
                coef0,
                degree,
            } => (gamma * a.dot(&b) + coef0).powi(degree as i32),
        }
    }

    /// Solve one binary problem; `targets[i]` marks row `i` as the positive class.
    fn solve(&self, x: &Array2<f64>, targets: Array1<bool>, c: f64) -> MlaasResult<Machine> {
        let params = Svm::<f64, bool>::params().pos_neg_weights(c, c);
        // linfa's polynomial kernel has no gamma; scaling the rows by sqrt(gamma)
        // turns (x.y + c)^d into (gamma x.y + c)^d.
        let (records, params) = match *self {
            KernelFn::Linear => (x.clone(), params.linear_kernel()),
            KernelFn::Rbf { gamma } => (x.clone(), params.gaussian_kernel(1.0 / gamma)),
            KernelFn::Poly {
                gamma,
                coef0,
                degree,
            } => (
                x.mapv(|v| v * gamma.sqrt()),
                params.polynomial_kernel(coef0, f64::from(degree)),
            ),
        };

        let dataset = Dataset::new(records, targets);
        let svm = params
            .fit(&dataset)
            .map_err(|e| MlaasError::fit_failed(KIND, e.to_string()))?;

        let mut alpha = Vec::new();
        let mut support = Vec::new();
        for (i, a) in svm.alpha.iter().enumerate() {
            if *a != 0.0 {
                alpha.push(*a);
                support.extend(x.row(i).iter().copied());
            }
        }
        Ok(Machine {
            alpha,
            support,
            rho: svm.rho,
        })
    }
}

/// One binary machine: `f(x) = sum_i alpha_i k(x, sv_i) - rho`, positive side first.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Machine {
    alpha: Vec<f64>,
    /// Support vectors, row-major.
    support: Vec<f64>,
    rho: f64,
}

impl Machine {
    fn decision(&self, kernel: &KernelFn, x: ArrayView1<f64>) -> MlaasResult<f64> {
        let sv = ArrayView2::from_shape((self.alpha.len(), x.len()), &self.support)
            .map_err(|e| MlaasError::invalid(format!("support vectors are malformed: {e}")))?;
        let sum: f64 = self
            .alpha
            .iter()
            .zip(sv.axis_iter(Axis(0)))
            .map(|(a, row)| a * kernel.eval(x, row))
            .sum();
        Ok(sum - self.rho)
    }
}

fn overall_variance(x: &Array2<f64>) -> f64 {
    let n = x.len();
    if n == 0 {
        return 0.0;
    }
    let mean = x.sum() / n as f64;
    x.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64
}

impl SvmParams {
    pub(super) fn details(&self) -> ModelDetails {
        ModelDetails::ScaledSvm {
            kernel: self.settings.kernel.to_string(),
            c: self.settings.c,
            gamma: Gamma::from(self.settings.gamma).to_string(),
            gamma_value: self.kernel.gamma(),
            support_vectors: self.machines.iter().map(|m| m.alpha.len()).sum(),
        }
    }
}

impl ModelBackend for ScaledSvm {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn fit(&self, features: &[FeatureVector], labels: &[Label]) -> MlaasResult<FittedState> {
        self.config.validate()?;
        let set = TrainingSet::build(KIND, features, labels)?;
        let scaler = StandardScaler::fit(&set.x)
            .ok_or_else(|| MlaasError::fit_failed(KIND, "no training data"))?;
        let x = scaler.transform(&set.x);
        let kernel = KernelFn::resolve(&self.config, &x);

        // binary: a single machine whose positive side is classes[1]
        let positives: Vec<usize> = if set.classes.len() == 2 {
            vec![1]
        } else {
            (0..set.classes.len()).collect()
        };
        let machines = positives
            .iter()
            .map(|&class| {
                let targets = set.y.iter().map(|&y| y == class).collect::<Array1<bool>>();
                kernel.solve(&x, targets, self.config.c)
            })
            .collect::<MlaasResult<Vec<_>>>()?;

        debug!(
            samples = set.n_samples(),
            classes = set.classes.len(),
            kernel = %self.config.kernel,
            gamma = kernel.gamma(),
            "svm machines solved"
        );

        Ok(FittedState {
            n_samples: set.n_samples(),
            n_features: set.n_features(),
            classes: set.classes,
            params: FittedParams::ScaledSvm(SvmParams {
                scaler,
                kernel,
                machines,
                settings: SvmSettings::from(&self.config),
            }),
        })
    }

    fn predict(&self, state: &FittedState, features: &FeatureVector) -> MlaasResult<Label> {
        let FittedParams::ScaledSvm(params) = &state.params else {
            return Err(MlaasError::invalid(format!(
                "fitted state belongs to the {} backend",
                state.kind()
            )));
        };
        state.check_input(features)?;

        let raw = ArrayView1::from(features.as_slice());
        let x = params.scaler.transform_row(raw);

        let index = if let [machine] = params.machines.as_slice() {
            usize::from(machine.decision(&params.kernel, x.view())? >= 0.0)
        } else {
            let mut best = (0, f64::NEG_INFINITY);
            for (class, machine) in params.machines.iter().enumerate() {
                let score = machine.decision(&params.kernel, x.view())?;
                if score > best.1 {
                    best = (class, score);
                }
            }
            best.0
        };

        state
            .classes
            .get(index)
            .copied()
            .ok_or_else(|| MlaasError::invalid("fitted state has no class for the decision"))
    }
}
