//! Per-feature standardization to zero mean and unit variance.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Parameters are learned once from training data and reapplied verbatim at
/// prediction time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Population statistics per column. Constant columns get scale 1 so they map to 0.
    pub fn fit(x: &Array2<f64>) -> Option<Self> {
        let mean = x.mean_axis(Axis(0))?;
        let var = x.var_axis(Axis(0), 0.0);
        let scale = var
            .iter()
            .map(|v| {
                let s = v.sqrt();
                if s.is_finite() && s > 10.0 * f64::EPSILON {
                    s
                } else {
                    1.0
                }
            })
            .collect();
        Some(Self {
            mean: mean.to_vec(),
            scale,
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for mut row in out.rows_mut() {
            for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
                *v = (*v - m) / s;
            }
        }
        out
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        row.iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((v, m), s)| (v - m) / s)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standardizes_columns() {
        let x = array![[1.0, 10.0, 5.0], [3.0, 30.0, 5.0]];
        let scaler = StandardScaler::fit(&x).unwrap();
        let z = scaler.transform(&x);
        assert_eq!(z, array![[-1.0, -1.0, 0.0], [1.0, 1.0, 0.0]]);
    }

    #[test]
    fn prediction_rows_reuse_training_statistics() {
        let x = array![[0.0, 0.0], [2.0, 4.0]];
        let scaler = StandardScaler::fit(&x).unwrap();
        let sample = array![4.0, 2.0];
        // (4 - 1) / 1 and (2 - 2) / 2
        assert_eq!(scaler.transform_row(sample.view()), array![3.0, 0.0]);
    }

    #[test]
    fn empty_input_has_no_statistics() {
        let x = Array2::<f64>::zeros((0, 3));
        assert!(StandardScaler::fit(&x).is_none());
    }
}
