//! Evaluation result types.

use serde::Serialize;

/// Agreement between predicted and expected labels.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct EvalReport {
    pub correct: usize,
    pub total: usize,
    /// `correct / total`, or 0 when nothing was scored.
    pub accuracy: f64,
}

impl EvalReport {
    pub fn new(correct: usize, total: usize) -> Self {
        let accuracy = if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        };
        Self {
            correct,
            total,
            accuracy,
        }
    }
}
