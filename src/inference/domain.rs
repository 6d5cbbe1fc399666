//! Result type of the prediction path.

use serde::Serialize;

use crate::data::domain::{DatasetId, Label};
use crate::training::domain::BackendKind;

/// Label predicted for one image, with the model that produced it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub dsid: DatasetId,
    pub kind: BackendKind,
    pub label: Label,
    /// Size of the dataset the model was trained on.
    pub trained_on: usize,
}
