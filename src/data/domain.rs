//! Core dataset definitions and the document-store contract.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::error::MlaasResult;

/// Dataset identifier (dsid). Scopes a group of labeled samples and the model trained on them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DatasetId(pub u32);

impl DatasetId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl From<u32> for DatasetId {
    fn from(value: u32) -> Self {
        DatasetId(value)
    }
}

impl From<DatasetId> for u32 {
    fn from(value: DatasetId) -> Self {
        value.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Class label attached to a sample.
pub type Label = i64;

/// Identifier assigned by the document store on insert.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SampleId(String);

impl SampleId {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One labeled image. Immutable once read into the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub dsid: DatasetId,
    pub label: Label,
    /// Encoded image bytes (PNG, JPEG, ...), exactly as submitted.
    pub image: Vec<u8>,
}

impl LabeledSample {
    pub fn new(dsid: DatasetId, label: Label, image: Vec<u8>) -> Self {
        Self { dsid, label, image }
    }
}

/// External document store holding the raw labeled samples.
pub trait DocumentStore: Send + Sync {
    /// All samples of a dataset, in insertion order.
    fn find_samples(&self, dsid: DatasetId) -> MlaasResult<Vec<LabeledSample>>;

    fn insert_sample(&self, sample: LabeledSample) -> MlaasResult<SampleId>;
}
