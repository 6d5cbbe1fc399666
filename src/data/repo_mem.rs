//! Process-local document store, used by tests and embedders without a database.

use std::sync::RwLock;

use crate::common::error::{MlaasError, MlaasResult};

use super::domain::{DatasetId, DocumentStore, LabeledSample, SampleId};

#[derive(Default)]
pub struct MemoryDocStore {
    samples: RwLock<Vec<(SampleId, LabeledSample)>>,
}

impl MemoryDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples across all datasets.
    pub fn len(&self) -> usize {
        self.samples.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for MemoryDocStore {
    fn find_samples(&self, dsid: DatasetId) -> MlaasResult<Vec<LabeledSample>> {
        let samples = self
            .samples
            .read()
            .map_err(|_| MlaasError::document_store("sample table poisoned"))?;
        Ok(samples
            .iter()
            .filter(|(_, s)| s.dsid == dsid)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn insert_sample(&self, sample: LabeledSample) -> MlaasResult<SampleId> {
        let mut samples = self
            .samples
            .write()
            .map_err(|_| MlaasError::document_store("sample table poisoned"))?;
        let id = SampleId::new(format!("mem-{:08}", samples.len()));
        samples.push((id.clone(), sample));
        Ok(id)
    }
}
