//! Data domain: labeled samples, the document-store contract and ingestion.

pub mod domain;
pub mod repo_fs;
pub mod repo_mem;
pub mod service;

pub use domain::{DatasetId, DocumentStore, Label, LabeledSample, SampleId};
pub use repo_fs::FsDocStore;
pub use repo_mem::MemoryDocStore;
