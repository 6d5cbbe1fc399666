//! Per-dataset model lifecycle engine for a classification service.
//!
//! Labeled images are grouped by dataset id; the engine extracts fixed-size
//! grayscale feature vectors, fits one classifier per dataset, persists it,
//! keeps it resident in memory and serves predictions against it.

pub mod api;
pub mod common;
pub mod data;
pub mod evaluation;
pub mod features;
pub mod inference;
pub mod training;

pub use api::Engine;
pub use common::{MlaasCode, MlaasError, MlaasResult};
pub use data::{DatasetId, Label};
pub use training::{BackendConfig, BackendKind};
