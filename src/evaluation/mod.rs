//! Accuracy scoring of fitted models.

pub mod domain;
pub mod service;

pub use domain::EvalReport;
