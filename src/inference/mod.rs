//! Inference: the model cache, the prediction pipeline and the worker pool that
//! keeps CPU bound work off the async runtime.

pub mod cache;
pub mod domain;
pub mod service;
pub mod workers;

pub use cache::ModelCache;
pub use domain::Prediction;
pub use workers::{JobHandle, Pool};
