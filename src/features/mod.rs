//! Feature extraction shared by training and prediction.

pub mod extractor;

pub use extractor::{FeatureExtractor, FeatureVector, CANONICAL_SIDE};
