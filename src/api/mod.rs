//! Public entry points for the request layer.

pub mod engine;

pub use engine::Engine;
