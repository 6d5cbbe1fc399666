//! Training: backend kinds and configuration, the two model backends, the
//! artifact store and the training pipeline.

pub mod backend;
pub mod domain;
pub mod locks;
pub mod repo_fs;
pub mod service;

pub use backend::{backend_for, backend_of, FittedState, ModelBackend, ModelDetails};
pub use domain::{
    AutoConfig, BackendConfig, BackendKind, Gamma, ModelStore, SvmConfig, SvmKernel,
    TrainedModel, TrainingSummary,
};
pub use locks::DsidLocks;
pub use repo_fs::FsModelStore;
