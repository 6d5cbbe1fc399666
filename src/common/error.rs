//! Error handling primitives shared across the core.
//!
//! Every variant maps onto a stable [`MlaasCode`]; the request layer uses the
//! code to choose the client-visible status and never has to match on variants.

use std::path::PathBuf;

use thiserror::Error;

use crate::data::domain::DatasetId;
use crate::training::domain::BackendKind;

/// Stable error codes handed to the request layer.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MlaasCode {
    /// Image payload could not be decoded.
    Decode = 1,
    /// Dataset is below the trainability floor.
    InsufficientData = 2,
    /// No trained model exists for the dataset, neither cached nor stored.
    ModelUnavailable = 3,
    /// The numeric fit raised an error.
    BackendFitFailure = 4,
    /// Artifact read/write failure.
    StoreIoFailure = 5,
    /// Input or configuration failed validation.
    InvalidInput = 6,
    /// Catch-all for collaborator failures and bugs.
    Internal = 7,
}

impl MlaasCode {
    /// Whether the caller can fix the failure by changing its request.
    pub fn is_client_fault(self) -> bool {
        matches!(
            self,
            MlaasCode::Decode
                | MlaasCode::InsufficientData
                | MlaasCode::ModelUnavailable
                | MlaasCode::InvalidInput
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MlaasCode::Decode => "decode_error",
            MlaasCode::InsufficientData => "insufficient_data",
            MlaasCode::ModelUnavailable => "model_unavailable",
            MlaasCode::BackendFitFailure => "backend_fit_failure",
            MlaasCode::StoreIoFailure => "store_io_failure",
            MlaasCode::InvalidInput => "invalid_input",
            MlaasCode::Internal => "internal",
        }
    }
}

/// Canonical error type for the core.
#[derive(Error, Debug)]
pub enum MlaasError {
    /// The payload is not a valid image encoding.
    #[error("image decode failed")]
    Decode(#[source] image::ImageError),

    /// The dataset cannot be trained on.
    #[error("dataset {dsid} is not trainable: {reason}")]
    InsufficientData { dsid: DatasetId, reason: String },

    /// Nothing is cached or stored for the dataset (or not for the requested kind).
    #[error("no trained model available for dataset {dsid}")]
    ModelUnavailable { dsid: DatasetId },

    /// The underlying fit failed.
    #[error("{kind} fit failed: {message}")]
    BackendFit { kind: BackendKind, message: String },

    /// No artifact exists at the expected location.
    #[error("no {kind} artifact for dataset {dsid} at {}", path.display())]
    ArtifactMissing {
        dsid: DatasetId,
        kind: BackendKind,
        path: PathBuf,
    },

    /// Artifact read/write failure.
    #[error("artifact store: {context}")]
    StoreIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// An artifact exists but cannot be trusted.
    #[error("corrupt artifact {}: {reason}", path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    /// Binary codec failure while (de)serializing fitted state.
    #[error("fitted state codec")]
    Codec(#[from] bincode::Error),

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The document store collaborator failed.
    #[error("document store: {message}")]
    DocumentStore { message: String },

    #[error("worker pool is shut down")]
    WorkerUnavailable,
}

/// Result alias used throughout the crate.
pub type MlaasResult<T> = Result<T, MlaasError>;

impl MlaasError {
    /// Stable code for this error.
    pub fn code(&self) -> MlaasCode {
        match self {
            MlaasError::Decode(_) => MlaasCode::Decode,
            MlaasError::InsufficientData { .. } => MlaasCode::InsufficientData,
            MlaasError::ModelUnavailable { .. } => MlaasCode::ModelUnavailable,
            MlaasError::BackendFit { .. } => MlaasCode::BackendFitFailure,
            MlaasError::ArtifactMissing { .. }
            | MlaasError::StoreIo { .. }
            | MlaasError::CorruptArtifact { .. }
            | MlaasError::Codec(_) => MlaasCode::StoreIoFailure,
            MlaasError::InvalidInput { .. } => MlaasCode::InvalidInput,
            MlaasError::DocumentStore { .. } | MlaasError::WorkerUnavailable => {
                MlaasCode::Internal
            }
        }
    }

    /// Validation helper.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn insufficient(dsid: DatasetId, reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            dsid,
            reason: reason.into(),
        }
    }

    pub fn fit_failed(kind: BackendKind, message: impl Into<String>) -> Self {
        Self::BackendFit {
            kind,
            message: message.into(),
        }
    }

    /// Wrap an IO error with the operation that produced it.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::StoreIo {
            context: context.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn document_store(message: impl Into<String>) -> Self {
        Self::DocumentStore {
            message: message.into(),
        }
    }
}
