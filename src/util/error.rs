//! Error types for the volcast library.

use thiserror::Error;

use crate::shader::{Backend, ShadingPass};

/// Broad classification of an [`Error`].
///
/// Configuration errors are fatal at startup. Resolution errors abort the
/// current render call. Device errors are reported once and leave the
/// fallback decision to the caller. Protocol errors abort the frame loop on
/// every rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Resolution,
    Device,
    Protocol,
    Io,
}

/// Main error type for volcast operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The same shader identity was committed twice
    #[error("Shader '{0}' already registered")]
    DuplicateShader(String),

    /// Partition tree requested for an empty cluster
    #[error("Invalid rank count: {0}")]
    InvalidRankCount(usize),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Malformed configuration document
    #[error("Invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),

    /// No shader registered under the identity
    #[error("Shader not found: {0}")]
    ShaderNotFound(String),

    /// Shader known, but the requested backend was never attached
    #[error("Shader '{shader}' has no {backend} backend")]
    BackendUnavailable { shader: String, backend: Backend },

    /// Backend entry point reported a failed pass
    #[error("Shader '{shader}' failed during {pass} pass")]
    ShadingFailed { shader: String, pass: ShadingPass },

    /// Timing vector does not cover every rank
    #[error("Timing vector has {got} entries, expected {expected}")]
    TimingLength { expected: usize, got: usize },

    /// No GPU adapter could be enumerated
    #[error("No GPU device available")]
    NoDevice,

    /// GPU device failure
    #[error("Device error: {0}")]
    Device(String),

    /// A rank failed to take part in a collective operation
    #[error("Cluster protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Create a configuration error from a string.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a protocol error from a string.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a device error from a string.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateShader(_)
            | Self::InvalidRankCount(_)
            | Self::Config(_)
            | Self::Json(_) => ErrorKind::Configuration,
            Self::ShaderNotFound(_)
            | Self::BackendUnavailable { .. }
            | Self::ShadingFailed { .. }
            | Self::TimingLength { .. } => ErrorKind::Resolution,
            Self::NoDevice | Self::Device(_) => ErrorKind::Device,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Io(_) | Self::Image(_) => ErrorKind::Io,
        }
    }

    /// Whether the error must stop the process before any frame is produced.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration | ErrorKind::Protocol)
    }
}

/// Result type alias for volcast operations.
pub type Result<T> = std::result::Result<T, Error>;
