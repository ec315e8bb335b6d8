/*!
 * Error types for the geodb client
 */

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GeoDbError>;

#[derive(Error, Debug)]
pub enum GeoDbError {
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Error returned by the server (or synthesized by tonic for network failures)
    #[error("gRPC status error: {0}")]
    Status(#[from] tonic::Status),

    #[error("Invalid endpoint {host}: {reason}")]
    InvalidEndpoint { host: String, reason: String },

    #[error("Invalid authorization metadata: {0}")]
    InvalidMetadata(#[from] tonic::metadata::errors::InvalidMetadataValue),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GeoDbError {
    /// The remote status, if this error came from a call
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            GeoDbError::Status(status) => Some(status),
            _ => None,
        }
    }

    /// The gRPC code of a call failure, `None` for local errors
    pub fn code(&self) -> Option<tonic::Code> {
        self.status().map(tonic::Status::code)
    }

    /// True when the metrics collectors were already registered
    pub fn is_registration_conflict(&self) -> bool {
        matches!(self, GeoDbError::Metrics(prometheus::Error::AlreadyReg))
    }
}

impl From<toml::de::Error> for GeoDbError {
    fn from(err: toml::de::Error) -> Self {
        GeoDbError::Config(err.to_string())
    }
}
