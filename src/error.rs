//! Error types for GhostRender

use thiserror::Error;

/// Result type alias for GhostRender operations
pub type Result<T> = std::result::Result<T, Error>;

/// GhostRender error type
#[derive(Error, Debug)]
pub enum Error {
    // Negotiation errors
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Incompatible colorspace: {0}")]
    IncompatibleColorspace(String),

    // Side data errors
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    // GPU resource errors
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    #[error("Shader '{name}' failed to compile: {reason}")]
    ShaderCompile { name: String, reason: String },

    // State machine errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // General errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Check if this error is recoverable without tearing down the stream
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MalformedMetadata(_)
                | Error::ShaderCompile { .. }
                | Error::IncompatibleColorspace(_)
        )
    }

    /// Check if this error moves the frame processor into its error state
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ResourceCreation(_))
    }
}
