//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Converge(#[from] converge::Error),

    #[error(transparent)]
    Telemetry(#[from] converge::telemetry::TelemetryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid arguments: {message}")]
    InvalidArgs { message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Error::InvalidArgs {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }
}
