use thiserror::Error;

/// Error kinds surfaced by the scheduling core.
///
/// The variants mirror the status space of the service layer, so a core
/// error can be mapped to a wire status without inspection of the message.
#[derive(Debug, Error)]
pub enum DroverError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
    // Loader returned no usable data; callers retry after a short delay.
    #[error("Unknown: {0}")]
    Unknown(String),
}

impl DroverError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists(message.into())
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<String> for DroverError {
    fn from(message: String) -> Self {
        Self::Internal(message)
    }
}

impl From<&str> for DroverError {
    fn from(message: &str) -> Self {
        Self::Internal(message.to_string())
    }
}
