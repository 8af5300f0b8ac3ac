use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorralError {
    #[error(transparent)]
    Core(#[from] drover::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::Error> for CorralError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for CorralError {
    fn from(e: toml::de::Error) -> Self {
        Self::DeserializationError(e.to_string())
    }
}

impl From<anyhow::Error> for CorralError {
    fn from(e: anyhow::Error) -> Self {
        Self::GenericError(e.to_string())
    }
}

impl From<String> for CorralError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(CorralError::GenericError(message))
}

// Goal-state actions surface errors through the core engine, which speaks
// the core error type.
impl From<CorralError> for drover::Error {
    fn from(e: CorralError) -> Self {
        match e {
            CorralError::Core(core) => core,
            other => drover::Error::Internal(other.to_string()),
        }
    }
}

impl CorralError {
    /// Process exit code of the CLI for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CorralError::Core(core) => match core {
                drover::Error::NotFound(_) => 2,
                drover::Error::InvalidArgument(_) | drover::Error::Unknown(_) => 3,
                drover::Error::AlreadyExists(_)
                | drover::Error::FailedPrecondition(_)
                | drover::Error::Unavailable(_) => 4,
                drover::Error::Internal(_) => 5,
            },
            _ => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CorralError::from(drover::Error::not_found("x")).exit_code(),
            2
        );
        assert_eq!(
            CorralError::from(drover::Error::invalid_argument("x")).exit_code(),
            3
        );
        assert_eq!(
            CorralError::from(drover::Error::failed_precondition("x")).exit_code(),
            4
        );
        assert_eq!(
            CorralError::from(drover::Error::internal("x")).exit_code(),
            5
        );
        assert_eq!(CorralError::GenericError("x".into()).exit_code(), 5);
    }
}
