use thiserror::Error;

#[derive(Debug, Error)]
pub enum LcqpError {
    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Malformed bounds: {0}")]
    MalformedBounds(String),

    #[error("Non-finite data: {0}")]
    NonFinite(String),

    #[error("Hessian is not symmetric: {0}")]
    AsymmetricHessian(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("QP backend error: {0}")]
    Backend(String),

    #[error("Regularization failed: {0}")]
    Regularization(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LcqpError {
    /// True for errors caused by the problem data itself (as opposed to
    /// options, the backend or the environment).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            LcqpError::InvalidDimensions(_)
                | LcqpError::MalformedBounds(_)
                | LcqpError::AsymmetricHessian(_)
                | LcqpError::NonFinite(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LcqpError>;
