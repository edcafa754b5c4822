use llmgate_common::{ErrorKind, GatewayError};

/// Translation-boundary errors (§4.B "Contracts / errors"). Every variant
/// maps onto one of the two error kinds the spec allows a translator to
/// raise; nothing else should escape this crate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranslateError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl TranslateError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<TranslateError> for GatewayError {
    fn from(value: TranslateError) -> Self {
        match value {
            TranslateError::BadRequest(message) => GatewayError::new(ErrorKind::BadRequest, message),
            TranslateError::Internal(message) => GatewayError::new(ErrorKind::GatewayError, message),
        }
    }
}
