/// Wire-visible error classification. Each kind carries its HTTP status
/// and the `error.code` string of the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidApiKey,
    Forbidden,
    NotFound,
    ModelNotFound,
    BadRequest,
    RateLimitExceeded,
    ProviderError,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::InvalidApiKey => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound | ErrorKind::ModelNotFound => 404,
            ErrorKind::BadRequest => 400,
            ErrorKind::RateLimitExceeded => 429,
            ErrorKind::ProviderError => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::Internal => 500,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidApiKey => "invalid_api_key",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal_error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{}: {message}", kind.code())]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_api_key(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidApiKey, message)
    }

    pub fn model_not_found(public_name: &str) -> Self {
        Self::new(
            ErrorKind::ModelNotFound,
            format!("model not found: {public_name}"),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimitExceeded, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}
