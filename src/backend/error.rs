use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Backend error: status={status}, message={message}")]
    HttpError {
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Invalid backend response: {message}")]
    InvalidResponse { message: String },
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::ValidationError { .. } => false,
            ApiError::NetworkError { .. } => true,
            ApiError::RateLimitError { .. } => true,
            ApiError::HttpError { retryable, .. } => *retryable,
            ApiError::InvalidResponse { .. } => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::HttpError { status, .. } => Some(*status),
            ApiError::RateLimitError { .. } => Some(429),
            _ => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ApiError::ValidationError { message, .. } => message.clone(),
            ApiError::NetworkError { .. } => {
                "The school payment service is temporarily unreachable".to_string()
            }
            ApiError::RateLimitError { .. } => {
                "Too many requests. Please retry shortly".to_string()
            }
            ApiError::HttpError { status, .. } if *status == 401 || *status == 403 => {
                "Your session has expired. Please sign in again".to_string()
            }
            ApiError::HttpError { .. } | ApiError::InvalidResponse { .. } => {
                "The school payment service returned an error".to_string()
            }
        }
    }
}
