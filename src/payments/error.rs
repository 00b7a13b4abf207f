use crate::backend::error::ApiError;
use crate::cache::error::StoreError;
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// What the user can do next after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry,
    ReturnToDashboard,
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("nothing selected for payment")]
    EmptySelection,

    #[error("payment total must be greater than zero")]
    NonPositiveTotal,

    #[error("invalid exam payment amounts: {message}")]
    InvalidExamAmounts { message: String },

    #[error("a {operation} request is already in progress")]
    AlreadyInProgress { operation: &'static str },

    #[error("payment initialization returned no authorization URL")]
    MissingAuthorizationUrl,

    #[error("payment reference not found")]
    ReferenceNotFound,

    #[error("payment verification failed with status {status}")]
    VerificationFailed { reference: String, status: String },

    #[error("payment still pending after {attempts} verification attempts")]
    VerificationTimedOut { reference: String, attempts: u32 },

    #[error("receipt unavailable for completed payment {reference}")]
    ReceiptUnavailable { reference: String },

    #[error("verification cancelled")]
    Cancelled,

    #[error("checkout redirect failed: {message}")]
    Redirect { message: String },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentError {
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            PaymentError::ReferenceNotFound
            | PaymentError::VerificationFailed { .. }
            | PaymentError::ReceiptUnavailable { .. }
            | PaymentError::Cancelled => RecoveryAction::ReturnToDashboard,
            _ => RecoveryAction::Retry,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::EmptySelection => {
                "Select at least one item to pay for".to_string()
            }
            PaymentError::NonPositiveTotal => {
                "The amount to pay must be greater than zero".to_string()
            }
            PaymentError::InvalidExamAmounts { .. } => {
                "Enter a valid amount for each selected exam".to_string()
            }
            PaymentError::AlreadyInProgress { .. } => {
                "Your previous request is still being processed".to_string()
            }
            PaymentError::MissingAuthorizationUrl | PaymentError::Redirect { .. } => {
                "Failed to process payment. Please try again".to_string()
            }
            PaymentError::ReferenceNotFound => "Payment reference not found".to_string(),
            PaymentError::VerificationFailed { .. } => {
                "Payment verification failed. Please contact support if you were charged"
                    .to_string()
            }
            PaymentError::VerificationTimedOut { .. } => {
                "Payment confirmation is taking longer than expected. Please check again shortly"
                    .to_string()
            }
            PaymentError::ReceiptUnavailable { .. } => {
                "Payment received, but the receipt could not be loaded. Please contact support"
                    .to_string()
            }
            PaymentError::Cancelled => "Payment verification was cancelled".to_string(),
            PaymentError::Api(err) => err.user_message(),
            PaymentError::Store(_) => {
                "Failed to save payment details. Please try again".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_failures_return_to_dashboard() {
        assert_eq!(
            PaymentError::ReferenceNotFound.recovery_action(),
            RecoveryAction::ReturnToDashboard
        );
        assert_eq!(
            PaymentError::VerificationFailed {
                reference: "r".to_string(),
                status: "failed".to_string()
            }
            .recovery_action(),
            RecoveryAction::ReturnToDashboard
        );
    }

    #[test]
    fn transient_failures_offer_retry() {
        let err = PaymentError::from(ApiError::NetworkError {
            message: "refused".to_string(),
        });
        assert_eq!(err.recovery_action(), RecoveryAction::Retry);
        assert_eq!(
            PaymentError::MissingAuthorizationUrl.recovery_action(),
            RecoveryAction::Retry
        );
    }

    #[test]
    fn user_messages_are_generic() {
        let err = PaymentError::from(ApiError::HttpError {
            status: 500,
            message: "SQL syntax error near ...".to_string(),
            retryable: true,
        });
        assert!(!err.user_message().contains("SQL"));
    }
}
