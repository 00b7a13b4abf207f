//! Payment submission and verification flows
//!
//! Both flows sit on the boundary between user actions and the backend:
//! they guard against re-entry, convert every failure into a
//! [`PaymentError`] with a recovery action, and keep the pending-receipt
//! snapshot store in step with the payment lifecycle.

pub mod error;
pub mod submission;
pub mod verification;

use crate::backend::types::PaymentKind;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

pub use error::{PaymentError, PaymentResult, RecoveryAction};
pub use submission::PaymentSubmitter;
pub use verification::{PaymentVerifier, ReceiptSource, VerificationOutcome, VerificationState};

/// A backend-issued hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub kind: PaymentKind,
    pub authorization_url: String,
    pub reference: Option<String>,
}

/// Hands the user off to hosted checkout: a full page redirect in a
/// browser, an external link on mobile, a printed URL in a terminal.
#[async_trait]
pub trait CheckoutRedirect: Send + Sync {
    async fn redirect(&self, checkout: &Checkout) -> PaymentResult<()>;
}

/// Redirect that only logs the checkout URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRedirect;

#[async_trait]
impl CheckoutRedirect for LogRedirect {
    async fn redirect(&self, checkout: &Checkout) -> PaymentResult<()> {
        info!(url = %checkout.authorization_url, "redirecting to hosted checkout");
        Ok(())
    }
}

/// Held for the duration of a flow; a second acquire fails until the
/// first guard is dropped, on every exit path.
pub(crate) struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlight<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool, operation: &'static str) -> PaymentResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PaymentError::AlreadyInProgress { operation })?;
        Ok(Self { flag })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_blocks_until_dropped() {
        let flag = AtomicBool::new(false);
        let guard = InFlight::acquire(&flag, "submission").expect("first acquire");
        assert!(matches!(
            InFlight::acquire(&flag, "submission"),
            Err(PaymentError::AlreadyInProgress { operation: "submission" })
        ));
        drop(guard);
        assert!(InFlight::acquire(&flag, "submission").is_ok());
    }
}
