//! Post-checkout payment verification
//!
//! After hosted checkout the user comes back with nothing but a payment
//! reference in the URL. The verifier polls the backend with exponential
//! backoff until the payment completes, fails, or the attempt budget runs
//! out, then loads the receipt. When the backend receipt is unavailable it
//! falls back to the snapshot written at submission time.

use super::error::{PaymentError, PaymentResult};
use super::InFlight;
use crate::auth::AuthContext;
use crate::backend::types::{PaymentKind, Receipt, VerificationStatus};
use crate::backend::PortalBackend;
use crate::cache::{PendingReceiptSnapshot, PendingReceipts};
use crate::config::VerificationConfig;
use crate::logging::mask_reference;
use reqwest::Url;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Query parameters that may carry the payment reference on redirect.
const REFERENCE_PARAMS: [&str; 2] = ["reference", "trxref"];

/// Observable verification progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationState {
    Verifying,
    /// Backend reported `pending`; another poll is scheduled.
    Pending { attempt: u32 },
    /// Still pending after enough attempts that the user should be told.
    TakingLonger { attempt: u32 },
    Completed,
    Failed,
    TimedOut,
}

impl VerificationState {
    pub fn can_transition_to(&self, next: &VerificationState) -> bool {
        use VerificationState::*;
        match self {
            Verifying | Pending { .. } => !matches!(next, Verifying),
            TakingLonger { .. } => !matches!(next, Verifying | Pending { .. }),
            // Terminal states - a new verification starts over
            Completed | Failed | TimedOut => matches!(next, Verifying),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VerificationState::Completed | VerificationState::Failed | VerificationState::TimedOut
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptSource {
    Backend(Receipt),
    /// Rendered from the locally stored submission snapshot.
    Snapshot(PendingReceiptSnapshot),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub reference: String,
    pub kind: PaymentKind,
    pub attempts: u32,
    pub receipt: ReceiptSource,
}

/// Pull the payment reference out of a post-checkout redirect URL.
/// Relative URLs such as `/payment/success?reference=..` are accepted.
pub fn reference_from_redirect(redirect_url: &str) -> PaymentResult<String> {
    let base = Url::parse("http://localhost/").map_err(|_| PaymentError::ReferenceNotFound)?;
    let url = base
        .join(redirect_url.trim())
        .map_err(|_| PaymentError::ReferenceNotFound)?;

    REFERENCE_PARAMS
        .iter()
        .find_map(|param| {
            url.query_pairs()
                .find(|(key, value)| key == *param && !value.trim().is_empty())
                .map(|(_, value)| value.trim().to_string())
        })
        .ok_or(PaymentError::ReferenceNotFound)
}

pub struct PaymentVerifier {
    backend: Arc<dyn PortalBackend>,
    receipts: PendingReceipts,
    config: VerificationConfig,
    verifying: AtomicBool,
    state_tx: watch::Sender<VerificationState>,
}

impl PaymentVerifier {
    pub fn new(
        backend: Arc<dyn PortalBackend>,
        receipts: PendingReceipts,
        config: VerificationConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(VerificationState::Verifying);
        Self {
            backend,
            receipts,
            config,
            verifying: AtomicBool::new(false),
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<VerificationState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> VerificationState {
        self.state_tx.borrow().clone()
    }

    fn transition(&self, next: VerificationState) {
        let current = self.state();
        if !current.can_transition_to(&next) {
            warn!(from = ?current, to = ?next, "unexpected verification state transition");
        }
        debug!(state = ?next, "verification state changed");
        self.state_tx.send_replace(next);
    }

    /// Verify the payment named in a redirect URL. A URL without a
    /// reference fails without touching the backend.
    pub async fn verify_redirect(
        &self,
        auth: &AuthContext,
        kind: PaymentKind,
        redirect_url: &str,
        cancel: watch::Receiver<bool>,
    ) -> PaymentResult<VerificationOutcome> {
        match reference_from_redirect(redirect_url) {
            Ok(reference) => self.verify(auth, kind, &reference, cancel).await,
            Err(e) => {
                warn!("redirect URL carries no payment reference");
                self.state_tx.send_replace(VerificationState::Failed);
                Err(e)
            }
        }
    }

    /// Poll until the payment leaves `pending`, then load its receipt.
    /// Setting `cancel` to true stops polling at the next suspension point.
    pub async fn verify(
        &self,
        auth: &AuthContext,
        kind: PaymentKind,
        reference: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> PaymentResult<VerificationOutcome> {
        let _guard = InFlight::acquire(&self.verifying, "verification")?;
        if reference.trim().is_empty() {
            self.state_tx.send_replace(VerificationState::Failed);
            return Err(PaymentError::ReferenceNotFound);
        }

        self.state_tx.send_replace(VerificationState::Verifying);
        info!(reference = %mask_reference(reference), kind = ?kind, "verifying payment");

        let result = self.poll(auth, kind, reference, &mut cancel).await;
        match &result {
            Ok(outcome) => {
                info!(
                    reference = %mask_reference(reference),
                    attempts = outcome.attempts,
                    "payment verified"
                );
                self.transition(VerificationState::Completed);
            }
            Err(PaymentError::VerificationTimedOut { attempts, .. }) => {
                warn!(
                    reference = %mask_reference(reference),
                    attempts,
                    "payment still pending, giving up"
                );
                self.transition(VerificationState::TimedOut);
            }
            Err(e) => {
                warn!(reference = %mask_reference(reference), error = %e, "verification failed");
                self.transition(VerificationState::Failed);
            }
        }
        result
    }

    async fn poll(
        &self,
        auth: &AuthContext,
        kind: PaymentKind,
        reference: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> PaymentResult<VerificationOutcome> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut delay = self.config.initial_delay;

        for attempt in 1..=max_attempts {
            if *cancel.borrow() {
                return Err(PaymentError::Cancelled);
            }

            match self.backend.verify_payment(auth, kind, reference).await {
                Ok(response) => match VerificationStatus::from(response.status.as_str()) {
                    VerificationStatus::Completed => {
                        let receipt = self.load_receipt(auth, kind, reference).await?;
                        return Ok(VerificationOutcome {
                            reference: reference.to_string(),
                            kind,
                            attempts: attempt,
                            receipt,
                        });
                    }
                    VerificationStatus::Failed(status) => {
                        return Err(PaymentError::VerificationFailed {
                            reference: reference.to_string(),
                            status,
                        });
                    }
                    VerificationStatus::Pending => {
                        debug!(attempt, "payment pending");
                    }
                },
                // Transient backend trouble counts as one more pending poll
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "verification request failed, will retry");
                }
                Err(e) => return Err(e.into()),
            }

            if attempt == max_attempts {
                break;
            }

            let next = if attempt >= self.config.slow_after_attempts {
                VerificationState::TakingLonger { attempt }
            } else {
                VerificationState::Pending { attempt }
            };
            self.transition(next);

            if wait_or_cancel(delay, cancel).await {
                return Err(PaymentError::Cancelled);
            }
            delay = (delay * 2).min(self.config.max_delay);
        }

        Err(PaymentError::VerificationTimedOut {
            reference: reference.to_string(),
            attempts: max_attempts,
        })
    }

    async fn load_receipt(
        &self,
        auth: &AuthContext,
        kind: PaymentKind,
        reference: &str,
    ) -> PaymentResult<ReceiptSource> {
        let error = match self.backend.fetch_receipt(auth, kind, reference).await {
            Ok(receipt) => return Ok(ReceiptSource::Backend(receipt)),
            Err(e) => e,
        };
        warn!(
            reference = %mask_reference(reference),
            error = %error,
            "receipt fetch failed, falling back to stored snapshot"
        );

        match self.receipts.load(reference).await {
            Ok(Some(snapshot)) => Ok(ReceiptSource::Snapshot(snapshot)),
            Ok(None) => Err(PaymentError::ReceiptUnavailable {
                reference: reference.to_string(),
            }),
            Err(e) => {
                warn!(error = %e, "failed to read pending receipt snapshot");
                Err(PaymentError::ReceiptUnavailable {
                    reference: reference.to_string(),
                })
            }
        }
    }

    /// The user has seen the receipt; drop its local snapshot.
    pub async fn acknowledge(&self, reference: &str) -> PaymentResult<()> {
        self.receipts.clear(reference).await?;
        debug!(reference = %mask_reference(reference), "pending receipt cleared");
        Ok(())
    }
}

/// Sleep for `delay`; returns true if cancelled first. A dropped sender
/// can no longer cancel, so the full delay is waited out.
async fn wait_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow() => return true,
                Ok(()) => continue,
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::error::ApiError;
    use crate::backend::mock::MockBackend;
    use crate::cache::{sample_snapshot, MemorySnapshotStore};
    use rust_decimal::Decimal;
    use std::sync::atomic::Ordering;
    use tokio::time::Instant;

    fn config() -> VerificationConfig {
        VerificationConfig {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_attempts: 4,
            slow_after_attempts: 2,
        }
    }

    fn receipts() -> PendingReceipts {
        PendingReceipts::new(
            Arc::new(MemorySnapshotStore::new(10)),
            Duration::from_secs(3600),
        )
    }

    fn verifier(backend: Arc<MockBackend>, receipts: PendingReceipts) -> PaymentVerifier {
        PaymentVerifier::new(backend, receipts, config())
    }

    fn receipt(reference: &str) -> Receipt {
        Receipt {
            reference: Some(reference.to_string()),
            students: vec![],
            fees: vec![],
            clubs: vec![],
            exams: vec![],
            total_amount: Decimal::from(75_000),
            payment_method: Some("card".to_string()),
            paid_at: None,
        }
    }

    fn never_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn auth() -> AuthContext {
        AuthContext::new("parent-1")
    }

    #[test]
    fn extracts_reference_from_redirect() {
        assert_eq!(
            reference_from_redirect("https://portal.test/payment/success?reference=T123").unwrap(),
            "T123"
        );
        assert_eq!(
            reference_from_redirect("/payment/success?trxref=T9&reference=").unwrap(),
            "T9"
        );
        assert!(matches!(
            reference_from_redirect("/payment/success?status=ok"),
            Err(PaymentError::ReferenceNotFound)
        ));
    }

    #[test]
    fn state_transitions() {
        use VerificationState::*;
        assert!(Verifying.can_transition_to(&Pending { attempt: 1 }));
        assert!(Pending { attempt: 1 }.can_transition_to(&Completed));
        assert!(!TakingLonger { attempt: 3 }.can_transition_to(&Pending { attempt: 4 }));
        assert!(!Completed.can_transition_to(&Failed));
        assert!(Failed.can_transition_to(&Verifying));
        assert!(TimedOut.is_terminal());
        assert!(!TakingLonger { attempt: 3 }.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_then_completed_renders_receipt() {
        let backend = Arc::new(
            MockBackend::new()
                .with_statuses(&["pending", "completed"])
                .with_receipt(receipt("REF-D")),
        );
        let verifier = verifier(backend.clone(), receipts());
        let started = Instant::now();

        let outcome = verifier
            .verify(&auth(), PaymentKind::SchoolFees, "REF-D", never_cancel())
            .await
            .expect("verification should succeed");

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.receipt, ReceiptSource::Backend(receipt("REF-D")));
        assert_eq!(verifier.state(), VerificationState::Completed);
        assert_eq!(backend.verify_calls.load(Ordering::SeqCst), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn redirect_without_reference_makes_no_calls() {
        let backend = Arc::new(MockBackend::new().with_statuses(&["completed"]));
        let verifier = verifier(backend.clone(), receipts());

        let result = verifier
            .verify_redirect(
                &auth(),
                PaymentKind::SchoolFees,
                "/payment/success",
                never_cancel(),
            )
            .await;

        assert!(matches!(result, Err(PaymentError::ReferenceNotFound)));
        assert_eq!(verifier.state(), VerificationState::Failed);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_with_backoff() {
        let backend = Arc::new(MockBackend::new());
        let verifier = verifier(backend.clone(), receipts());
        let mut states = verifier.subscribe();
        let started = Instant::now();
        let auth = auth();

        let watch_slow = async {
            states
                .wait_for(|s| matches!(s, VerificationState::TakingLonger { .. }))
                .await
                .map(|s| (*s).clone())
        };
        let (result, slow) = tokio::join!(
            verifier.verify(&auth, PaymentKind::Exam, "REF-T", never_cancel()),
            watch_slow
        );

        assert!(matches!(
            result,
            Err(PaymentError::VerificationTimedOut { attempts: 4, .. })
        ));
        assert_eq!(
            slow.expect("state channel open"),
            VerificationState::TakingLonger { attempt: 2 }
        );
        assert_eq!(verifier.state(), VerificationState::TimedOut);
        assert_eq!(backend.verify_calls.load(Ordering::SeqCst), 4);
        // 2s + 4s + 8s between the four polls
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(14) && elapsed < Duration::from_secs(15));
    }

    #[tokio::test]
    async fn other_status_is_terminal_failure() {
        let backend = Arc::new(MockBackend::new().with_statuses(&["abandoned"]));
        let verifier = verifier(backend.clone(), receipts());

        let result = verifier
            .verify(&auth(), PaymentKind::SchoolFees, "REF-F", never_cancel())
            .await;

        match result {
            Err(PaymentError::VerificationFailed { status, .. }) => assert_eq!(status, "abandoned"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(verifier.state(), VerificationState::Failed);
        assert_eq!(backend.verify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_is_polled_again() {
        let backend = Arc::new(
            MockBackend::new()
                .with_verify_error(ApiError::NetworkError {
                    message: "connection reset".to_string(),
                })
                .with_statuses(&["completed"])
                .with_receipt(receipt("REF-R")),
        );
        let verifier = verifier(backend.clone(), receipts());

        let outcome = verifier
            .verify(&auth(), PaymentKind::SchoolFees, "REF-R", never_cancel())
            .await
            .expect("verification should succeed");
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn receipt_falls_back_to_snapshot() {
        let receipts = receipts();
        let snapshot = sample_snapshot("REF-S");
        receipts.save(&snapshot).await.unwrap();
        let backend = Arc::new(MockBackend::new().with_statuses(&["completed"]));
        let verifier = verifier(backend.clone(), receipts.clone());

        let outcome = verifier
            .verify(&auth(), PaymentKind::Exam, "REF-S", never_cancel())
            .await
            .expect("verification should succeed");

        assert_eq!(outcome.receipt, ReceiptSource::Snapshot(snapshot));
        assert_eq!(backend.receipt_calls.load(Ordering::SeqCst), 1);

        verifier.acknowledge("REF-S").await.expect("ack should succeed");
        assert!(receipts.load("REF-S").await.unwrap().is_none());
        assert!(receipts.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_without_any_receipt_is_unavailable() {
        let backend = Arc::new(MockBackend::new().with_statuses(&["completed"]));
        let verifier = verifier(backend, receipts());

        let result = verifier
            .verify(&auth(), PaymentKind::SchoolFees, "REF-X", never_cancel())
            .await;
        assert!(matches!(result, Err(PaymentError::ReceiptUnavailable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let backend = Arc::new(MockBackend::new());
        let verifier = verifier(backend.clone(), receipts());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let auth = auth();

        let cancel = async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            cancel_tx.send_replace(true);
        };
        let (result, _) = tokio::join!(
            verifier.verify(&auth, PaymentKind::SchoolFees, "REF-C", cancel_rx),
            cancel
        );

        assert!(matches!(result, Err(PaymentError::Cancelled)));
        assert_eq!(backend.verify_calls.load(Ordering::SeqCst), 2);
    }
}
