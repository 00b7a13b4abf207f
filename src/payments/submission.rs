//! Turns a fee summary or an exam selection into a hosted checkout session.

use super::error::{PaymentError, PaymentResult};
use super::{Checkout, CheckoutRedirect, InFlight};
use crate::auth::AuthContext;
use crate::backend::types::{
    ExamPaymentLine, ExamPaymentRequest, InitializeResponse, PaymentKind, SchoolFeePaymentRequest,
};
use crate::backend::PortalBackend;
use crate::cache::{PendingReceiptSnapshot, PendingReceipts, SnapshotExamLine, SnapshotStudent};
use crate::config::PaymentConfig;
use crate::logging::mask_reference;
use crate::services::exam_selection::ExamSelection;
use crate::services::fee_aggregator::FeeSummary;
use chrono::Utc;
use reqwest::Url;
use rust_decimal::Decimal;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct PaymentSubmitter {
    backend: Arc<dyn PortalBackend>,
    receipts: PendingReceipts,
    redirect: Arc<dyn CheckoutRedirect>,
    config: PaymentConfig,
    submitting: AtomicBool,
}

impl PaymentSubmitter {
    pub fn new(
        backend: Arc<dyn PortalBackend>,
        receipts: PendingReceipts,
        redirect: Arc<dyn CheckoutRedirect>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            backend,
            receipts,
            redirect,
            config,
            submitting: AtomicBool::new(false),
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Pay the school fees in `summary`, the last applied aggregator result.
    pub async fn submit_school_fees(
        &self,
        auth: &AuthContext,
        summary: &FeeSummary,
    ) -> PaymentResult<Checkout> {
        let _guard = InFlight::acquire(&self.submitting, "payment submission")?;

        if summary.student_ids.is_empty() {
            return Err(PaymentError::EmptySelection);
        }
        let amount = summary.display_total;
        if amount <= Decimal::ZERO {
            return Err(PaymentError::NonPositiveTotal);
        }

        let request = SchoolFeePaymentRequest {
            student_ids: summary.student_ids.clone(),
            amount,
            parent_id: auth.parent_id.clone(),
            payment_method: self.config.payment_method,
            description: self.config.description.clone(),
            student_fee_ids: summary.student_fee_ids(),
        };

        info!(
            students = request.student_ids.len(),
            amount = %amount,
            "initializing school fee payment"
        );
        let response = self.backend.initialize_payment(auth, &request).await?;

        let students = summary
            .student_ids
            .iter()
            .map(|&student_id| {
                let breakdown = summary
                    .calculation
                    .student_fees
                    .iter()
                    .find(|fees| fees.student_id == student_id)
                    .cloned();
                SnapshotStudent {
                    student_id,
                    name: breakdown.as_ref().and_then(|b| b.student_name.clone()),
                    breakdown,
                }
            })
            .collect();

        let snapshot = PendingReceiptSnapshot {
            snapshot_id: Uuid::new_v4(),
            reference: String::new(),
            kind: PaymentKind::SchoolFees,
            parent_id: auth.parent_id.clone(),
            created_at: Utc::now(),
            total_amount: amount,
            payment_method: self.config.payment_method,
            description: Some(self.config.description.clone()),
            students,
            exams: Vec::new(),
        };

        self.hand_off(PaymentKind::SchoolFees, response, snapshot).await
    }

    /// Pay for the exams currently in `selection`.
    pub async fn submit_exam_fees(
        &self,
        auth: &AuthContext,
        selection: &ExamSelection,
    ) -> PaymentResult<Checkout> {
        let _guard = InFlight::acquire(&self.submitting, "exam payment submission")?;

        let student_id = match selection.student_id() {
            Some(id) if !selection.is_empty() => id,
            _ => return Err(PaymentError::EmptySelection),
        };
        let amount = selection.calculate_total();
        if amount <= Decimal::ZERO {
            return Err(PaymentError::NonPositiveTotal);
        }
        if !selection.has_valid_payment_amounts() {
            return Err(PaymentError::InvalidExamAmounts {
                message: "every installment-eligible exam needs an amount above zero".to_string(),
            });
        }
        if let Some(entry) = selection
            .iter()
            .find(|e| e.payment_amount < Decimal::ZERO || e.payment_amount > e.exam.amount_due)
        {
            return Err(PaymentError::InvalidExamAmounts {
                message: format!(
                    "amount {} for exam {} is outside 0..={}",
                    entry.payment_amount, entry.exam.exam_id, entry.exam.amount_due
                ),
            });
        }

        let request = ExamPaymentRequest {
            student_id,
            exam_payments: selection
                .iter()
                .map(|entry| {
                    let add_on = entry.add_on_cost();
                    ExamPaymentLine {
                        exam_id: entry.exam.exam_id,
                        amount_paid: entry.payment_amount,
                        add_on_amount: (add_on > Decimal::ZERO).then_some(add_on),
                    }
                })
                .collect(),
            amount,
            payment_method: self.config.payment_method,
        };

        info!(
            student_id,
            exams = request.exam_payments.len(),
            amount = %amount,
            "initializing exam payment"
        );
        let response = self.backend.initialize_exam_payment(auth, &request).await?;

        let snapshot = PendingReceiptSnapshot {
            snapshot_id: Uuid::new_v4(),
            reference: String::new(),
            kind: PaymentKind::Exam,
            parent_id: auth.parent_id.clone(),
            created_at: Utc::now(),
            total_amount: amount,
            payment_method: self.config.payment_method,
            description: None,
            students: vec![SnapshotStudent {
                student_id,
                name: None,
                breakdown: None,
            }],
            exams: selection
                .iter()
                .map(|entry| SnapshotExamLine {
                    exam_id: entry.exam.exam_id,
                    exam_name: entry.exam.exam_name.clone(),
                    amount_paid: entry.payment_amount,
                    include_add_on: entry.add_on_cost() > Decimal::ZERO,
                    add_on_cost: entry.add_on_cost(),
                })
                .collect(),
        };

        self.hand_off(PaymentKind::Exam, response, snapshot).await
    }

    /// Store the snapshot under the issued reference and redirect.
    async fn hand_off(
        &self,
        kind: PaymentKind,
        response: InitializeResponse,
        mut snapshot: PendingReceiptSnapshot,
    ) -> PaymentResult<Checkout> {
        let data = response.data.unwrap_or_default();
        let Some(authorization_url) = data
            .authorization_url
            .filter(|url| !url.trim().is_empty())
        else {
            warn!(
                message = response.message.as_deref().unwrap_or(""),
                "payment initialization returned no authorization URL"
            );
            return Err(PaymentError::MissingAuthorizationUrl);
        };
        match Url::parse(&authorization_url) {
            Ok(url) if matches!(url.scheme(), "https" | "http") => {}
            Ok(url) => {
                return Err(PaymentError::Redirect {
                    message: format!("unsupported checkout URL scheme {}", url.scheme()),
                })
            }
            Err(e) => {
                return Err(PaymentError::Redirect {
                    message: format!("invalid checkout URL: {}", e),
                })
            }
        }
        let reference = data.reference.filter(|r| !r.trim().is_empty());

        match &reference {
            Some(reference) => {
                snapshot.reference = reference.clone();
                // The receipt can still be fetched from the backend later.
                if let Err(e) = self.receipts.save(&snapshot).await {
                    warn!(
                        reference = %mask_reference(reference),
                        error = %e,
                        "failed to store pending receipt snapshot"
                    );
                }
            }
            None => warn!("payment initialization returned no reference, snapshot skipped"),
        }

        let checkout = Checkout {
            kind,
            authorization_url,
            reference,
        };
        self.redirect.redirect(&checkout).await?;
        info!(
            reference = %checkout.reference.as_deref().map(mask_reference).unwrap_or_default(),
            "handed off to hosted checkout"
        );
        Ok(checkout)
    }
}
