//! Scriptable in-memory backend for flow tests.

use super::error::{ApiError, ApiResult};
use super::types::*;
use super::PortalBackend;
use crate::auth::AuthContext;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct MockBackend {
    pub fee_breakdowns: Mutex<HashMap<StudentId, StudentFeeBreakdown>>,
    pub fee_requests: Mutex<Vec<FeeCalculationRequest>>,
    pub fail_fees: AtomicBool,
    /// Delay applied to the first fee calculation only.
    pub first_fee_delay: Option<Duration>,
    pub checkout: Mutex<Option<CheckoutData>>,
    pub verify_script: Mutex<VecDeque<ApiResult<VerifyResponse>>>,
    pub receipt: Mutex<Option<Receipt>>,
    pub school_requests: Mutex<Vec<SchoolFeePaymentRequest>>,
    pub exam_requests: Mutex<Vec<ExamPaymentRequest>>,
    pub verify_calls: AtomicUsize,
    pub receipt_calls: AtomicUsize,
    pub calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fee_breakdown(self, breakdown: StudentFeeBreakdown) -> Self {
        self.fee_breakdowns
            .lock()
            .unwrap()
            .insert(breakdown.student_id, breakdown);
        self
    }

    pub fn with_slow_first_fee_calculation(self, delay: Duration) -> Self {
        Self {
            first_fee_delay: Some(delay),
            ..self
        }
    }

    pub fn fee_request_count(&self) -> usize {
        self.fee_requests.lock().unwrap().len()
    }

    pub fn with_checkout(self, url: Option<&str>, reference: Option<&str>) -> Self {
        *self.checkout.lock().unwrap() = Some(CheckoutData {
            authorization_url: url.map(str::to_string),
            reference: reference.map(str::to_string),
            access_code: None,
        });
        self
    }

    /// Queue verify statuses; once exhausted every call reports `pending`.
    pub fn with_statuses(self, statuses: &[&str]) -> Self {
        {
            let mut script = self.verify_script.lock().unwrap();
            for status in statuses {
                script.push_back(Ok(VerifyResponse {
                    status: status.to_string(),
                    message: None,
                }));
            }
        }
        self
    }

    pub fn with_verify_error(self, error: ApiError) -> Self {
        self.verify_script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn with_receipt(self, receipt: Receipt) -> Self {
        *self.receipt.lock().unwrap() = Some(receipt);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn initialize(&self) -> ApiResult<InitializeResponse> {
        let data = self.checkout.lock().unwrap().clone();
        Ok(InitializeResponse {
            status: Some(serde_json::Value::Bool(data.is_some())),
            message: None,
            data,
        })
    }
}

#[async_trait]
impl PortalBackend for MockBackend {
    async fn list_students(&self, _auth: &AuthContext) -> ApiResult<StudentDirectory> {
        self.record();
        Ok(StudentDirectory {
            parent: None,
            students: vec![],
        })
    }

    async fn list_student_exams(
        &self,
        _auth: &AuthContext,
        _student_id: StudentId,
    ) -> ApiResult<Vec<Exam>> {
        self.record();
        Ok(vec![])
    }

    async fn calculate_fees(
        &self,
        _auth: &AuthContext,
        request: &FeeCalculationRequest,
    ) -> ApiResult<FeeCalculation> {
        self.record();
        let call_index = {
            let mut requests = self.fee_requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if self.fail_fees.load(Ordering::SeqCst) {
            return Err(ApiError::NetworkError {
                message: "connection refused".to_string(),
            });
        }
        if let (Some(delay), 1) = (self.first_fee_delay, call_index) {
            tokio::time::sleep(delay).await;
        }
        let student_fees: Vec<StudentFeeBreakdown> = {
            let breakdowns = self.fee_breakdowns.lock().unwrap();
            request
                .student_ids
                .iter()
                .filter_map(|id| breakdowns.get(id).cloned())
                .collect()
        };
        let total_amount = student_fees.iter().map(|f| f.final_amount).sum();
        Ok(FeeCalculation {
            total_amount,
            student_fees,
        })
    }

    async fn initialize_payment(
        &self,
        _auth: &AuthContext,
        request: &SchoolFeePaymentRequest,
    ) -> ApiResult<InitializeResponse> {
        self.record();
        self.school_requests.lock().unwrap().push(request.clone());
        self.initialize()
    }

    async fn initialize_exam_payment(
        &self,
        _auth: &AuthContext,
        request: &ExamPaymentRequest,
    ) -> ApiResult<InitializeResponse> {
        self.record();
        self.exam_requests.lock().unwrap().push(request.clone());
        self.initialize()
    }

    async fn verify_payment(
        &self,
        _auth: &AuthContext,
        _kind: PaymentKind,
        _reference: &str,
    ) -> ApiResult<VerifyResponse> {
        self.record();
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.verify_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(VerifyResponse {
                    status: "pending".to_string(),
                    message: None,
                })
            })
    }

    async fn fetch_receipt(
        &self,
        _auth: &AuthContext,
        _kind: PaymentKind,
        reference: &str,
    ) -> ApiResult<Receipt> {
        self.record();
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        self.receipt.lock().unwrap().clone().ok_or(ApiError::HttpError {
            status: 404,
            message: format!("no receipt for {}", reference),
            retryable: false,
        })
    }
}
