//! Client side of the school payment REST backend.

pub mod error;
pub mod http;
#[cfg(test)]
pub(crate) mod mock;
pub mod types;
pub mod utils;

use crate::auth::AuthContext;
use crate::backend::error::ApiResult;
use crate::backend::types::{
    Exam, ExamPaymentRequest, FeeCalculation, FeeCalculationRequest, InitializeResponse,
    PaymentKind, Receipt, SchoolFeePaymentRequest, StudentDirectory, StudentId, VerifyResponse,
};
use async_trait::async_trait;

pub use self::http::{BackendConfig, HttpBackend};

#[async_trait]
pub trait PortalBackend: Send + Sync {
    async fn list_students(&self, auth: &AuthContext) -> ApiResult<StudentDirectory>;

    async fn list_student_exams(
        &self,
        auth: &AuthContext,
        student_id: StudentId,
    ) -> ApiResult<Vec<Exam>>;

    async fn calculate_fees(
        &self,
        auth: &AuthContext,
        request: &FeeCalculationRequest,
    ) -> ApiResult<FeeCalculation>;

    async fn initialize_payment(
        &self,
        auth: &AuthContext,
        request: &SchoolFeePaymentRequest,
    ) -> ApiResult<InitializeResponse>;

    async fn initialize_exam_payment(
        &self,
        auth: &AuthContext,
        request: &ExamPaymentRequest,
    ) -> ApiResult<InitializeResponse>;

    async fn verify_payment(
        &self,
        auth: &AuthContext,
        kind: PaymentKind,
        reference: &str,
    ) -> ApiResult<VerifyResponse>;

    async fn fetch_receipt(
        &self,
        auth: &AuthContext,
        kind: PaymentKind,
        reference: &str,
    ) -> ApiResult<Receipt>;
}
