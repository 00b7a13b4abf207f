use crate::auth::AuthContext;
use crate::backend::error::{ApiError, ApiResult};
use crate::backend::types::{
    Exam, ExamList, ExamPaymentRequest, FeeCalculation, FeeCalculationRequest,
    InitializeResponse, PaymentKind, Receipt, SchoolFeePaymentRequest, StudentDirectory,
    StudentId, VerifyResponse,
};
use crate::backend::utils::BackendHttpClient;
use crate::backend::PortalBackend;
use crate::logging::mask_reference;
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_secs: 30,
            max_retries: 0,
        }
    }
}

/// `PortalBackend` over the school's REST API.
pub struct HttpBackend {
    config: BackendConfig,
    http: BackendHttpClient,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> ApiResult<Self> {
        Url::parse(&config.base_url).map_err(|e| ApiError::ValidationError {
            message: format!("invalid backend base URL {}: {}", config.base_url, e),
            field: Some("base_url".to_string()),
        })?;
        let http =
            BackendHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Base URL with `segments` appended, each percent-encoded as a
    /// single path segment.
    fn endpoint_url(&self, segments: &[&str]) -> ApiResult<Url> {
        let invalid = |message: String| ApiError::ValidationError {
            message,
            field: Some("base_url".to_string()),
        };
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| invalid(format!("invalid backend base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| invalid("backend base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn payment_url(&self, kind: PaymentKind, action: &str, reference: &str) -> ApiResult<Url> {
        let reference = Self::ensure_reference(reference)?;
        let family = match kind {
            PaymentKind::SchoolFees => "payments",
            PaymentKind::Exam => "exams",
        };
        self.endpoint_url(&["api", family, action, reference])
    }

    fn ensure_reference(reference: &str) -> ApiResult<&str> {
        let trimmed = reference.trim();
        if trimmed.is_empty() || trimmed.contains('/') || trimmed.chars().all(|c| c == '.') {
            return Err(ApiError::ValidationError {
                message: "payment reference is missing or malformed".to_string(),
                field: Some("reference".to_string()),
            });
        }
        Ok(trimmed)
    }

    async fn get_json<T: DeserializeOwned>(&self, auth: &AuthContext, url: &str) -> ApiResult<T> {
        self.http
            .request_json::<T, ()>(Method::GET, url, auth.access_token(), None)
            .await
    }

    async fn post_json<T, B>(&self, auth: &AuthContext, url: &str, body: Option<&B>) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.http
            .request_json(Method::POST, url, auth.access_token(), body)
            .await
    }
}

#[async_trait]
impl PortalBackend for HttpBackend {
    async fn list_students(&self, auth: &AuthContext) -> ApiResult<StudentDirectory> {
        let url = self.endpoint_url(&["api", "parents", auth.parent_id.as_str(), "students"])?;
        self.get_json(auth, url.as_str()).await
    }

    async fn list_student_exams(
        &self,
        auth: &AuthContext,
        student_id: StudentId,
    ) -> ApiResult<Vec<Exam>> {
        let mut url = Url::parse(&self.endpoint("/api/exams/get-student-exam-list")).map_err(
            |e| ApiError::ValidationError {
                message: format!("invalid exam list URL: {}", e),
                field: None,
            },
        )?;
        url.query_pairs_mut()
            .append_pair("student_id", &student_id.to_string());
        let list: ExamList = self.get_json(auth, url.as_str()).await?;
        Ok(list.exam_list)
    }

    async fn calculate_fees(
        &self,
        auth: &AuthContext,
        request: &FeeCalculationRequest,
    ) -> ApiResult<FeeCalculation> {
        self.post_json(auth, &self.endpoint("/api/fees/calculate-fees"), Some(request))
            .await
    }

    async fn initialize_payment(
        &self,
        auth: &AuthContext,
        request: &SchoolFeePaymentRequest,
    ) -> ApiResult<InitializeResponse> {
        let response: InitializeResponse = self
            .post_json(auth, &self.endpoint("/api/payments/initialize"), Some(request))
            .await?;
        info!(
            students = request.student_ids.len(),
            amount = %request.amount,
            "school fee payment initialized"
        );
        Ok(response)
    }

    async fn initialize_exam_payment(
        &self,
        auth: &AuthContext,
        request: &ExamPaymentRequest,
    ) -> ApiResult<InitializeResponse> {
        let response: InitializeResponse = self
            .post_json(auth, &self.endpoint("/api/exams/pay-for-exam"), Some(request))
            .await?;
        info!(
            student_id = request.student_id,
            exams = request.exam_payments.len(),
            amount = %request.amount,
            "exam payment initialized"
        );
        Ok(response)
    }

    async fn verify_payment(
        &self,
        auth: &AuthContext,
        kind: PaymentKind,
        reference: &str,
    ) -> ApiResult<VerifyResponse> {
        let url = self.payment_url(kind, "verify", reference)?;
        let response: VerifyResponse = self.post_json::<_, ()>(auth, url.as_str(), None).await?;
        info!(
            reference = %mask_reference(reference.trim()),
            status = %response.status,
            "payment verification polled"
        );
        Ok(response)
    }

    async fn fetch_receipt(
        &self,
        auth: &AuthContext,
        kind: PaymentKind,
        reference: &str,
    ) -> ApiResult<Receipt> {
        let url = self.payment_url(kind, "receipt", reference)?;
        self.get_json(auth, url.as_str()).await
    }
}
