use crate::backend::error::{ApiError, ApiResult};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Exponential delay before retry `attempt + 1`, capped at 30 seconds.
fn retry_delay(attempt: u32) -> Duration {
    1u64.checked_shl(attempt)
        .map(Duration::from_secs)
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

#[derive(Clone)]
pub struct BackendHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl BackendHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> ApiResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ApiError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    /// Sends a request and decodes a JSON body. Only GET requests are
    /// retried; payment POSTs are issued exactly once.
    pub async fn request_json<T, B>(
        &self,
        method: Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&B>,
    ) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let max_retries = if method == Method::GET {
            self.max_retries
        } else {
            0
        };

        let mut last_error = None;
        for attempt in 0..=max_retries {
            let request_id = Uuid::new_v4().to_string();
            let mut request = self
                .client
                .request(method.clone(), url)
                .timeout(self.timeout)
                .header(REQUEST_ID_HEADER, request_id.as_str());

            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            debug!(
                method = %method,
                url = %url,
                request_id = %request_id,
                attempt = attempt + 1,
                "backend request"
            );

            let response = request.send().await.map_err(|e| ApiError::NetworkError {
                message: format!("backend request failed: {}", e),
            });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            ApiError::InvalidResponse {
                                message: format!("invalid backend JSON response: {}", e),
                            }
                        });
                    }

                    if status == http::StatusCode::TOO_MANY_REQUESTS {
                        if attempt < max_retries {
                            tokio::time::sleep(retry_delay(attempt)).await;
                            continue;
                        }
                        return Err(ApiError::RateLimitError {
                            message: "backend rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            request_id = %request_id,
                            "backend server error, retrying"
                        );
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }

                    return Err(ApiError::HttpError {
                        status: status.as_u16(),
                        message: extract_message(&text).unwrap_or_else(|| status.to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_retries {
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(ApiError::NetworkError {
            message: "backend request failed".to_string(),
        }))
    }
}

/// Pulls a `message` field out of an error body, if the backend sent JSON.
fn extract_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.chars().take(200).collect())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_message_prefers_json_message() {
        assert_eq!(
            extract_message(r#"{"status":"error","message":"Student not found"}"#).as_deref(),
            Some("Student not found")
        );
    }

    #[test]
    fn extract_message_falls_back_to_text() {
        assert_eq!(
            extract_message("Bad Gateway").as_deref(),
            Some("Bad Gateway")
        );
        assert!(extract_message("   ").is_none());
    }

    #[test]
    fn retry_delay_doubles_up_to_cap() {
        assert_eq!(retry_delay(0), Duration::from_secs(1));
        assert_eq!(retry_delay(3), Duration::from_secs(8));
        assert_eq!(retry_delay(5), Duration::from_secs(30));
        assert_eq!(retry_delay(64), Duration::from_secs(30));
        assert_eq!(retry_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn client_builds_with_timeout() {
        assert!(BackendHttpClient::new(Duration::from_secs(5), 0).is_ok());
    }
}
