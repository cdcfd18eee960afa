//! HTTP transport for the transform service.
//!
//! Maps transport-level failures onto the pipeline's error taxonomy:
//! 429/quota → rate limit, 401/403 → invalid credential (fatal), 5xx →
//! service-internal (retryable). The response body is returned as raw text;
//! structural validation belongs to the resilient decoder.

use crate::error::{LongformError, Result};
use crate::transform::service::{TransformRequest, TransformService};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transform service connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub endpoint: String,
    /// API key; when empty, `LONGFORM_API_KEY` is consulted at client build
    /// time.
    pub api_key: String,
    pub model: String,
    /// Ranked fallback model ids tried when the primary model is
    /// rate-limited mid-batch. Empty disables model escalation.
    pub fallback_models: Vec<String>,
    /// Transport-level request timeout in seconds. The pipeline applies its
    /// own per-invocation budget on top of this.
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            model: "transform-default".to_string(),
            fallback_models: Vec::new(),
            request_timeout_secs: 320,
        }
    }
}

/// reqwest-backed transform service client.
pub struct HttpTransformService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpTransformService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let api_key = if config.api_key.is_empty() {
            std::env::var("LONGFORM_API_KEY").map_err(|_| LongformError::InvalidCredential {
                message: "no API key configured and LONGFORM_API_KEY is unset".to_string(),
            })?
        } else {
            config.api_key.clone()
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LongformError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TransformService for HttpTransformService {
    async fn transform(&self, request: &TransformRequest) -> Result<String> {
        let url = format!("{}/v1/transform", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LongformError::ServiceInternal {
                        message: format!("transport timeout: {e}"),
                    }
                } else {
                    LongformError::ServiceInternal {
                        message: format!("transport error: {e}"),
                    }
                }
            })?;

        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(LongformError::RateLimited {
                    model_id: request.model_id.clone(),
                });
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(LongformError::InvalidCredential {
                    message: format!("service rejected credentials ({status})"),
                });
            }
            s if s.is_server_error() => {
                return Err(LongformError::ServiceInternal {
                    message: format!("service returned {status}"),
                });
            }
            s if !s.is_success() => {
                return Err(LongformError::Other(format!(
                    "unexpected status {status} from transform service"
                )));
            }
            _ => {}
        }

        let body = response.text().await.map_err(|e| LongformError::ServiceInternal {
            message: format!("failed reading response body: {e}"),
        })?;

        if body.trim().is_empty() {
            return Err(LongformError::EmptyResponse);
        }
        Ok(body)
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_config_defaults() {
        let config = ServiceConfig::default();
        assert!(config.fallback_models.is_empty());
        assert_eq!(config.request_timeout_secs, 320);
    }

    #[test]
    fn missing_key_is_an_invalid_credential_error() {
        // Ensure the env var is absent for this test.
        unsafe { std::env::remove_var("LONGFORM_API_KEY") };
        let config = ServiceConfig::default();
        let result = HttpTransformService::new(&config);
        assert!(matches!(
            result,
            Err(LongformError::InvalidCredential { .. })
        ));
    }

    #[test]
    fn explicit_key_builds_client() {
        let config = ServiceConfig {
            endpoint: "https://transform.example".to_string(),
            api_key: "k".to_string(),
            ..Default::default()
        };
        let service = HttpTransformService::new(&config).unwrap();
        assert_eq!(service.default_model(), "transform-default");
    }
}
