//! Vertex AI adapter for PaLM text and code predictions.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{ErrorContext, PredictionError};
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// A single request/response prediction call, with no retry of its own.
#[async_trait]
pub trait PredictionProvider: Send + Sync {
    fn name(&self) -> &'static str {
        "vertex"
    }

    async fn predict(&self, req: &PredictRequest) -> Result<PredictResponse, PredictionError>;
}

// =============================================================================
// VERTEX ADAPTER
// =============================================================================

/// Maximum allowed response body length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Wait suggested for a provider 429 that carries no `Retry-After`.
const DEFAULT_REMOTE_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Vertex AI `:predict` adapter.
#[derive(Debug, Clone)]
pub struct VertexAdapter {
    client: reqwest::Client,
    base_url: String,
    project: String,
    region: String,
    timeout: Duration,
}

impl VertexAdapter {
    /// Create for the regional public endpoint.
    pub fn new(
        access_token: impl Into<String>,
        project: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, PredictionError> {
        let region = region.into();
        let base_url = regional_base_url(&region);
        Self::with_config(access_token, base_url, project, region, DEFAULT_TIMEOUT)
    }

    /// Create from environment variables.
    ///
    /// `VERTEX_ACCESS_TOKEN` is required; project and region fall back to the
    /// `PROJECT` / `REGION` variables set by the hosting function.
    pub fn from_env() -> Result<Self, PredictionError> {
        let access_token = std::env::var("VERTEX_ACCESS_TOKEN")
            .map_err(|_| PredictionError::config("VERTEX_ACCESS_TOKEN not set"))?;

        let project = std::env::var("VERTEX_PROJECT")
            .or_else(|_| std::env::var("PROJECT"))
            .map_err(|_| PredictionError::config("VERTEX_PROJECT (or PROJECT) not set"))?;

        let region = std::env::var("VERTEX_REGION")
            .or_else(|_| std::env::var("REGION"))
            .map_err(|_| PredictionError::config("VERTEX_REGION (or REGION) not set"))?;

        let base_url =
            std::env::var("VERTEX_BASE_URL").unwrap_or_else(|_| regional_base_url(&region));

        let timeout = std::env::var("VERTEX_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Self::with_config(access_token, base_url, project, region, timeout)
    }

    /// Explicit endpoint and timeout; tests point `base_url` at a mock server.
    pub fn with_config(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
        project: impl Into<String>,
        region: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PredictionError> {
        let access_token = access_token.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| PredictionError::config("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| PredictionError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project: project.into(),
            region: region.into(),
            timeout,
        })
    }

    fn predict_url(&self, version: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:predict",
            self.base_url, self.project, self.region, version
        )
    }

    fn retry_after(headers: &HeaderMap) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REMOTE_RETRY_AFTER)
    }

    fn error_for_status(status: u16, headers: &HeaderMap, body: &str) -> PredictionError {
        let ctx = ErrorContext::new().with_status(status);
        let api_error = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(|e| e.error);

        let (message, provider_status) = match api_error {
            Some(e) => (
                e.message.unwrap_or_else(|| format!("HTTP {status}")),
                e.status,
            ),
            None => (format!("HTTP {status}"), None),
        };
        let ctx = match &provider_status {
            Some(s) => ctx.with_provider_status(s),
            None => ctx,
        };

        if provider_status.as_deref() == Some("RESOURCE_EXHAUSTED") {
            return PredictionError::resource_exhausted(message, Some(ctx));
        }

        match status {
            429 => PredictionError::rate_limited_remote(Self::retry_after(headers)),
            400..=499 => PredictionError::InvalidRequest {
                message,
                context: Some(ctx),
            },
            _ => PredictionError::provider_with_context("vertex", message, ctx),
        }
    }
}

/// Read the body, giving up once it passes [`MAX_RESPONSE_LEN`].
async fn read_capped(response: &mut reqwest::Response) -> Result<String, PredictionError> {
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if buf.len() + chunk.len() > MAX_RESPONSE_LEN {
            return Err(PredictionError::provider(
                "vertex",
                format!("response body exceeds {MAX_RESPONSE_LEN} bytes"),
            ));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn regional_base_url(region: &str) -> String {
    format!("https://{region}-aiplatform.googleapis.com/v1")
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct PredictApiRequest<'a> {
    instances: Vec<Map<String, Value>>,
    parameters: &'a PredictionParameters,
}

#[derive(Deserialize)]
struct PredictApiResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
struct Prediction {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, rename = "safetyAttributes")]
    safety_attributes: Option<Value>,
}

impl Prediction {
    fn blocked(&self) -> bool {
        self.safety_attributes
            .as_ref()
            .and_then(|s| s.get("blocked"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    status: Option<String>,
}

// =============================================================================
// PREDICTION PROVIDER IMPL
// =============================================================================

#[async_trait]
impl PredictionProvider for VertexAdapter {
    async fn predict(&self, req: &PredictRequest) -> Result<PredictResponse, PredictionError> {
        let start = Instant::now();

        let mut instance = Map::new();
        instance.insert(
            req.model.instance_field.as_str().to_string(),
            Value::String(req.prompt.clone()),
        );
        let api_req = PredictApiRequest {
            instances: vec![instance],
            parameters: &req.parameters,
        };

        let mut response = self
            .client
            .post(self.predict_url(&req.model.version))
            .json(&api_req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PredictionError::Timeout(self.timeout)
                } else {
                    PredictionError::Http(e)
                }
            })?;

        let status = response.status();
        let headers = response.headers().clone();

        let body = read_capped(&mut response).await?;

        if !status.is_success() {
            return Err(Self::error_for_status(status.as_u16(), &headers, &body));
        }

        let parsed: PredictApiResponse = serde_json::from_str(&body)
            .map_err(|e| PredictionError::provider("vertex", format!("Invalid JSON: {e}")))?;

        let prediction = parsed
            .predictions
            .into_iter()
            .next()
            .ok_or_else(|| PredictionError::provider("vertex", "No predictions in response"))?;

        let blocked = prediction.blocked();
        let text = prediction.content.unwrap_or_default();

        tracing::info!(
            model = %req.model.version,
            chars = text.len(),
            blocked,
            "response from {} model",
            req.model.model_type
        );

        Ok(PredictResponse {
            text,
            blocked,
            latency: start.elapsed(),
        })
    }
}
