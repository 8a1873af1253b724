//! Prediction gateway: rate-limited, backoff-protected model calls.

pub mod backoff;
pub mod clock;
pub mod error;
pub mod rate_limit;
pub mod types;
pub mod usage;
pub mod vertex;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::registry::ModelHandle;
use usage::{PredictionCallRecord, UsageSink as UsageSinkTrait};
use vertex::{PredictionProvider, VertexAdapter};

pub use backoff::{BackoffPolicy, InvocationConfig, InvocationPolicy};
pub use clock::{Clock, ManualClock, TokioClock};
pub use error::{ErrorContext, PredictionError, RateLimitSource};
pub use rate_limit::RateLimiter;
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait PredictionGateway: Send + Sync {
    async fn predict(&self, req: PredictRequest) -> Result<PredictResponse, PredictionError>;
}

/// Provider wrapped in an [`InvocationPolicy`], reporting every attempt.
pub struct ProviderGateway<U: UsageSinkTrait> {
    provider: Arc<dyn PredictionProvider>,
    usage_sink: Arc<U>,
    policy: InvocationPolicy,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> PredictionGateway for ProviderGateway<U> {
    async fn predict(&self, req: PredictRequest) -> Result<PredictResponse, PredictionError> {
        ProviderGateway::predict(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, PredictionError> {
        let vertex = VertexAdapter::from_env()?;
        Ok(Self {
            provider: Arc::new(vertex),
            usage_sink,
            policy: InvocationPolicy::default(),
        })
    }

    pub fn with_policy(
        provider: Arc<dyn PredictionProvider>,
        usage_sink: Arc<U>,
        policy: InvocationPolicy,
    ) -> Self {
        Self {
            provider,
            usage_sink,
            policy,
        }
    }

    pub fn policy(&self) -> &InvocationPolicy {
        &self.policy
    }

    pub async fn predict(&self, req: PredictRequest) -> Result<PredictResponse, PredictionError> {
        let req = &req;
        let provider = &self.provider;
        let sink = &self.usage_sink;

        self.policy
            .invoke(move |attempt| async move {
                let start = Instant::now();
                let result = provider.predict(req).await;
                record_usage(
                    sink.as_ref(),
                    provider.name(),
                    req,
                    attempt,
                    &result,
                    start.elapsed(),
                )
                .await;
                result
            })
            .await
    }
}

async fn record_usage<U: UsageSinkTrait + ?Sized>(
    sink: &U,
    provider: &'static str,
    req: &PredictRequest,
    attempt: u32,
    result: &Result<PredictResponse, PredictionError>,
    elapsed: Duration,
) {
    let record = PredictionCallRecord::new(provider, &req.model.version, req.attribution.caller)
        .attempt(attempt)
        .run(req.attribution.run_id)
        .latency(elapsed.as_millis() as u64);

    let record = match result {
        Ok(resp) => record.sizes(req.prompt.len(), resp.text.len()),
        Err(err) => record.sizes(req.prompt.len(), 0).error(err.code()),
    };

    sink.record(record).await;
}

/// Send one prompt to `model` through `gateway` and return the narrative text.
pub async fn invoke(
    gateway: &dyn PredictionGateway,
    model: &ModelHandle,
    prompt: impl Into<String>,
    sampling: &SamplingConfig,
    attribution: Attribution,
) -> Result<String, PredictionError> {
    let req = PredictRequest::new(model.clone(), prompt, sampling, attribution);
    let resp = gateway.predict(req).await?;
    Ok(resp.text)
}
