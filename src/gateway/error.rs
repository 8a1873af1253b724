//! Error types for the prediction gateway.

use std::time::Duration;
use thiserror::Error;

/// Who refused the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitSource {
    /// Our call-admission policy refused the call.
    Local,
    /// The provider rejected the call for exceeding its rate.
    Remote,
}

/// Status details attached to provider responses.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub http_status: Option<u16>,
    /// Provider status string (e.g. "RESOURCE_EXHAUSTED").
    pub provider_status: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_provider_status(mut self, status: impl Into<String>) -> Self {
        self.provider_status = Some(status.into());
        self
    }
}

/// Errors that can occur when calling the prediction service.
#[derive(Debug, Error)]
pub enum PredictionError {
    /// Provider quota exhausted - retried with backoff.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Rate limited - retried with backoff.
    #[error("rate limited ({limit_source:?}), retry after {retry_after:?}")]
    RateLimited {
        retry_after: Duration,
        limit_source: RateLimitSource,
    },

    /// 4xx other than quota; the request itself is wrong.
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Any other provider failure - not retried.
    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        context: Option<ErrorContext>,
    },

    /// Request timed out.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing credentials, etc.).
    #[error("configuration error: {0}")]
    Config(String),

    /// Quota/rate failures persisted past the retry time budget.
    #[error("gave up after {attempts} attempts in {elapsed:?}: {source}")]
    RetryBudgetExhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: Box<PredictionError>,
    },
}

impl PredictionError {
    pub fn resource_exhausted(message: impl Into<String>, context: Option<ErrorContext>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
            context,
        }
    }

    pub fn rate_limited_local(retry_after: Duration) -> Self {
        Self::RateLimited {
            retry_after,
            limit_source: RateLimitSource::Local,
        }
    }

    /// Provider 429 without a quota status.
    pub fn rate_limited_remote(retry_after: Duration) -> Self {
        Self::RateLimited {
            retry_after,
            limit_source: RateLimitSource::Remote,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: None,
        }
    }

    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            context: None,
        }
    }

    pub fn provider_with_context(
        provider: &'static str,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the backoff policy may retry this error.
    ///
    /// Only quota and rate signals qualify; everything else propagates after
    /// a single attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. } | Self::RateLimited { .. })
    }

    /// Stable code for usage records and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::RateLimited {
                limit_source: RateLimitSource::Local,
                ..
            } => "rate_limited_local",
            Self::RateLimited {
                limit_source: RateLimitSource::Remote,
                ..
            } => "rate_limited_remote",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Provider { .. } => "provider_error",
            Self::Timeout(_) => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
            Self::RetryBudgetExhausted { .. } => "retry_budget_exhausted",
        }
    }

    /// HTTP and provider status, looking through retry exhaustion.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::ResourceExhausted { context, .. } => context.as_ref(),
            Self::InvalidRequest { context, .. } => context.as_ref(),
            Self::Provider { context, .. } => context.as_ref(),
            Self::RetryBudgetExhausted { source, .. } => source.context(),
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Http(_) | Self::Config(_) => None,
        }
    }
}
