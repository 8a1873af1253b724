//! Per-attempt usage records.
//!
//! The gateway reports every prediction attempt, retries included, through a
//! UsageSink. This keeps the gateway independent of where records end up:
//! - the CLI uses TracingUsageSink
//! - tests use NoopUsageSink or a collecting sink

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of one prediction attempt.
#[derive(Debug, Clone)]
pub struct PredictionCallRecord {
    /// Provider name, e.g. "vertex".
    pub provider: &'static str,
    /// Versioned model identifier.
    pub model: String,
    /// One-based attempt number within a single invocation.
    pub attempt: u32,
    /// Prompt size in characters.
    pub prompt_chars: usize,
    /// Response size in characters (0 on error).
    pub response_chars: usize,
    /// Digest run this call belongs to (if any).
    pub run_id: Option<Uuid>,
    pub latency_ms: u64,
    pub status: CallStatus,
    /// [`PredictionError::code`](super::PredictionError::code) of a failed attempt.
    pub error_code: Option<String>,
    pub caller: &'static str,
    /// When the call finished.
    pub timestamp: DateTime<Utc>,
}

impl PredictionCallRecord {
    pub fn new(provider: &'static str, model: impl Into<String>, caller: &'static str) -> Self {
        Self {
            provider,
            model: model.into(),
            attempt: 1,
            prompt_chars: 0,
            response_chars: 0,
            run_id: None,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            timestamp: Utc::now(),
        }
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn sizes(mut self, prompt_chars: usize, response_chars: usize) -> Self {
        self.prompt_chars = prompt_chars;
        self.response_chars = response_chars;
        self
    }

    pub fn run(mut self, run_id: Option<Uuid>) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }
}

/// Destination for [`PredictionCallRecord`]s.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Must not fail the prediction; sinks swallow their own errors.
    async fn record(&self, record: PredictionCallRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: PredictionCallRecord) {}
}

/// Usage sink that emits each record as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: PredictionCallRecord) {
        tracing::info!(
            target: "digest_harness::usage",
            provider = record.provider,
            model = %record.model,
            attempt = record.attempt,
            prompt_chars = record.prompt_chars,
            response_chars = record.response_chars,
            run_id = ?record.run_id,
            latency_ms = record.latency_ms,
            status = record.status.as_str(),
            error_code = record.error_code.as_deref().unwrap_or(""),
            caller = record.caller,
            "prediction call"
        );
    }
}
