//! Core types for the prediction gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::caster::cast_opt;
use crate::registry::{ModelDescriptor, ModelHandle, SamplingCapability};

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution for usage records and debugging.
///
/// Every request through the gateway carries attribution so we know:
/// - Which digest run it belongs to (run_id)
/// - Which code path triggered it (caller)
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    /// Digest run this request is part of.
    pub run_id: Option<Uuid>,
    /// Which code path made this call, e.g. "pipeline::map" or "pipeline::reduce".
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

// =============================================================================
// SAMPLING
// =============================================================================

pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
pub const DEFAULT_TOP_K: u32 = 40;
pub const DEFAULT_TOP_P: f32 = 0.8;
pub const MAX_TOP_K: u32 = 40;

/// Sampling inputs exactly as the user typed them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSampling {
    #[serde(default)]
    pub temperature: Option<String>,
    #[serde(default)]
    pub max_output_tokens: Option<String>,
    #[serde(default)]
    pub top_k: Option<String>,
    #[serde(default)]
    pub top_p: Option<String>,
}

/// Validated sampling parameters for one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// In `[0, 1]`.
    pub temperature: f32,
    /// In `[1, model ceiling]`.
    pub max_output_tokens: u32,
    /// In `[1, 40]`; ignored by models without top-k support.
    pub top_k: u32,
    /// In `[0, 1]`; ignored by models without top-p support.
    pub top_p: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            top_k: DEFAULT_TOP_K,
            top_p: DEFAULT_TOP_P,
        }
    }
}

impl SamplingConfig {
    /// Build from raw user input, substituting defaults for anything missing,
    /// malformed or out of range for `model`.
    pub fn from_raw(raw: &RawSampling, model: &ModelDescriptor) -> Self {
        let ceiling = model.max_output_tokens;
        Self {
            temperature: cast_opt(raw.temperature.as_deref(), 0.0, 1.0, DEFAULT_TEMPERATURE),
            max_output_tokens: cast_opt(
                raw.max_output_tokens.as_deref(),
                1,
                ceiling,
                DEFAULT_MAX_OUTPUT_TOKENS.min(ceiling),
            ),
            top_k: cast_opt(raw.top_k.as_deref(), 1, MAX_TOP_K, DEFAULT_TOP_K),
            top_p: cast_opt(raw.top_p.as_deref(), 0.0, 1.0, DEFAULT_TOP_P),
        }
    }

    /// Wire parameters for a model with the given capability.
    pub fn parameters_for(&self, capability: SamplingCapability) -> PredictionParameters {
        match capability {
            SamplingCapability::Full => PredictionParameters {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                top_k: Some(self.top_k),
                top_p: Some(self.top_p),
            },
            SamplingCapability::TemperatureOnly => PredictionParameters {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                top_k: None,
                top_p: None,
            },
        }
    }
}

/// Parameters sent with a prediction, already routed by model capability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionParameters {
    pub temperature: f32,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

// =============================================================================
// PREDICTION TYPES
// =============================================================================

/// Request for a single text prediction.
#[derive(Debug, Clone)]
pub struct PredictRequest {
    /// Model to call.
    pub model: ModelHandle,
    /// Fully rendered prompt.
    pub prompt: String,
    /// Sampling parameters routed for `model`.
    pub parameters: PredictionParameters,
    /// Attribution for usage records.
    pub attribution: Attribution,
}

impl PredictRequest {
    pub fn new(
        model: ModelHandle,
        prompt: impl Into<String>,
        sampling: &SamplingConfig,
        attribution: Attribution,
    ) -> Self {
        let parameters = sampling.parameters_for(model.capability);
        Self {
            model,
            prompt: prompt.into(),
            parameters,
            attribution,
        }
    }
}

/// Response from a prediction.
#[derive(Debug, Clone)]
pub struct PredictResponse {
    /// Generated narrative.
    pub text: String,
    /// Whether the provider's safety filter blocked the output.
    pub blocked: bool,
    /// Time taken for the request.
    pub latency: Duration,
}

impl PredictResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            blocked: false,
            latency: Duration::ZERO,
        }
    }
}
