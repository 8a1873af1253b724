//! Chunked map → optional reduce over model calls.
//!
//! The digest cycle:
//! 1. **Decode** — repair and parse the attachment into a [`Dataset`]
//! 2. **Map** — one prediction per row chunk, issued strictly in order
//! 3. **Reduce** — when more than one partial narrative came back, one more
//!    prediction consolidates them (aggregate mode only)
//!
//! In per-row mode the chunk size is 1 and each narrative is written back onto
//! its row instead of being reduced.
//!
//! Usage:
//! ```bash
//! digest run --data results.json --question "What stands out?" --out report.html
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::chunking::{ChunkPlan, ChunkingError, DEFAULT_CHUNK_ROWS, PER_ROW_CHUNK_ROWS};
use crate::dataset::Dataset;
use crate::gateway::{
    invoke, Attribution, PredictionError, PredictionGateway, RawSampling, SamplingConfig,
};
use crate::json_repair::RepairError;
use crate::prompts::{render_chunk_prompt, render_summary_prompt};
use crate::registry::{self, ModelHandle, ModelType};

// =============================================================================
// Types
// =============================================================================

/// Whether to narrate the whole result set or each row on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestMode {
    /// 50-row chunks, reduced to one narrative.
    #[default]
    All,
    /// One narrative per row, merged back onto the dataset.
    Row,
}

impl DigestMode {
    pub fn chunk_size(self) -> usize {
        match self {
            DigestMode::All => DEFAULT_CHUNK_ROWS,
            DigestMode::Row => PER_ROW_CHUNK_ROWS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DigestMode::All => "all",
            DigestMode::Row => "row",
        }
    }
}

impl fmt::Display for DigestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(DigestMode::All),
            "row" => Ok(DigestMode::Row),
            other => Err(PipelineError::InvalidRequest(format!(
                "row_or_all must be \"row\" or \"all\", got {other:?}"
            ))),
        }
    }
}

/// Everything the caller supplies for one digest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestRequest {
    /// Attachment payload: JSON array of row objects, possibly with stray quotes.
    pub data: String,
    pub question: String,
    #[serde(default, rename = "row_or_all")]
    pub mode: DigestMode,
    /// Registry identifier; empty selects the default model.
    #[serde(default)]
    pub model_type: String,
    /// Raw sampling inputs, validated by the caster.
    #[serde(flatten)]
    pub sampling: RawSampling,
}

/// Result of a digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DigestOutcome {
    /// One narrative for the whole dataset plus the per-chunk narratives it
    /// was built from (a single element when no reduce was needed).
    Aggregate {
        narrative: String,
        partials: Vec<String>,
        dataset: Dataset,
    },
    /// The dataset with a `prompt_result` column on every row.
    PerRow { dataset: Dataset },
}

impl DigestOutcome {
    pub fn dataset(&self) -> &Dataset {
        match self {
            DigestOutcome::Aggregate { dataset, .. } => dataset,
            DigestOutcome::PerRow { dataset } => dataset,
        }
    }
}

// =============================================================================
// Pipeline errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Unknown model type: {0}")]
    UnknownModel(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Dataset could not be decoded: {0}")]
    Dataset(#[from] RepairError),
    #[error("Prediction failed for rows {start} to {end}: {source}")]
    Map {
        start: usize,
        end: usize,
        #[source]
        source: PredictionError,
    },
    #[error("Summary prediction failed: {0}")]
    Reduce(#[source] PredictionError),
}

impl From<ChunkingError> for PipelineError {
    fn from(err: ChunkingError) -> Self {
        PipelineError::InvalidRequest(err.to_string())
    }
}

// =============================================================================
// Map phase
// =============================================================================

/// Predict once per `chunk_size`-row chunk, in dataset order.
///
/// Returns one narrative per chunk. The first failing chunk aborts the map and
/// any narratives gathered before it are dropped.
pub async fn map_invoke(
    gateway: &dyn PredictionGateway,
    model: &ModelHandle,
    dataset: &Dataset,
    question: &str,
    chunk_size: usize,
    sampling: &SamplingConfig,
    run_id: Option<Uuid>,
) -> Result<Vec<String>, PipelineError> {
    let plan = ChunkPlan::new(dataset.len(), chunk_size)?;
    let mut partials = Vec::with_capacity(plan.len());

    for range in plan.ranges() {
        info!("Processing rows {} to {}.", range.start, range.end);
        let prompt = render_chunk_prompt(question, &dataset.rows()[range.clone()]);

        let text = invoke(gateway, model, prompt, sampling, attribution("pipeline::map", run_id))
            .await
            .map_err(|source| PipelineError::Map {
                start: range.start,
                end: range.end,
                source,
            })?;
        partials.push(text);
    }

    Ok(partials)
}

// =============================================================================
// Reduce phase
// =============================================================================

/// Consolidate partial narratives with exactly one further prediction.
pub async fn reduce(
    gateway: &dyn PredictionGateway,
    model: &ModelHandle,
    partials: &[String],
    sampling: &SamplingConfig,
    run_id: Option<Uuid>,
) -> Result<String, PipelineError> {
    info!(partials = partials.len(), "Summarizing partial results.");
    let prompt = render_summary_prompt(partials);
    invoke(gateway, model, prompt, sampling, attribution("pipeline::reduce", run_id))
        .await
        .map_err(PipelineError::Reduce)
}

fn attribution(caller: &'static str, run_id: Option<Uuid>) -> Attribution {
    let attribution = Attribution::new(caller);
    match run_id {
        Some(id) => attribution.with_run(id),
        None => attribution,
    }
}

// =============================================================================
// Full digest
// =============================================================================

/// Resolve the model, decode the dataset, then map and (if needed) reduce.
pub async fn run_digest(
    gateway: &dyn PredictionGateway,
    request: &DigestRequest,
) -> Result<DigestOutcome, PipelineError> {
    let run_id = Uuid::new_v4();
    let model_key = request.model_type.trim();
    let descriptor = if model_key.is_empty() {
        ModelType::default().descriptor()
    } else {
        registry::lookup(model_key)
            .ok_or_else(|| PipelineError::UnknownModel(model_key.to_string()))?
    };

    let span = info_span!(
        "digest",
        %run_id,
        model = descriptor.name,
        mode = request.mode.as_str()
    );

    async move {
        if request.question.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("question must not be empty".into()));
        }

        let sampling = SamplingConfig::from_raw(&request.sampling, descriptor);
        let handle = descriptor.handle();
        let mut dataset = Dataset::from_json(&request.data)?;
        info!(rows = dataset.len(), "Decoded dataset.");

        let partials = map_invoke(
            gateway,
            &handle,
            &dataset,
            &request.question,
            request.mode.chunk_size(),
            &sampling,
            Some(run_id),
        )
        .await?;

        match request.mode {
            DigestMode::Row => {
                dataset.merge_row_results(partials);
                Ok(DigestOutcome::PerRow { dataset })
            }
            DigestMode::All => {
                let narrative = match partials.as_slice() {
                    [] => String::new(),
                    [only] => only.clone(),
                    _ => reduce(gateway, &handle, &partials, &sampling, Some(run_id)).await?,
                };
                Ok(DigestOutcome::Aggregate {
                    narrative,
                    partials,
                    dataset,
                })
            }
        }
    }
    .instrument(span)
    .await
}
