#![forbid(unsafe_code)]

//! # digest-harness
//!
//! Turns tabular query results plus a natural-language question into an LLM
//! narrative without tripping the provider's quota.
//!
//! A dataset is split into fixed-size row chunks, each chunk is sent through a
//! rate-limited, backoff-protected prediction call, and when more than one
//! partial narrative comes back a final call consolidates them (a map-reduce
//! over model calls). Attachment payloads that arrive as slightly broken JSON
//! are recovered by [`json_repair`] before any model call is made.

pub mod caster;
pub mod chunking;
pub mod dataset;
pub mod gateway;
pub mod json_repair;
pub mod pipeline;
pub mod prompts;
pub mod registry;
pub mod report;

pub use gateway::{
    Attribution, InvocationConfig, InvocationPolicy, PredictionError, PredictionGateway,
    ProviderGateway, RateLimiter, UsageSink,
};
pub use dataset::Dataset;
pub use json_repair::{repair_parse, RepairError};
pub use pipeline::{
    map_invoke, reduce, run_digest, DigestMode, DigestOutcome, DigestRequest, PipelineError,
};
pub use registry::{ModelDescriptor, ModelHandle, ModelType, SamplingCapability};
