//! Model registry.
//!
//! The two supported model types differ in their output ceiling and in which
//! sampling controls they accept. Everything downstream is parameterized by
//! the [`ModelDescriptor`] looked up here.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Supported model types. `TextBison` is the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    #[default]
    TextBison,
    CodeBison,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::TextBison => "text-bison",
            ModelType::CodeBison => "code-bison",
        }
    }

    pub fn all() -> [ModelType; 2] {
        [ModelType::TextBison, ModelType::CodeBison]
    }

    pub fn descriptor(self) -> &'static ModelDescriptor {
        match self {
            ModelType::TextBison => &TEXT_BISON,
            ModelType::CodeBison => &CODE_BISON,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown model type: {0}")]
pub struct UnknownModelType(pub String);

impl FromStr for ModelType {
    type Err = UnknownModelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(s.trim())
            .map(|d| d.model_type)
            .ok_or_else(|| UnknownModelType(s.to_string()))
    }
}

/// Which sampling controls a model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingCapability {
    /// Temperature, max output tokens, top-k and top-p.
    Full,
    /// Temperature and max output tokens only.
    TemperatureOnly,
}

/// Field of the prediction instance that carries the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceField {
    Content,
    Prefix,
}

impl InstanceField {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceField::Content => "content",
            InstanceField::Prefix => "prefix",
        }
    }
}

/// Static description of one model type.
#[derive(Debug, Clone, Copy)]
pub struct ModelDescriptor {
    pub model_type: ModelType,
    /// Canonical identifier used as the registry key.
    pub name: &'static str,
    /// Pinned version sent to the provider.
    pub version: &'static str,
    pub label: &'static str,
    pub max_output_tokens: u32,
    pub capability: SamplingCapability,
    pub instance_field: InstanceField,
}

impl ModelDescriptor {
    /// Build a callable handle for the pinned version.
    pub fn handle(&self) -> ModelHandle {
        ModelHandle::from_version(self, self.version)
    }

    pub fn supports_top_k_top_p(&self) -> bool {
        matches!(self.capability, SamplingCapability::Full)
    }
}

/// What the gateway needs to address one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    pub model_type: ModelType,
    pub version: String,
    pub capability: SamplingCapability,
    pub instance_field: InstanceField,
}

impl ModelHandle {
    /// Handle for an explicit version of a registered model type.
    pub fn from_version(descriptor: &ModelDescriptor, version: impl Into<String>) -> Self {
        Self {
            model_type: descriptor.model_type,
            version: version.into(),
            capability: descriptor.capability,
            instance_field: descriptor.instance_field,
        }
    }
}

// =============================================================================
// REGISTRY DATA
// =============================================================================

// Output ceilings per the PaLM 2 model cards. Input budgets (8192 tokens for
// text, 6144 for code) are respected only through row chunking.

static TEXT_BISON: ModelDescriptor = ModelDescriptor {
    model_type: ModelType::TextBison,
    name: "text-bison",
    version: "text-bison@001",
    label: "Text Bison",
    max_output_tokens: 1024,
    capability: SamplingCapability::Full,
    instance_field: InstanceField::Content,
};

static CODE_BISON: ModelDescriptor = ModelDescriptor {
    model_type: ModelType::CodeBison,
    name: "code-bison",
    version: "code-bison@001",
    label: "Code Bison",
    max_output_tokens: 2048,
    capability: SamplingCapability::TemperatureOnly,
    instance_field: InstanceField::Prefix,
};

static REGISTRY: OnceLock<HashMap<&'static str, &'static ModelDescriptor>> = OnceLock::new();

fn init_registry() -> HashMap<&'static str, &'static ModelDescriptor> {
    ModelType::all()
        .into_iter()
        .map(|t| {
            let d = t.descriptor();
            (d.name, d)
        })
        .collect()
}

/// Look up a descriptor by identifier.
pub fn lookup(name: &str) -> Option<&'static ModelDescriptor> {
    REGISTRY.get_or_init(init_registry).get(name).copied()
}

/// All descriptors, default first.
pub fn descriptors() -> Vec<&'static ModelDescriptor> {
    ModelType::all().into_iter().map(ModelType::descriptor).collect()
}
