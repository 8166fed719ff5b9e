use thiserror::Error;

use crate::backend::backend::BackendError;

#[derive(Error, Debug)]
pub enum FlowError {
    // Graph assembly errors
    #[error("Shape error in {layer}: {reason}")]
    ShapeError { layer: String, reason: String },

    #[error("Flow '{0}' has no input sources")]
    NoInputs(String),

    #[error("Flow {dependency} has not produced an output handle yet")]
    FusionMissing { dependency: usize },

    #[error("Flow {from} cannot reference flow {to}: reference cycle")]
    CycleDetected { from: usize, to: usize },

    #[error("Backend error: {0}")]
    BackendError(#[from] BackendError),

    // Structural and lifecycle errors
    #[error("Invalid input source: {0}")]
    InvalidInputSource(String),

    #[error("Flow not found: {0}")]
    FlowNotFound(usize),

    #[error("Layer index {0} out of range")]
    LayerNotFound(usize),

    #[error("Invalid build state: expected {expected}, found {actual}")]
    InvalidState { expected: &'static str, actual: &'static str },

    #[error("Dimension inference did not settle after {0} passes")]
    InferenceDidNotConverge(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Document record errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported record version {0}")]
    UnsupportedVersion(u32),
}

impl FlowError {
    // Prefix a shape error with the flow whose layer raised it
    pub fn in_flow(self, flow: &str) -> Self {
        match self {
            FlowError::ShapeError { layer, reason } => FlowError::ShapeError {
                layer: format!("{}/{}", flow, layer),
                reason,
            },
            other => other,
        }
    }

    pub fn shape(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        FlowError::ShapeError {
            layer: layer.into(),
            reason: reason.into(),
        }
    }
}
