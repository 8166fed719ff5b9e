use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layer::{padding::PaddingPolicy, param_source::ParamDataSource};

use super::kernel::KernelDesc;

// Opaque node in a backend's graph; only the backend knows what it points at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle(pub usize);

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason}")]
pub struct BackendError {
    pub reason: String,
}

impl BackendError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Tensor-graph execution library the flows are compiled against.
///
/// The graph-assembly code never runs kernels itself; it only asks the
/// backend to append nodes and hands the returned handles back to it.
pub trait GraphBackend {
    // Append a layer kernel after `input`
    fn append_forward_kernel(
        &mut self,
        kernel: &KernelDesc,
        padding: &PaddingPolicy,
        params: Option<&mut ParamDataSource>,
        input: NodeHandle,
    ) -> Result<NodeHandle, BackendError>;

    // Append the gradient of the kernel that produced `forward`
    fn append_gradient_kernel(
        &mut self,
        forward: NodeHandle,
        kernel: &KernelDesc,
        output_gradient: NodeHandle,
    ) -> Result<NodeHandle, BackendError>;

    // Stack inputs along the channel axis, padding each to the hardware alignment
    fn append_concatenation(&mut self, inputs: &[NodeHandle]) -> Result<NodeHandle, BackendError>;

    // Split a gradient back into one handle per concatenated input, in input order
    fn append_concatenation_gradient(
        &mut self,
        concatenation: NodeHandle,
        output_gradient: NodeHandle,
    ) -> Result<Vec<NodeHandle>, BackendError>;

    // Loss-side gradient seed for a flow nothing else consumes
    fn append_output_gradient(&mut self, output: NodeHandle) -> Result<NodeHandle, BackendError>;

    // Sum of gradients reaching one tensor from several consumers
    fn append_gradient_accumulation(
        &mut self,
        gradients: &[NodeHandle],
    ) -> Result<NodeHandle, BackendError>;
}
