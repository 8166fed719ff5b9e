use serde::{Deserialize, Serialize};

use crate::{backend::kernel::KernelKind, error::FlowError, tensor::dim_vector::DimVector};

use super::layer::LayerOps;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoftMaxKind {
    SoftMax,
    LogSoftMax,
}

// Normalizes across the channel axis at every spatial position
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftMaxLayer {
    pub kind: SoftMaxKind,
}

impl SoftMaxLayer {
    pub fn new(kind: SoftMaxKind) -> Self {
        Self { kind }
    }
}

impl LayerOps for SoftMaxLayer {
    fn resolved_output_shape(&self, input: &DimVector) -> Result<DimVector, FlowError> {
        Ok(*input)
    }

    fn kernel_kind(&self, _input: &DimVector) -> KernelKind {
        KernelKind::SoftMax { kind: self.kind }
    }

    fn name(&self) -> String {
        match self.kind {
            SoftMaxKind::SoftMax => "SoftMax".to_string(),
            SoftMaxKind::LogSoftMax => "LogSoftMax".to_string(),
        }
    }
}
