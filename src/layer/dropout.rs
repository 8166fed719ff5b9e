use serde::{Deserialize, Serialize};

use crate::{backend::kernel::KernelKind, error::FlowError, tensor::dim_vector::DimVector};

use super::layer::LayerOps;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DropOutLayer {
    pub keep_probability: f32,
    pub seed: u64,
}

impl DropOutLayer {
    pub fn new(keep_probability: f32) -> Self {
        Self {
            keep_probability,
            seed: 0,
        }
    }
}

impl LayerOps for DropOutLayer {
    fn resolved_output_shape(&self, input: &DimVector) -> Result<DimVector, FlowError> {
        if !(self.keep_probability > 0.0 && self.keep_probability <= 1.0) {
            return Err(FlowError::shape(
                self.name(),
                format!("keep probability {} outside (0, 1]", self.keep_probability),
            ));
        }
        Ok(*input)
    }

    fn kernel_kind(&self, _input: &DimVector) -> KernelKind {
        KernelKind::DropOut {
            keep_probability: self.keep_probability,
            seed: self.seed,
        }
    }

    fn name(&self) -> String {
        "DropOut".to_string()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("keep={}", self.keep_probability))
    }
}
