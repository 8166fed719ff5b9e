use serde::{Deserialize, Serialize};

use crate::{backend::kernel::KernelKind, error::FlowError, tensor::dim_vector::DimVector};

use super::layer::LayerOps;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FullyConnectedLayer {
    pub out_units: usize,
    pub bias: bool,
}

impl FullyConnectedLayer {
    pub fn new(out_units: usize) -> Self {
        Self {
            out_units,
            bias: true,
        }
    }

    pub fn new_with(out_units: usize, bias: bool) -> Self {
        Self { out_units, bias }
    }
}

impl LayerOps for FullyConnectedLayer {
    fn resolved_output_shape(&self, input: &DimVector) -> Result<DimVector, FlowError> {
        if self.out_units == 0 {
            return Err(FlowError::shape(self.name(), "output unit count must be non-zero"));
        }

        // Kernel spans the whole input extent, so W and H collapse to 1
        Ok(DimVector::new(1, 1, self.out_units as i64, input.time_steps))
    }

    fn kernel_kind(&self, input: &DimVector) -> KernelKind {
        KernelKind::FullyConnected {
            in_width: input.width.max(0) as usize,
            in_height: input.height.max(0) as usize,
            in_channels: input.channels.max(0) as usize,
            out_units: self.out_units,
            bias: self.bias,
        }
    }

    fn requires_parameters(&self) -> bool {
        true
    }

    fn name(&self) -> String {
        "FullyConnected".to_string()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("units={}, bias={}", self.out_units, self.bias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_extent() {
        let layer = FullyConnectedLayer::new(10);
        let output = layer.resolved_output_shape(&DimVector::new(13, 13, 16, 1)).unwrap();
        assert_eq!(output, DimVector::new(1, 1, 10, 1));
    }

    #[test]
    fn test_zero_units_rejected() {
        let layer = FullyConnectedLayer::new_with(0, false);
        assert!(layer.resolved_output_shape(&DimVector::new(1, 1, 4, 1)).is_err());
    }
}
