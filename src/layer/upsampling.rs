use serde::{Deserialize, Serialize};

use crate::{backend::kernel::KernelKind, error::FlowError, tensor::dim_vector::DimVector};

use super::layer::LayerOps;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpSamplingKind {
    Nearest,
    Bilinear { align_corners: bool },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpSamplingLayer {
    pub kind: UpSamplingKind,
    pub scale_x: usize,
    pub scale_y: usize,
}

impl UpSamplingLayer {
    pub fn new(kind: UpSamplingKind, scale: usize) -> Self {
        Self {
            kind,
            scale_x: scale,
            scale_y: scale,
        }
    }
}

impl LayerOps for UpSamplingLayer {
    fn resolved_output_shape(&self, input: &DimVector) -> Result<DimVector, FlowError> {
        if self.scale_x == 0 || self.scale_y == 0 {
            return Err(FlowError::shape(self.name(), "scale factors must be non-zero"));
        }

        Ok(input.with_extent(
            input.width * self.scale_x as i64,
            input.height * self.scale_y as i64,
        ))
    }

    fn kernel_kind(&self, _input: &DimVector) -> KernelKind {
        KernelKind::UpSampling {
            kind: self.kind,
            scale: (self.scale_x, self.scale_y),
        }
    }

    fn name(&self) -> String {
        match self.kind {
            UpSamplingKind::Nearest => "UpSampleNearest".to_string(),
            UpSamplingKind::Bilinear { .. } => "UpSampleBilinear".to_string(),
        }
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("scale={}×{}", self.scale_x, self.scale_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scales_extent_only() {
        let layer = UpSamplingLayer {
            kind: UpSamplingKind::Bilinear { align_corners: true },
            scale_x: 2,
            scale_y: 3,
        };
        let output = layer.resolved_output_shape(&DimVector::new(5, 4, 7, 1)).unwrap();
        assert_eq!(output, DimVector::new(10, 12, 7, 1));
    }
}
