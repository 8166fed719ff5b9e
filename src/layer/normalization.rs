use serde::{Deserialize, Serialize};

use crate::{backend::kernel::KernelKind, error::FlowError, tensor::dim_vector::DimVector};

use super::{layer::LayerOps, param_source::ParamDataSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationKind {
    Batch,
    Instance,
    CrossChannel { kernel_size: usize },
    Spatial { kernel_w: usize, kernel_h: usize },
}

impl NormalizationKind {
    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            NormalizationKind::Batch => &["gamma", "beta", "mean", "variance"],
            NormalizationKind::Instance => &["gamma", "beta"],
            NormalizationKind::CrossChannel { .. } | NormalizationKind::Spatial { .. } => &[],
        }
    }

    pub fn has_affine_parameters(&self) -> bool {
        !self.parameter_names().is_empty()
    }

    fn name(&self) -> String {
        match self {
            NormalizationKind::Batch => "BatchNorm".to_string(),
            NormalizationKind::Instance => "InstanceNorm".to_string(),
            NormalizationKind::CrossChannel { .. } => "CrossChannelNorm".to_string(),
            NormalizationKind::Spatial { .. } => "SpatialNorm".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationLayer {
    pub kind: NormalizationKind,
    pub epsilon: f32,
    pub alpha: f32,
    pub beta: f32,
    pub delta: f32,
    pub data_source: ParamDataSource,
}

impl NormalizationLayer {
    pub fn new(kind: NormalizationKind) -> Self {
        let (alpha, beta, delta) = match kind {
            NormalizationKind::CrossChannel { .. } | NormalizationKind::Spatial { .. } => (1e-4, 0.75, 1.0),
            _ => (1.0, 1.0, 1.0),
        };
        Self {
            kind,
            epsilon: 1e-5,
            alpha,
            beta,
            delta,
            data_source: ParamDataSource::new(kind.name()),
        }
    }
}

impl LayerOps for NormalizationLayer {
    fn resolved_output_shape(&self, input: &DimVector) -> Result<DimVector, FlowError> {
        match self.kind {
            NormalizationKind::CrossChannel { kernel_size: 0 }
            | NormalizationKind::Spatial { kernel_w: 0, .. }
            | NormalizationKind::Spatial { kernel_h: 0, .. } => {
                return Err(FlowError::shape(self.name(), "kernel size must be non-zero"))
            }
            _ => {}
        }
        if self.epsilon < 0.0 {
            return Err(FlowError::shape(self.name(), "epsilon must not be negative"));
        }

        Ok(*input)
    }

    fn kernel_kind(&self, _input: &DimVector) -> KernelKind {
        KernelKind::Normalization {
            kind: self.kind,
            epsilon: self.epsilon,
            alpha: self.alpha,
            beta: self.beta,
            delta: self.delta,
        }
    }

    fn data_source(&mut self, input: &DimVector) -> Option<&mut ParamDataSource> {
        if !self.kind.has_affine_parameters() {
            return None;
        }
        self.data_source.grow_to(input.channels.max(0) as usize);
        Some(&mut self.data_source)
    }

    fn requires_parameters(&self) -> bool {
        self.kind.has_affine_parameters()
    }

    fn name(&self) -> String {
        self.kind.name()
    }

    fn config_string(&self) -> Option<String> {
        match self.kind {
            NormalizationKind::CrossChannel { kernel_size } => Some(format!("size={}", kernel_size)),
            NormalizationKind::Spatial { kernel_w, kernel_h } => {
                Some(format!("kernel={}×{}", kernel_w, kernel_h))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_source_tracks_channels() {
        let mut layer = NormalizationLayer::new(NormalizationKind::Batch);
        let source = layer.data_source(&DimVector::new(4, 4, 6, 1)).unwrap();
        assert_eq!(source.get("mean").len(), 6);
        assert_eq!(source.label(), "BatchNorm parameters");
    }

    #[test]
    fn test_cross_channel_has_no_buffers() {
        let mut layer = NormalizationLayer::new(NormalizationKind::CrossChannel { kernel_size: 5 });
        assert!(layer.data_source(&DimVector::new(4, 4, 6, 1)).is_none());
    }

    #[test]
    fn test_zero_kernel_rejected() {
        let layer = NormalizationLayer::new(NormalizationKind::Spatial { kernel_w: 3, kernel_h: 0 });
        assert!(layer.resolved_output_shape(&DimVector::new(4, 4, 1, 1)).is_err());
    }
}
