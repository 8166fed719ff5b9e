use serde::{Deserialize, Serialize};

use crate::{backend::kernel::KernelKind, error::FlowError, tensor::dim_vector::DimVector};

use super::{
    layer::LayerOps,
    padding::{Axis, PaddingContext, PaddingPolicy},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolingKind {
    Max,
    Average,
    L2Norm,
    DilatedMax { dilation: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolingLayer {
    pub kind: PoolingKind,
    pub kernel_w: usize,
    pub kernel_h: usize,
    pub stride_x: usize,
    pub stride_y: usize,
    pub padding: PaddingPolicy,
}

impl PoolingLayer {
    pub fn new(kind: PoolingKind, size: usize) -> Self {
        Self {
            kind,
            kernel_w: size,
            kernel_h: size,
            stride_x: size,
            stride_y: size,
            padding: PaddingPolicy::valid_only(),
        }
    }

    pub fn new_with(
        kind: PoolingKind,
        kernel_w: usize,
        kernel_h: usize,
        stride_x: usize,
        stride_y: usize,
        padding: PaddingPolicy,
    ) -> Self {
        Self {
            kind,
            kernel_w,
            kernel_h,
            stride_x,
            stride_y,
            padding,
        }
    }

    // Window size once dilation is applied
    fn effective_kernel(&self, kernel: usize) -> usize {
        match self.kind {
            PoolingKind::DilatedMax { dilation } => (kernel - 1) * dilation + 1,
            _ => kernel,
        }
    }
}

impl LayerOps for PoolingLayer {
    fn resolved_output_shape(&self, input: &DimVector) -> Result<DimVector, FlowError> {
        if self.kernel_w == 0 || self.kernel_h == 0 || self.stride_x == 0 || self.stride_y == 0 {
            return Err(FlowError::shape(self.name(), "kernel and stride must be non-zero"));
        }
        if let PoolingKind::DilatedMax { dilation: 0 } = self.kind {
            return Err(FlowError::shape(self.name(), "dilation must be non-zero"));
        }

        let name = self.name();
        let mut extents = [0i64; 2];
        let axes = [
            (Axis::X, input.width, self.kernel_w, self.stride_x),
            (Axis::Y, input.height, self.kernel_h, self.stride_y),
        ];

        for (slot, (axis, extent, kernel, stride)) in axes.into_iter().enumerate() {
            let ctx = PaddingContext {
                layer: &name,
                axis,
                input: extent,
                kernel: self.effective_kernel(kernel) as i64,
                stride: stride as i64,
            };
            extents[slot] = self.padding.output_extent(&ctx).ok_or_else(|| {
                FlowError::shape(
                    self.name(),
                    format!("pooling window {} does not fit {:?} extent {}", kernel, axis, extent),
                )
            })?;
        }

        Ok(input.with_extent(extents[0], extents[1]))
    }

    fn kernel_kind(&self, _input: &DimVector) -> KernelKind {
        KernelKind::Pooling {
            kind: self.kind,
            kernel: (self.kernel_w, self.kernel_h),
            stride: (self.stride_x, self.stride_y),
        }
    }

    fn padding(&self) -> PaddingPolicy {
        self.padding
    }

    fn name(&self) -> String {
        match self.kind {
            PoolingKind::Max => "MaxPool".to_string(),
            PoolingKind::Average => "AvgPool".to_string(),
            PoolingKind::L2Norm => "L2NormPool".to_string(),
            PoolingKind::DilatedMax { .. } => "DilatedMaxPool".to_string(),
        }
    }

    fn config_string(&self) -> Option<String> {
        let dilation = match self.kind {
            PoolingKind::DilatedMax { dilation } => format!(", dilation={}", dilation),
            _ => String::new(),
        };
        Some(format!(
            "kernel={}×{}, stride={}×{}{}",
            self.kernel_w, self.kernel_h, self.stride_x, self.stride_y, dilation
        ))
    }
}
