use serde::{Deserialize, Serialize};

use crate::{backend::kernel::KernelKind, error::FlowError, tensor::dim_vector::DimVector};

use super::{
    layer::LayerOps,
    padding::{Axis, PaddingContext, PaddingPolicy},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvolutionKind {
    Standard,
    // Each input channel convolved on its own into `multiplier` outputs
    Depthwise { multiplier: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conv2DLayer {
    pub kind: ConvolutionKind,
    pub out_channels: usize, // Ignored for depthwise
    pub kernel_w: usize,
    pub kernel_h: usize,
    pub stride_x: usize,
    pub stride_y: usize,
    pub bias: bool,
    pub padding: PaddingPolicy,
}

impl Conv2DLayer {
    pub fn new(out_channels: usize) -> Self {
        Self {
            kind: ConvolutionKind::Standard,
            out_channels,
            kernel_w: 3,
            kernel_h: 3,
            stride_x: 1,
            stride_y: 1,
            bias: true,
            padding: PaddingPolicy::valid_only(),
        }
    }

    pub fn new_with(
        out_channels: usize,
        kernel_w: usize,
        kernel_h: usize,
        stride_x: usize,
        stride_y: usize,
        bias: bool,
        padding: PaddingPolicy,
    ) -> Self {
        Self {
            kind: ConvolutionKind::Standard,
            out_channels,
            kernel_w,
            kernel_h,
            stride_x,
            stride_y,
            bias,
            padding,
        }
    }

    pub fn depthwise(multiplier: usize, kernel_w: usize, kernel_h: usize, padding: PaddingPolicy) -> Self {
        Self {
            kind: ConvolutionKind::Depthwise { multiplier },
            out_channels: 0,
            kernel_w,
            kernel_h,
            stride_x: 1,
            stride_y: 1,
            bias: true,
            padding,
        }
    }

    fn output_channels(&self, input: &DimVector) -> i64 {
        match self.kind {
            ConvolutionKind::Standard => self.out_channels as i64,
            ConvolutionKind::Depthwise { multiplier } => input.channels * multiplier as i64,
        }
    }

    fn extent(&self, axis: Axis, input: i64, kernel: usize, stride: usize) -> Result<i64, FlowError> {
        let name = self.name();
        let ctx = PaddingContext {
            layer: &name,
            axis,
            input,
            kernel: kernel as i64,
            stride: stride as i64,
        };

        self.padding.output_extent(&ctx).ok_or_else(|| {
            FlowError::shape(
                self.name(),
                format!(
                    "{}×{} kernel with stride {} does not fit {:?} extent {}",
                    self.kernel_w, self.kernel_h, stride, axis, input
                ),
            )
        })
    }
}

impl LayerOps for Conv2DLayer {
    fn resolved_output_shape(&self, input: &DimVector) -> Result<DimVector, FlowError> {
        if self.kernel_w == 0 || self.kernel_h == 0 || self.stride_x == 0 || self.stride_y == 0 {
            return Err(FlowError::shape(self.name(), "kernel and stride must be non-zero"));
        }

        let out_channels = self.output_channels(input);
        if out_channels <= 0 {
            return Err(FlowError::shape(self.name(), "output channel count must be non-zero"));
        }

        let width = self.extent(Axis::X, input.width, self.kernel_w, self.stride_x)?;
        let height = self.extent(Axis::Y, input.height, self.kernel_h, self.stride_y)?;

        Ok(DimVector::new(width, height, out_channels, input.time_steps))
    }

    fn kernel_kind(&self, input: &DimVector) -> KernelKind {
        KernelKind::Convolution {
            kind: self.kind,
            kernel: (self.kernel_w, self.kernel_h),
            stride: (self.stride_x, self.stride_y),
            in_channels: input.channels.max(0) as usize,
            out_channels: self.output_channels(input).max(0) as usize,
            bias: self.bias,
            weights: None,
        }
    }

    fn padding(&self) -> PaddingPolicy {
        self.padding
    }

    fn requires_parameters(&self) -> bool {
        true
    }

    fn name(&self) -> String {
        match self.kind {
            ConvolutionKind::Standard => "Conv2D".to_string(),
            ConvolutionKind::Depthwise { .. } => "DepthwiseConv2D".to_string(),
        }
    }

    fn config_string(&self) -> Option<String> {
        let channels = match self.kind {
            ConvolutionKind::Standard => format!("out_channels={}", self.out_channels),
            ConvolutionKind::Depthwise { multiplier } => format!("multiplier={}", multiplier),
        };
        Some(format!(
            "{}, kernel={}×{}, stride={}×{}, bias={}",
            channels, self.kernel_w, self.kernel_h, self.stride_x, self.stride_y, self.bias
        ))
    }
}
