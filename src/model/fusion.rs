//! Channel fusion of several flow inputs.
//!
//! The backend's concatenation pads every source up to the next multiple of
//! the channel alignment (4 on current hardware). Downstream layers must see a
//! dense tensor, so the padded stack is followed by a fixed 1×1 convolution,
//! the contraction, whose weights select exactly the real channels. Going
//! backward the contraction gradient runs first, then the concatenation
//! gradient splits the result back into one gradient per source.

use log::debug;

use crate::{
    backend::{
        backend::{BackendError, GraphBackend, NodeHandle},
        kernel::{KernelDesc, KernelKind},
    },
    error::FlowError,
    layer::{conv2d::ConvolutionKind, padding::PaddingPolicy},
    tensor::dim_vector::DimVector,
};

pub const CHANNEL_ALIGNMENT: usize = 4;

/// Where each logical channel lives inside the padded stack.
#[derive(Clone, Debug, PartialEq)]
pub struct FusionPlan {
    channel_counts: Vec<usize>,
    locations: Vec<usize>,
    padded_total: usize,
}

impl FusionPlan {
    pub fn new(channel_counts: &[usize]) -> Result<Self, FlowError> {
        Self::with_alignment(channel_counts, CHANNEL_ALIGNMENT)
    }

    pub fn with_alignment(channel_counts: &[usize], alignment: usize) -> Result<Self, FlowError> {
        if channel_counts.is_empty() {
            return Err(FlowError::NoInputs("fusion".to_string()));
        }
        if alignment == 0 {
            return Err(FlowError::InvalidConfig("channel alignment must be non-zero".into()));
        }

        let logical_total = channel_counts.iter().sum();
        let mut locations = Vec::with_capacity(logical_total);
        let mut offset = 0;

        for &count in channel_counts {
            locations.extend(offset..offset + count);
            offset = align_up(offset + count, alignment);
        }

        Ok(Self {
            channel_counts: channel_counts.to_vec(),
            locations,
            // offset is aligned after every source, so this is the sum of the padded counts
            padded_total: offset,
        })
    }

    pub fn channel_counts(&self) -> &[usize] {
        &self.channel_counts
    }

    pub fn source_count(&self) -> usize {
        self.channel_counts.len()
    }

    pub fn logical_total(&self) -> usize {
        self.locations.len()
    }

    pub fn padded_total(&self) -> usize {
        self.padded_total
    }

    pub fn location(&self, output_channel: usize) -> Option<usize> {
        self.locations.get(output_channel).copied()
    }

    pub fn locations(&self) -> &[usize] {
        &self.locations
    }

    /// Selection matrix, row-major `[logical_total][padded_total]`.
    pub fn weights(&self) -> Vec<f32> {
        let mut weights = vec![0.0; self.logical_total() * self.padded_total];
        for (output, &input) in self.locations.iter().enumerate() {
            weights[output * self.padded_total + input] = 1.0;
        }
        weights
    }

    pub fn contraction_kernel(&self, extent: &DimVector) -> KernelDesc {
        KernelDesc {
            label: "Contraction".to_string(),
            kind: KernelKind::Convolution {
                kind: ConvolutionKind::Standard,
                kernel: (1, 1),
                stride: (1, 1),
                in_channels: self.padded_total,
                out_channels: self.logical_total(),
                bias: false,
                weights: Some(self.weights()),
            },
            input: DimVector::new(extent.width, extent.height, self.padded_total as i64, 1),
            output: DimVector::new(extent.width, extent.height, self.logical_total() as i64, 1),
        }
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

// Nodes appended for one fusion, kept so the gradient can be keyed off them
#[derive(Clone, Debug, PartialEq)]
pub struct FusionNodes {
    pub concatenation: NodeHandle,
    pub contraction: NodeHandle,
    pub kernel: KernelDesc,
    pub source_count: usize,
}

impl FusionNodes {
    pub fn build(
        backend: &mut dyn GraphBackend,
        plan: &FusionPlan,
        sources: &[NodeHandle],
        extent: &DimVector,
    ) -> Result<Self, FlowError> {
        if sources.is_empty() {
            return Err(FlowError::NoInputs("fusion".to_string()));
        }
        if sources.len() != plan.source_count() {
            return Err(FlowError::InvalidInputSource(format!(
                "fusion planned for {} sources, got {}",
                plan.source_count(),
                sources.len()
            )));
        }

        let concatenation = backend.append_concatenation(sources)?;
        let kernel = plan.contraction_kernel(extent);
        let contraction = backend.append_forward_kernel(
            &kernel,
            &PaddingPolicy::valid_only(),
            None,
            concatenation,
        )?;

        debug!(
            "fused {} sources: {} padded channels -> {}",
            sources.len(),
            plan.padded_total(),
            plan.logical_total()
        );

        Ok(Self {
            concatenation,
            contraction,
            kernel,
            source_count: sources.len(),
        })
    }

    // One gradient per fused source, in source order
    pub fn gradients(
        &self,
        backend: &mut dyn GraphBackend,
        output_gradient: NodeHandle,
    ) -> Result<Vec<NodeHandle>, FlowError> {
        let contraction_gradient =
            backend.append_gradient_kernel(self.contraction, &self.kernel, output_gradient)?;
        let gradients = backend.append_concatenation_gradient(self.concatenation, contraction_gradient)?;

        if gradients.len() != self.source_count {
            return Err(BackendError::new(format!(
                "concatenation gradient returned {} handles for {} sources",
                gradients.len(),
                self.source_count
            ))
            .into());
        }

        Ok(gradients)
    }
}
