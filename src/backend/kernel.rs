use serde::{Deserialize, Serialize};

use crate::{
    layer::{
        activations::NeuronKind, arithmetic::ArithmeticOperation, conv2d::ConvolutionKind,
        normalization::NormalizationKind, pooling::PoolingKind, softmax::SoftMaxKind,
        upsampling::UpSamplingKind,
    },
    tensor::dim_vector::DimVector,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum KernelKind {
    Arithmetic {
        operation: ArithmeticOperation,
        scale: f32,
        operand: f32,
        bias: f32,
    },
    Convolution {
        kind: ConvolutionKind,
        kernel: (usize, usize),
        stride: (usize, usize),
        in_channels: usize,
        out_channels: usize,
        bias: bool,
        // Fixed weights, row-major [out_channels][in_channels]; None means learned
        weights: Option<Vec<f32>>,
    },
    Pooling {
        kind: PoolingKind,
        kernel: (usize, usize),
        stride: (usize, usize),
    },
    FullyConnected {
        in_width: usize,
        in_height: usize,
        in_channels: usize,
        out_units: usize,
        bias: bool,
    },
    Neuron {
        kind: NeuronKind,
        a: f32,
        b: f32,
        c: f32,
    },
    SoftMax {
        kind: SoftMaxKind,
    },
    Normalization {
        kind: NormalizationKind,
        epsilon: f32,
        alpha: f32,
        beta: f32,
        delta: f32,
    },
    UpSampling {
        kind: UpSamplingKind,
        scale: (usize, usize),
    },
    DropOut {
        keep_probability: f32,
        seed: u64,
    },
}

// Everything the backend needs to append one kernel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelDesc {
    pub label: String,
    pub kind: KernelKind,
    pub input: DimVector,
    pub output: DimVector,
}
