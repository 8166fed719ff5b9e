use super::{
    activations::{NeuronKind, NeuronLayer},
    arithmetic::{ArithmeticLayer, ArithmeticOperation},
    conv2d::Conv2DLayer,
    dropout::DropOutLayer,
    fully_connected::FullyConnectedLayer,
    layer::Layer,
    normalization::{NormalizationKind, NormalizationLayer},
    padding::PaddingPolicy,
    pooling::{PoolingKind, PoolingLayer},
    softmax::{SoftMaxKind, SoftMaxLayer},
    upsampling::{UpSamplingKind, UpSamplingLayer},
};

pub struct Layers;

impl Layers {
    pub fn add(operand: f32) -> Layer {
        Layer::Arithmetic(ArithmeticLayer::new(ArithmeticOperation::Add, operand))
    }

    pub fn sub(operand: f32) -> Layer {
        Layer::Arithmetic(ArithmeticLayer::new(ArithmeticOperation::Subtract, operand))
    }

    pub fn mul(operand: f32) -> Layer {
        Layer::Arithmetic(ArithmeticLayer::new(ArithmeticOperation::Multiply, operand))
    }

    pub fn div(operand: f32) -> Layer {
        Layer::Arithmetic(ArithmeticLayer::new(ArithmeticOperation::Divide, operand))
    }

    pub fn conv2d(out_channels: usize) -> Layer {
        Layer::Convolution(Conv2DLayer::new(out_channels))
    }

    pub fn conv2d_with(
        out_channels: usize,
        kernel_w: usize,
        kernel_h: usize,
        stride_x: usize,
        stride_y: usize,
        bias: bool,
        padding: PaddingPolicy,
    ) -> Layer {
        Layer::Convolution(Conv2DLayer::new_with(
            out_channels,
            kernel_w,
            kernel_h,
            stride_x,
            stride_y,
            bias,
            padding,
        ))
    }

    pub fn depthwise_conv2d(multiplier: usize, kernel: usize) -> Layer {
        Layer::Convolution(Conv2DLayer::depthwise(
            multiplier,
            kernel,
            kernel,
            PaddingPolicy::size_same(),
        ))
    }

    pub fn max_pool(size: usize) -> Layer {
        Layer::Pooling(PoolingLayer::new(PoolingKind::Max, size))
    }

    pub fn avg_pool(size: usize) -> Layer {
        Layer::Pooling(PoolingLayer::new(PoolingKind::Average, size))
    }

    pub fn pooling_with(
        kind: PoolingKind,
        kernel_w: usize,
        kernel_h: usize,
        stride_x: usize,
        stride_y: usize,
        padding: PaddingPolicy,
    ) -> Layer {
        Layer::Pooling(PoolingLayer::new_with(kind, kernel_w, kernel_h, stride_x, stride_y, padding))
    }

    pub fn fully_connected(out_units: usize) -> Layer {
        Layer::FullyConnected(FullyConnectedLayer::new(out_units))
    }

    pub fn fully_connected_with(out_units: usize, bias: bool) -> Layer {
        Layer::FullyConnected(FullyConnectedLayer::new_with(out_units, bias))
    }

    pub fn neuron(kind: NeuronKind) -> Layer {
        Layer::Neuron(NeuronLayer::new(kind))
    }

    pub fn relu() -> Layer {
        Layer::Neuron(NeuronLayer::new(NeuronKind::ReLU))
    }

    pub fn leaky_relu(slope: f32) -> Layer {
        Layer::Neuron(NeuronLayer::new_with(NeuronKind::ReLU, slope, 0.0, 0.0))
    }

    pub fn sigmoid() -> Layer {
        Layer::Neuron(NeuronLayer::new(NeuronKind::Sigmoid))
    }

    pub fn tanh() -> Layer {
        Layer::Neuron(NeuronLayer::new(NeuronKind::TanH))
    }

    pub fn softmax() -> Layer {
        Layer::SoftMax(SoftMaxLayer::new(SoftMaxKind::SoftMax))
    }

    pub fn log_softmax() -> Layer {
        Layer::SoftMax(SoftMaxLayer::new(SoftMaxKind::LogSoftMax))
    }

    pub fn batch_norm() -> Layer {
        Layer::Normalization(NormalizationLayer::new(NormalizationKind::Batch))
    }

    pub fn instance_norm() -> Layer {
        Layer::Normalization(NormalizationLayer::new(NormalizationKind::Instance))
    }

    pub fn cross_channel_norm(kernel_size: usize) -> Layer {
        Layer::Normalization(NormalizationLayer::new(NormalizationKind::CrossChannel {
            kernel_size,
        }))
    }

    pub fn upsample(scale: usize) -> Layer {
        Layer::UpSampling(UpSamplingLayer::new(UpSamplingKind::Nearest, scale))
    }

    pub fn upsample_bilinear(scale: usize, align_corners: bool) -> Layer {
        Layer::UpSampling(UpSamplingLayer::new(
            UpSamplingKind::Bilinear { align_corners },
            scale,
        ))
    }

    pub fn dropout(keep_probability: f32) -> Layer {
        Layer::DropOut(DropOutLayer::new(keep_probability))
    }
}
