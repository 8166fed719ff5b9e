use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    backend::{
        backend::{GraphBackend, NodeHandle},
        kernel::{KernelDesc, KernelKind},
    },
    error::FlowError,
    tensor::dim_vector::DimVector,
};

use super::{
    activations::NeuronLayer, arithmetic::ArithmeticLayer, conv2d::Conv2DLayer,
    dropout::DropOutLayer, fully_connected::FullyConnectedLayer,
    normalization::NormalizationLayer, padding::PaddingPolicy, param_source::ParamDataSource,
    pooling::PoolingLayer, softmax::SoftMaxLayer, upsampling::UpSamplingLayer,
};

pub trait LayerOps {
    // Output shape for a resolved input shape
    fn resolved_output_shape(&self, input: &DimVector) -> Result<DimVector, FlowError>;

    // Parameters handed to the backend for this layer's kernel
    fn kernel_kind(&self, input: &DimVector) -> KernelKind;

    fn padding(&self) -> PaddingPolicy {
        PaddingPolicy::valid_only()
    }

    // Parameter buffers the backend may fill, sized for `input`
    fn data_source(&mut self, _input: &DimVector) -> Option<&mut ParamDataSource> {
        None
    }

    // Whether the backend trains weights for this layer
    fn requires_parameters(&self) -> bool {
        false
    }

    // Return a string representation of the layers name
    fn name(&self) -> String;

    // Return optional configuration details for the layer
    fn config_string(&self) -> Option<String> {
        None
    }
}

/// One processing step in a flow.
///
/// A closed set of variants, each carrying only its own parameters and
/// dispatched through [`LayerOps`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Layer {
    Arithmetic(ArithmeticLayer),
    Convolution(Conv2DLayer),
    Pooling(PoolingLayer),
    FullyConnected(FullyConnectedLayer),
    Neuron(NeuronLayer),
    SoftMax(SoftMaxLayer),
    Normalization(NormalizationLayer),
    UpSampling(UpSamplingLayer),
    DropOut(DropOutLayer),
}

impl Layer {
    fn ops(&self) -> &dyn LayerOps {
        match self {
            Layer::Arithmetic(layer) => layer,
            Layer::Convolution(layer) => layer,
            Layer::Pooling(layer) => layer,
            Layer::FullyConnected(layer) => layer,
            Layer::Neuron(layer) => layer,
            Layer::SoftMax(layer) => layer,
            Layer::Normalization(layer) => layer,
            Layer::UpSampling(layer) => layer,
            Layer::DropOut(layer) => layer,
        }
    }

    fn ops_mut(&mut self) -> &mut dyn LayerOps {
        match self {
            Layer::Arithmetic(layer) => layer,
            Layer::Convolution(layer) => layer,
            Layer::Pooling(layer) => layer,
            Layer::FullyConnected(layer) => layer,
            Layer::Neuron(layer) => layer,
            Layer::SoftMax(layer) => layer,
            Layer::Normalization(layer) => layer,
            Layer::UpSampling(layer) => layer,
            Layer::DropOut(layer) => layer,
        }
    }

    /// Shape this layer produces from `input`.
    ///
    /// Unresolved inputs yield an unresolved output. Parameters that cannot
    /// produce a valid shape for a resolved input fail with `ShapeError`.
    pub fn output_shape(&self, input: &DimVector) -> Result<DimVector, FlowError> {
        if !input.is_resolved() {
            return Ok(DimVector::UNRESOLVED);
        }
        self.ops().resolved_output_shape(input)
    }

    pub fn kernel_desc(&self, input: &DimVector) -> Result<KernelDesc, FlowError> {
        if !input.is_resolved() {
            return Err(FlowError::shape(self.label(), "input shape is unresolved"));
        }

        let output = self.output_shape(input)?;
        Ok(KernelDesc {
            label: self.label(),
            kind: self.ops().kernel_kind(input),
            input: *input,
            output,
        })
    }

    pub fn forward_node(
        &mut self,
        backend: &mut dyn GraphBackend,
        input_shape: &DimVector,
        input: NodeHandle,
    ) -> Result<NodeHandle, FlowError> {
        let kernel = self.kernel_desc(input_shape)?;
        let padding = self.ops().padding();
        let params = self.ops_mut().data_source(input_shape);

        let node = backend.append_forward_kernel(&kernel, &padding, params, input)?;
        debug!("{}: forward {} -> {}", kernel.label, input.0, node.0);
        Ok(node)
    }

    // `forward` must be the node forward_node returned in this build
    pub fn gradient_node(
        &self,
        backend: &mut dyn GraphBackend,
        forward: NodeHandle,
        input_shape: &DimVector,
        output_gradient: NodeHandle,
    ) -> Result<NodeHandle, FlowError> {
        let kernel = self.kernel_desc(input_shape)?;

        let node = backend.append_gradient_kernel(forward, &kernel, output_gradient)?;
        debug!("{}: gradient {} -> {}", kernel.label, output_gradient.0, node.0);
        Ok(node)
    }

    pub fn padding(&self) -> PaddingPolicy {
        self.ops().padding()
    }

    pub fn requires_parameters(&self) -> bool {
        self.ops().requires_parameters()
    }

    pub fn name(&self) -> String {
        self.ops().name()
    }

    pub fn label(&self) -> String {
        match self.ops().config_string() {
            Some(config) => format!("{}({})", self.name(), config),
            None => self.name(),
        }
    }
}
