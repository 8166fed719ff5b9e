use serde::{Deserialize, Serialize};

use crate::{backend::kernel::KernelKind, error::FlowError, tensor::dim_vector::DimVector};

use super::layer::LayerOps;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeuronKind {
    ReLU,        // a = leak slope
    Linear,      // a * x + b
    Sigmoid,
    HardSigmoid, // clamp(a * x + b, 0, 1)
    TanH,        // a * tanh(b * x)
    Absolute,
    SoftPlus,    // a * log(1 + exp(b * x))
    SoftSign,
    ELU,         // a = alpha
    ReLUN,       // min(relu(x), b)
    Power,       // (a * x + b) ^ c
    Exponential, // c ^ (a * x + b)
    Logarithm,   // log_c(a * x + b)
}

impl NeuronKind {
    fn name(&self) -> String {
        match self {
            NeuronKind::ReLU => "ReLU".to_string(),
            NeuronKind::Linear => "Linear".to_string(),
            NeuronKind::Sigmoid => "Sigmoid".to_string(),
            NeuronKind::HardSigmoid => "HardSigmoid".to_string(),
            NeuronKind::TanH => "TanH".to_string(),
            NeuronKind::Absolute => "Absolute".to_string(),
            NeuronKind::SoftPlus => "SoftPlus".to_string(),
            NeuronKind::SoftSign => "SoftSign".to_string(),
            NeuronKind::ELU => "ELU".to_string(),
            NeuronKind::ReLUN => "ReLUN".to_string(),
            NeuronKind::Power => "Power".to_string(),
            NeuronKind::Exponential => "Exponential".to_string(),
            NeuronKind::Logarithm => "Logarithm".to_string(),
        }
    }

    // Which of a, b, c the kind reads
    fn parameters(&self) -> &'static [char] {
        match self {
            NeuronKind::Sigmoid | NeuronKind::Absolute | NeuronKind::SoftSign => &[],
            NeuronKind::ReLU | NeuronKind::ELU => &['a'],
            NeuronKind::ReLUN => &['a', 'b'],
            NeuronKind::Linear | NeuronKind::HardSigmoid | NeuronKind::TanH | NeuronKind::SoftPlus => {
                &['a', 'b']
            }
            NeuronKind::Power | NeuronKind::Exponential | NeuronKind::Logarithm => &['a', 'b', 'c'],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeuronLayer {
    pub kind: NeuronKind,
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl NeuronLayer {
    pub fn new(kind: NeuronKind) -> Self {
        let (a, b, c) = match kind {
            NeuronKind::Linear | NeuronKind::TanH | NeuronKind::SoftPlus => (1.0, 0.0, 0.0),
            NeuronKind::HardSigmoid => (0.2, 0.5, 0.0),
            NeuronKind::ELU => (1.0, 0.0, 0.0),
            NeuronKind::ReLUN => (0.0, 6.0, 0.0),
            NeuronKind::Power => (1.0, 0.0, 1.0),
            NeuronKind::Exponential | NeuronKind::Logarithm => (1.0, 0.0, -1.0),
            _ => (0.0, 0.0, 0.0),
        };
        Self { kind, a, b, c }
    }

    pub fn new_with(kind: NeuronKind, a: f32, b: f32, c: f32) -> Self {
        Self { kind, a, b, c }
    }
}

impl LayerOps for NeuronLayer {
    fn resolved_output_shape(&self, input: &DimVector) -> Result<DimVector, FlowError> {
        // Activation functions preserve input shape
        Ok(*input)
    }

    fn kernel_kind(&self, _input: &DimVector) -> KernelKind {
        KernelKind::Neuron {
            kind: self.kind,
            a: self.a,
            b: self.b,
            c: self.c,
        }
    }

    fn name(&self) -> String {
        self.kind.name()
    }

    fn config_string(&self) -> Option<String> {
        let params = self.kind.parameters();
        // Plain ReLU without a leak reads better unadorned
        if params.is_empty() || (self.kind == NeuronKind::ReLU && self.a == 0.0) {
            return None;
        }

        let config = params
            .iter()
            .map(|p| match p {
                'a' => format!("a={}", self.a),
                'b' => format!("b={}", self.b),
                _ => format!("c={}", self.c),
            })
            .collect::<Vec<_>>()
            .join(", ");
        Some(config)
    }
}
