use serde::{Deserialize, Serialize};

use crate::{backend::kernel::KernelKind, error::FlowError, tensor::dim_vector::DimVector};

use super::layer::LayerOps;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOperation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOperation {
    fn name(&self) -> String {
        match self {
            ArithmeticOperation::Add => "Add".to_string(),
            ArithmeticOperation::Subtract => "Subtract".to_string(),
            ArithmeticOperation::Multiply => "Multiply".to_string(),
            ArithmeticOperation::Divide => "Divide".to_string(),
        }
    }
}

// out = scale * in (op) operand + bias
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArithmeticLayer {
    pub operation: ArithmeticOperation,
    pub scale: f32,
    pub operand: f32,
    pub bias: f32,
}

impl ArithmeticLayer {
    pub fn new(operation: ArithmeticOperation, operand: f32) -> Self {
        Self {
            operation,
            scale: 1.0,
            operand,
            bias: 0.0,
        }
    }

    pub fn new_with(operation: ArithmeticOperation, scale: f32, operand: f32, bias: f32) -> Self {
        Self {
            operation,
            scale,
            operand,
            bias,
        }
    }
}

impl LayerOps for ArithmeticLayer {
    fn resolved_output_shape(&self, input: &DimVector) -> Result<DimVector, FlowError> {
        if self.operation == ArithmeticOperation::Divide && self.operand == 0.0 {
            return Err(FlowError::shape(self.name(), "division by a zero operand"));
        }

        // Element-wise with a constant operand, shape is unchanged
        Ok(*input)
    }

    fn kernel_kind(&self, _input: &DimVector) -> KernelKind {
        KernelKind::Arithmetic {
            operation: self.operation,
            scale: self.scale,
            operand: self.operand,
            bias: self.bias,
        }
    }

    fn name(&self) -> String {
        self.operation.name()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!(
            "scale={}, operand={}, bias={}",
            self.scale, self.operand, self.bias
        ))
    }
}
