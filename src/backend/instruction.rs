use crate::layer::padding::PaddingPolicy;

use super::{backend::NodeHandle, kernel::KernelDesc};

// Graph tape entries recorded by RecordingBackend, one per appended node
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    // Data entry
    ReadInput {
        slot: usize,
    },

    // Forward kernels
    Forward {
        kernel: KernelDesc,
        padding: PaddingPolicy,
        src: NodeHandle,
    },
    Concat {
        sources: Vec<NodeHandle>,
    },

    // Gradient kernels
    Gradient {
        forward: NodeHandle,
        label: String,
        src: NodeHandle,
    },
    ConcatGradient {
        concatenation: NodeHandle,
        index: usize,
        src: NodeHandle,
    },
    OutputGradient {
        src: NodeHandle,
    },
    Accumulate {
        sources: Vec<NodeHandle>,
    },
}

impl Instruction {
    pub fn name(&self) -> String {
        match self {
            Instruction::ReadInput { slot } => format!("ReadInput({})", slot),
            Instruction::Forward { kernel, .. } => kernel.label.clone(),
            Instruction::Concat { sources } => format!("Concat({})", sources.len()),
            Instruction::Gradient { label, .. } => format!("{}Gradient", label),
            Instruction::ConcatGradient { index, .. } => format!("ConcatGradient[{}]", index),
            Instruction::OutputGradient { .. } => "OutputGradient".to_string(),
            Instruction::Accumulate { sources } => format!("Accumulate({})", sources.len()),
        }
    }

    pub fn is_gradient(&self) -> bool {
        matches!(
            self,
            Instruction::Gradient { .. }
                | Instruction::ConcatGradient { .. }
                | Instruction::OutputGradient { .. }
                | Instruction::Accumulate { .. }
        )
    }
}
