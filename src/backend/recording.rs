use log::debug;

use crate::layer::{padding::PaddingPolicy, param_source::ParamDataSource};

use super::{
    backend::{BackendError, GraphBackend, NodeHandle},
    instruction::Instruction,
    kernel::{KernelDesc, KernelKind},
};

/// Dry-run backend that records every node it is asked to append.
///
/// Useful for validating a document without a device, and as the reference
/// backend in tests: it enforces the same ordering rules a real backend does
/// (gradients must name an existing forward node of the right kind).
#[derive(Default)]
pub struct RecordingBackend {
    instructions: Vec<Instruction>,
    fail_on: Option<String>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    // Fail any forward kernel whose label contains `label`
    pub fn fail_on_label(mut self, label: impl Into<String>) -> Self {
        self.fail_on = Some(label.into());
        self
    }

    pub fn add_input(&mut self, slot: usize) -> NodeHandle {
        self.push(Instruction::ReadInput { slot })
    }

    pub fn add_inputs(&mut self, count: usize) -> Vec<NodeHandle> {
        (0..count).map(|slot| self.add_input(slot)).collect()
    }

    pub fn instruction(&self, handle: NodeHandle) -> Option<&Instruction> {
        self.instructions.get(handle.0)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn gradient_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.is_gradient()).count()
    }

    fn push(&mut self, instruction: Instruction) -> NodeHandle {
        let handle = NodeHandle(self.instructions.len());
        debug!("node {} = {}", handle.0, instruction.name());
        self.instructions.push(instruction);
        handle
    }

    fn check_exists(&self, handle: NodeHandle) -> Result<(), BackendError> {
        if handle.0 >= self.instructions.len() {
            return Err(BackendError::new(format!(
                "node {} does not exist",
                handle.0
            )));
        }
        Ok(())
    }
}

impl GraphBackend for RecordingBackend {
    fn append_forward_kernel(
        &mut self,
        kernel: &KernelDesc,
        padding: &PaddingPolicy,
        params: Option<&mut ParamDataSource>,
        input: NodeHandle,
    ) -> Result<NodeHandle, BackendError> {
        self.check_exists(input)?;

        if let Some(label) = &self.fail_on {
            if kernel.label.contains(label.as_str()) {
                return Err(BackendError::new(format!(
                    "kernel {} rejected",
                    kernel.label
                )));
            }
        }

        // A real backend uploads these; sizing them is all a dry run needs
        if let (KernelKind::Normalization { kind, .. }, Some(params)) = (&kernel.kind, params) {
            for name in kind.parameter_names() {
                params.get(name);
            }
        }

        Ok(self.push(Instruction::Forward {
            kernel: kernel.clone(),
            padding: *padding,
            src: input,
        }))
    }

    fn append_gradient_kernel(
        &mut self,
        forward: NodeHandle,
        kernel: &KernelDesc,
        output_gradient: NodeHandle,
    ) -> Result<NodeHandle, BackendError> {
        self.check_exists(output_gradient)?;

        match self.instruction(forward) {
            Some(Instruction::Forward { kernel: recorded, .. }) if recorded.label == kernel.label => {}
            _ => {
                return Err(BackendError::new(format!(
                    "no forward node {} for {} gradient",
                    forward.0, kernel.label
                )))
            }
        }

        Ok(self.push(Instruction::Gradient {
            forward,
            label: kernel.label.clone(),
            src: output_gradient,
        }))
    }

    fn append_concatenation(&mut self, inputs: &[NodeHandle]) -> Result<NodeHandle, BackendError> {
        if inputs.is_empty() {
            return Err(BackendError::new("concatenation needs at least one input"));
        }
        for &input in inputs {
            self.check_exists(input)?;
        }

        Ok(self.push(Instruction::Concat {
            sources: inputs.to_vec(),
        }))
    }

    fn append_concatenation_gradient(
        &mut self,
        concatenation: NodeHandle,
        output_gradient: NodeHandle,
    ) -> Result<Vec<NodeHandle>, BackendError> {
        self.check_exists(output_gradient)?;

        let source_count = match self.instruction(concatenation) {
            Some(Instruction::Concat { sources }) => sources.len(),
            _ => {
                return Err(BackendError::new(format!(
                    "node {} is not a concatenation",
                    concatenation.0
                )))
            }
        };

        Ok((0..source_count)
            .map(|index| {
                self.push(Instruction::ConcatGradient {
                    concatenation,
                    index,
                    src: output_gradient,
                })
            })
            .collect())
    }

    fn append_output_gradient(&mut self, output: NodeHandle) -> Result<NodeHandle, BackendError> {
        self.check_exists(output)?;
        Ok(self.push(Instruction::OutputGradient { src: output }))
    }

    fn append_gradient_accumulation(
        &mut self,
        gradients: &[NodeHandle],
    ) -> Result<NodeHandle, BackendError> {
        match gradients {
            [] => Err(BackendError::new("nothing to accumulate")),
            [single] => {
                self.check_exists(*single)?;
                Ok(*single)
            }
            _ => {
                for &gradient in gradients {
                    self.check_exists(gradient)?;
                }
                Ok(self.push(Instruction::Accumulate {
                    sources: gradients.to_vec(),
                }))
            }
        }
    }
}
