use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    backend::backend::{GraphBackend, NodeHandle},
    error::FlowError,
    layer::layer::Layer,
    tensor::dim_vector::DimVector,
};

use super::{
    fusion::{FusionNodes, FusionPlan, CHANNEL_ALIGNMENT},
    input_source::{FlowId, InputSource},
};

// Handles produced by one forward build of a flow
#[derive(Clone, Debug, PartialEq)]
pub struct ForwardGraph {
    pub inputs: Vec<NodeHandle>,
    pub fusion: Option<FusionNodes>,
    pub layer_nodes: Vec<NodeHandle>,
    pub output: NodeHandle,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum BuildState {
    #[default]
    Unbuilt,
    DimensionsInferred,
    ForwardBuilt(ForwardGraph),
    BackwardBuilt {
        forward: ForwardGraph,
        input_gradients: Vec<NodeHandle>,
    },
}

impl BuildState {
    pub fn name(&self) -> &'static str {
        match self {
            BuildState::Unbuilt => "Unbuilt",
            BuildState::DimensionsInferred => "DimensionsInferred",
            BuildState::ForwardBuilt(_) => "ForwardBuilt",
            BuildState::BackwardBuilt { .. } => "BackwardBuilt",
        }
    }
}

/// An ordered chain of layers fed by one or more input sources.
///
/// Shapes and graph handles are derived state: they are recomputed by
/// [`Flow::infer_dimensions`] and the build calls, and any edit resets the
/// flow to [`BuildState::Unbuilt`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub label: String,
    layers: Vec<Layer>,
    inputs: Vec<InputSource>,

    #[serde(skip)]
    source_sizes: Vec<DimVector>,
    #[serde(skip)]
    layer_input_sizes: Vec<DimVector>,
    #[serde(skip)]
    current_input_size: DimVector,
    #[serde(skip)]
    current_output_size: DimVector,
    #[serde(skip)]
    state: BuildState,
}

impl Flow {
    pub fn new(label: impl Into<String>) -> Self {
        Self::new_with(label, Vec::new(), Vec::new())
    }

    pub fn new_with(label: impl Into<String>, inputs: Vec<InputSource>, layers: Vec<Layer>) -> Self {
        Self {
            label: label.into(),
            layers,
            inputs,
            source_sizes: Vec::new(),
            layer_input_sizes: Vec::new(),
            current_input_size: DimVector::UNRESOLVED,
            current_output_size: DimVector::UNRESOLVED,
            state: BuildState::Unbuilt,
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn inputs(&self) -> &[InputSource] {
        &self.inputs
    }

    pub fn dependencies(&self) -> impl Iterator<Item = FlowId> + '_ {
        self.inputs.iter().filter_map(|source| source.get_flowid())
    }

    pub fn state(&self) -> &BuildState {
        &self.state
    }

    pub fn current_input_size(&self) -> DimVector {
        self.current_input_size
    }

    pub fn current_output_size(&self) -> DimVector {
        self.current_output_size
    }

    pub fn source_sizes(&self) -> &[DimVector] {
        &self.source_sizes
    }

    // Input shape seen by each layer during the last inference
    pub fn layer_input_sizes(&self) -> &[DimVector] {
        &self.layer_input_sizes
    }

    pub fn forward_graph(&self) -> Option<&ForwardGraph> {
        match &self.state {
            BuildState::ForwardBuilt(forward) => Some(forward),
            BuildState::BackwardBuilt { forward, .. } => Some(forward),
            _ => None,
        }
    }

    pub fn output_handle(&self) -> Option<NodeHandle> {
        self.forward_graph().map(|forward| forward.output)
    }

    pub fn input_gradients(&self) -> Option<&[NodeHandle]> {
        match &self.state {
            BuildState::BackwardBuilt { input_gradients, .. } => Some(input_gradients),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = BuildState::Unbuilt;
    }

    // Layer edits

    pub fn push_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
        self.reset();
    }

    pub fn insert_layer(&mut self, index: usize, layer: Layer) -> Result<(), FlowError> {
        if index > self.layers.len() {
            return Err(FlowError::LayerNotFound(index));
        }
        self.layers.insert(index, layer);
        self.reset();
        Ok(())
    }

    pub fn remove_layer(&mut self, index: usize) -> Result<Layer, FlowError> {
        if index >= self.layers.len() {
            return Err(FlowError::LayerNotFound(index));
        }
        self.reset();
        Ok(self.layers.remove(index))
    }

    pub fn move_layer(&mut self, from: usize, to: usize) -> Result<(), FlowError> {
        if from >= self.layers.len() {
            return Err(FlowError::LayerNotFound(from));
        }
        if to >= self.layers.len() {
            return Err(FlowError::LayerNotFound(to));
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        self.reset();
        Ok(())
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.reset();
        self.layers.get_mut(index)
    }

    // Input edits go through FlowGraph, which checks references first
    pub(crate) fn inputs_mut(&mut self) -> &mut Vec<InputSource> {
        self.reset();
        &mut self.inputs
    }

    /// Combines resolved source shapes into the shape the first layer sees.
    ///
    /// A single source passes through. Several sources are stacked along the
    /// channel axis (`Σ channels × time_steps`) using the first source's
    /// width and height; mismatched extents are not checked here.
    pub fn combine_source_sizes(sizes: &[DimVector]) -> DimVector {
        match sizes {
            [] => DimVector::UNRESOLVED,
            [single] => *single,
            [first, ..] => {
                if sizes.iter().any(|size| !size.is_resolved()) {
                    return DimVector::UNRESOLVED;
                }
                sizes.iter().fold(
                    DimVector::new(first.width, first.height, 0, 1),
                    |combined, size| combined.with_channels_added(size.channels, size.time_steps),
                )
            }
        }
    }

    /// Re-runs dimension inference over this flow's layer chain.
    ///
    /// Returns whether the input or output shape differs from the previous
    /// inference, so callers can decide whether dependents need another pass.
    pub fn infer_dimensions<F>(&mut self, resolve: F) -> Result<bool, FlowError>
    where
        F: FnMut(&InputSource) -> Result<DimVector, FlowError>,
    {
        match self.infer_chain(resolve) {
            Ok((source_sizes, input_size, layer_input_sizes, output_size)) => {
                let changed = input_size.changed_from(&self.current_input_size)
                    || output_size.changed_from(&self.current_output_size);

                self.source_sizes = source_sizes;
                self.layer_input_sizes = layer_input_sizes;
                self.current_input_size = input_size;
                self.current_output_size = output_size;
                self.state = BuildState::DimensionsInferred;

                debug!(
                    "{}: {} -> {}{}",
                    self.label,
                    input_size,
                    output_size,
                    if changed { " (changed)" } else { "" }
                );
                Ok(changed)
            }
            Err(e) => {
                // Never leave shapes from a configuration that no longer infers
                self.clear_inference();
                Err(e.in_flow(&self.label))
            }
        }
    }

    // Drop cached shapes so nothing reads them until the next inference
    pub(crate) fn clear_inference(&mut self) {
        self.source_sizes.clear();
        self.layer_input_sizes.clear();
        self.current_input_size = DimVector::UNRESOLVED;
        self.current_output_size = DimVector::UNRESOLVED;
        self.state = BuildState::Unbuilt;
    }

    #[allow(clippy::type_complexity)]
    fn infer_chain<F>(
        &self,
        mut resolve: F,
    ) -> Result<(Vec<DimVector>, DimVector, Vec<DimVector>, DimVector), FlowError>
    where
        F: FnMut(&InputSource) -> Result<DimVector, FlowError>,
    {
        if self.inputs.is_empty() {
            return Err(FlowError::NoInputs(self.label.clone()));
        }

        let source_sizes = self
            .inputs
            .iter()
            .map(&mut resolve)
            .collect::<Result<Vec<_>, _>>()?;
        let input_size = Self::combine_source_sizes(&source_sizes);

        let mut layer_input_sizes = Vec::with_capacity(self.layers.len());
        let mut current = input_size;
        for layer in &self.layers {
            layer_input_sizes.push(current);
            current = layer.output_shape(&current)?;
        }

        Ok((source_sizes, input_size, layer_input_sizes, current))
    }

    pub fn build_forward_graph(
        &mut self,
        backend: &mut dyn GraphBackend,
        raw_inputs: &[NodeHandle],
        flow_outputs: &[Option<NodeHandle>],
    ) -> Result<NodeHandle, FlowError> {
        self.build_forward_graph_with(backend, raw_inputs, flow_outputs, CHANNEL_ALIGNMENT)
    }

    /// Appends this flow's forward nodes, fusing several sources first.
    ///
    /// `flow_outputs[id]` is the output handle of flow `id`, or `None` if it
    /// has not been built yet (which fails with `FusionMissing`).
    pub fn build_forward_graph_with(
        &mut self,
        backend: &mut dyn GraphBackend,
        raw_inputs: &[NodeHandle],
        flow_outputs: &[Option<NodeHandle>],
        channel_alignment: usize,
    ) -> Result<NodeHandle, FlowError> {
        if self.state != BuildState::DimensionsInferred {
            return Err(FlowError::InvalidState {
                expected: "DimensionsInferred",
                actual: self.state.name(),
            });
        }
        if self.inputs.is_empty() {
            return Err(FlowError::NoInputs(self.label.clone()));
        }
        if !self.current_input_size.is_resolved() {
            return Err(FlowError::shape(self.label.clone(), "input shape is unresolved"));
        }

        let handles = self
            .inputs
            .iter()
            .map(|source| match source {
                InputSource::RawInput(slot) => raw_inputs.get(*slot).copied().ok_or_else(|| {
                    FlowError::InvalidInputSource(format!("raw input {} has no graph handle", slot))
                }),
                InputSource::FlowOutput(id) => flow_outputs
                    .get(*id)
                    .copied()
                    .flatten()
                    .ok_or(FlowError::FusionMissing { dependency: *id }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (fusion, mut current) = if handles.len() > 1 {
            let channel_counts: Vec<usize> = self
                .source_sizes
                .iter()
                .map(|size| size.stacked_channels().max(0) as usize)
                .collect();
            let plan = FusionPlan::with_alignment(&channel_counts, channel_alignment)?;
            let nodes = FusionNodes::build(backend, &plan, &handles, &self.current_input_size)?;
            let contraction = nodes.contraction;
            (Some(nodes), contraction)
        } else {
            (None, handles[0])
        };

        let mut layer_nodes = Vec::with_capacity(self.layers.len());
        for (layer, input_size) in self.layers.iter_mut().zip(&self.layer_input_sizes) {
            current = layer.forward_node(backend, input_size, current)?;
            layer_nodes.push(current);
        }

        debug!("{}: forward graph ends at node {}", self.label, current.0);
        self.state = BuildState::ForwardBuilt(ForwardGraph {
            inputs: handles,
            fusion,
            layer_nodes,
            output: current,
        });

        Ok(current)
    }

    /// Appends gradient nodes in reverse layer order.
    ///
    /// Returns one input gradient per input source, in declaration order.
    pub fn build_backward_graph(
        &mut self,
        backend: &mut dyn GraphBackend,
        output_gradient: NodeHandle,
    ) -> Result<Vec<NodeHandle>, FlowError> {
        let forward = match &self.state {
            BuildState::ForwardBuilt(forward) => forward.clone(),
            other => {
                return Err(FlowError::InvalidState {
                    expected: "ForwardBuilt",
                    actual: other.name(),
                })
            }
        };

        let mut gradient = output_gradient;
        let steps = self
            .layers
            .iter()
            .zip(&self.layer_input_sizes)
            .zip(&forward.layer_nodes);
        for ((layer, input_size), &forward_node) in steps.rev() {
            gradient = layer.gradient_node(backend, forward_node, input_size, gradient)?;
        }

        let input_gradients = match &forward.fusion {
            Some(fusion) => fusion.gradients(backend, gradient)?,
            None => vec![gradient],
        };

        self.state = BuildState::BackwardBuilt {
            forward,
            input_gradients: input_gradients.clone(),
        };

        Ok(input_gradients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::recording::RecordingBackend, layer::factory::Layers};

    fn raw_sizes(sizes: &[DimVector]) -> impl FnMut(&InputSource) -> Result<DimVector, FlowError> + '_ {
        move |source| match source {
            InputSource::RawInput(slot) => sizes
                .get(*slot)
                .copied()
                .ok_or_else(|| FlowError::InvalidInputSource(format!("raw {}", slot))),
            InputSource::FlowOutput(id) => Err(FlowError::FusionMissing { dependency: *id }),
        }
    }

    #[test]
    fn test_combine_sources_sums_channel_time() {
        let combined = Flow::combine_source_sizes(&[
            DimVector::new(8, 8, 3, 1),
            DimVector::new(4, 4, 5, 2),
        ]);
        assert_eq!(combined, DimVector::new(8, 8, 13, 1));
    }

    #[test]
    fn test_infer_twice_is_unchanged() {
        let sizes = [DimVector::new(28, 28, 1, 1)];
        let mut flow = Flow::new_with(
            "conv",
            vec![InputSource::RawInput(0)],
            vec![Layers::conv2d(8), Layers::relu(), Layers::max_pool(2)],
        );

        assert!(flow.infer_dimensions(raw_sizes(&sizes)).unwrap());
        assert_eq!(flow.current_output_size(), DimVector::new(13, 13, 8, 1));
        assert!(!flow.infer_dimensions(raw_sizes(&sizes)).unwrap());
        assert_eq!(flow.state(), &BuildState::DimensionsInferred);
    }

    #[test]
    fn test_no_inputs_fails() {
        let mut flow = Flow::new_with("empty", vec![], vec![Layers::relu()]);
        let result = flow.infer_dimensions(raw_sizes(&[]));
        assert!(matches!(result, Err(FlowError::NoInputs(_))));
    }

    #[test]
    fn test_shape_error_clears_cached_sizes() {
        let sizes = [DimVector::new(2, 2, 1, 1)];
        let mut flow = Flow::new_with("bad", vec![InputSource::RawInput(0)], vec![Layers::conv2d(4)]);

        assert!(matches!(
            flow.infer_dimensions(raw_sizes(&sizes)),
            Err(FlowError::ShapeError { layer, .. }) if layer == "bad/Conv2D"
        ));
        assert!(!flow.current_output_size().is_resolved());
        assert_eq!(flow.state(), &BuildState::Unbuilt);
    }

    #[test]
    fn test_forward_requires_inference() {
        let mut backend = RecordingBackend::new();
        let inputs = backend.add_inputs(1);
        let mut flow = Flow::new_with("f", vec![InputSource::RawInput(0)], vec![Layers::relu()]);

        let result = flow.build_forward_graph(&mut backend, &inputs, &[]);
        assert!(matches!(result, Err(FlowError::InvalidState { .. })));
    }

    #[test]
    fn test_backward_requires_forward() {
        let sizes = [DimVector::new(4, 4, 1, 1)];
        let mut backend = RecordingBackend::new();
        let mut flow = Flow::new_with("f", vec![InputSource::RawInput(0)], vec![Layers::relu()]);
        flow.infer_dimensions(raw_sizes(&sizes)).unwrap();

        let result = flow.build_backward_graph(&mut backend, NodeHandle(0));
        assert!(matches!(result, Err(FlowError::InvalidState { expected: "ForwardBuilt", .. })));
    }

    #[test]
    fn test_single_source_round_trip() {
        let sizes = [DimVector::new(6, 6, 2, 1)];
        let mut backend = RecordingBackend::new();
        let inputs = backend.add_inputs(1);
        let mut flow = Flow::new_with(
            "f",
            vec![InputSource::RawInput(0)],
            vec![Layers::batch_norm(), Layers::relu()],
        );

        flow.infer_dimensions(raw_sizes(&sizes)).unwrap();
        let output = flow.build_forward_graph(&mut backend, &inputs, &[]).unwrap();
        let gradients = flow.build_backward_graph(&mut backend, output).unwrap();

        assert_eq!(gradients.len(), 1);
        assert!(flow.forward_graph().unwrap().fusion.is_none());
        assert_eq!(flow.state().name(), "BackwardBuilt");

        match &flow.layers()[0] {
            Layer::Normalization(norm) => assert_eq!(norm.data_source.channel_count(), 2),
            other => panic!("unexpected layer {:?}", other),
        }
    }

    #[test]
    fn test_layer_edit_resets_state() {
        let sizes = [DimVector::new(4, 4, 1, 1)];
        let mut flow = Flow::new_with("f", vec![InputSource::RawInput(0)], vec![Layers::relu()]);
        flow.infer_dimensions(raw_sizes(&sizes)).unwrap();

        flow.push_layer(Layers::sigmoid());
        assert_eq!(flow.state(), &BuildState::Unbuilt);
        flow.move_layer(1, 0).unwrap();
        assert_eq!(flow.layers()[0].name(), "Sigmoid");
        assert!(flow.remove_layer(5).is_err());
    }
}
