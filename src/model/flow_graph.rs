use std::collections::HashSet;

use log::{debug, info, warn};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefMutIterator, ParallelIterator};

use crate::{
    backend::backend::{GraphBackend, NodeHandle},
    config::GraphConfig,
    error::FlowError,
    tensor::dim_vector::DimVector,
};

use super::{
    flow::Flow,
    input_source::{FlowId, InputSource},
};

pub struct GraphVerifiedData {
    pub entry_points: Vec<FlowId>,
    pub exit_points: Vec<FlowId>,
    pub execution_order: Vec<FlowId>,
    // Longest chain of flow references below each flow
    pub levels: Vec<usize>,
}

/// Handles produced by one full [`FlowGraph::build_all`].
#[derive(Clone, Debug, PartialEq)]
pub struct GraphBuild {
    // Forward output of every flow, indexed by flow id
    pub outputs: Vec<NodeHandle>,
    // Summed gradient per raw input slot, None for slots no flow reads
    pub raw_input_gradients: Vec<Option<NodeHandle>>,
}

/// The document: raw input slots plus flows that reference them and each other.
///
/// A flow's position is its id. Structural edits keep every `FlowOutput`
/// reference pointing at the same flow it did before the edit, and reject
/// edits that would make the references cyclic.
pub struct FlowGraph {
    flows: Vec<Flow>,
    raw_inputs: Vec<DimVector>,
    config: GraphConfig,
    verified: Option<GraphVerifiedData>,
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowGraph {
    pub fn new() -> Self {
        Self {
            flows: Vec::new(),
            raw_inputs: Vec::new(),
            config: GraphConfig::default(),
            verified: None,
        }
    }

    pub fn new_with(config: GraphConfig) -> Result<Self, FlowError> {
        Ok(Self {
            config: config.build()?,
            ..Self::new()
        })
    }

    pub(crate) fn from_parts(
        raw_inputs: Vec<DimVector>,
        flows: Vec<Flow>,
        config: GraphConfig,
    ) -> Result<Self, FlowError> {
        let graph = Self {
            flows,
            raw_inputs,
            config: config.build()?,
            verified: None,
        };
        graph.check_structure()?;
        Ok(graph)
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GraphConfig) -> Result<(), FlowError> {
        self.config = config.build()?;
        Ok(())
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn flow(&self, id: FlowId) -> Result<&Flow, FlowError> {
        self.flows.get(id).ok_or(FlowError::FlowNotFound(id))
    }

    // Layer edits through the returned flow reset only that flow
    pub fn flow_mut(&mut self, id: FlowId) -> Result<&mut Flow, FlowError> {
        self.verified = None;
        self.flows.get_mut(id).ok_or(FlowError::FlowNotFound(id))
    }

    pub fn verified(&self) -> Option<&GraphVerifiedData> {
        self.verified.as_ref()
    }

    pub fn execution_order(&self) -> Option<&[FlowId]> {
        self.verified.as_ref().map(|v| v.execution_order.as_slice())
    }

    // Raw inputs

    pub fn raw_inputs(&self) -> &[DimVector] {
        &self.raw_inputs
    }

    pub fn add_raw_input(&mut self, shape: DimVector) -> usize {
        self.raw_inputs.push(shape);
        self.reset_all();
        self.raw_inputs.len() - 1
    }

    pub fn set_raw_input(&mut self, slot: usize, shape: DimVector) -> Result<(), FlowError> {
        let current = self.raw_inputs.get_mut(slot).ok_or_else(|| {
            FlowError::InvalidInputSource(format!("raw input {} does not exist", slot))
        })?;
        *current = shape;
        self.reset_all();
        Ok(())
    }

    // Structural edits

    pub fn add_flow(&mut self, flow: Flow) -> Result<FlowId, FlowError> {
        let id = self.flows.len();
        self.edit(|flows| {
            flows.push(flow);
            Ok(())
        })?;
        info!("Added flow {} '{}'", id, self.flows[id].label);
        Ok(id)
    }

    /// Inserts `flow` at `index`, shifting later flows up by one.
    ///
    /// The new flow's own `FlowOutput` references use the numbering from
    /// before the insertion, like every other reference in the graph.
    pub fn insert_flow(&mut self, index: FlowId, flow: Flow) -> Result<FlowId, FlowError> {
        if index > self.flows.len() {
            return Err(FlowError::FlowNotFound(index));
        }

        self.edit(|flows| {
            flows.insert(index, flow);
            let shift = |id: FlowId| if id >= index { id + 1 } else { id };
            for flow in flows.iter_mut() {
                let renumbered = flow.inputs().iter().map(|s| s.renumbered(shift)).collect();
                *flow.inputs_mut() = renumbered;
            }
            Ok(())
        })?;

        info!("Inserted flow {} '{}'", index, self.flows[index].label);
        Ok(index)
    }

    /// Removes a flow and drops every reference other flows held to it.
    pub fn remove_flow(&mut self, id: FlowId) -> Result<Flow, FlowError> {
        if id >= self.flows.len() {
            return Err(FlowError::FlowNotFound(id));
        }

        let removed = self.flows.remove(id);
        for (position, flow) in self.flows.iter_mut().enumerate() {
            let before = flow.inputs().len();
            let kept: Vec<InputSource> = flow
                .inputs()
                .iter()
                .filter(|source| source.get_flowid() != Some(id))
                .map(|source| source.renumbered(|other| if other > id { other - 1 } else { other }))
                .collect();

            if kept.len() != before {
                warn!(
                    "Flow '{}' lost {} input(s) from removed flow '{}'",
                    flow.label,
                    before - kept.len(),
                    removed.label
                );
                if kept.is_empty() {
                    warn!("Flow {} '{}' has no inputs left", position, flow.label);
                }
            }
            *flow.inputs_mut() = kept;
        }

        self.reset_all();
        info!("Removed flow {} '{}'", id, removed.label);
        Ok(removed)
    }

    /// Copies a flow's layers and inputs into a new flow placed right after it.
    ///
    /// Nothing is rewired to read from the copy.
    pub fn duplicate_flow(&mut self, id: FlowId) -> Result<FlowId, FlowError> {
        let original = self.flow(id)?;
        let copy = Flow::new_with(
            format!("{} copy", original.label),
            original.inputs().to_vec(),
            original.layers().to_vec(),
        );
        self.insert_flow(id + 1, copy)
    }

    pub fn add_input_source(&mut self, id: FlowId, source: InputSource) -> Result<(), FlowError> {
        self.flow(id)?;

        self.edit(|flows| {
            flows[id].inputs_mut().push(source);
            Ok(())
        })
        .map_err(|e| match (e, source) {
            // Name the edge the caller tried to add
            (FlowError::CycleDetected { .. }, InputSource::FlowOutput(to)) => {
                FlowError::CycleDetected { from: id, to }
            }
            (e, _) => e,
        })
    }

    pub fn remove_input_source(&mut self, id: FlowId, index: usize) -> Result<InputSource, FlowError> {
        let flow = self.flows.get_mut(id).ok_or(FlowError::FlowNotFound(id))?;
        if index >= flow.inputs().len() {
            return Err(FlowError::InvalidInputSource(format!(
                "flow {} has no input {}",
                id, index
            )));
        }

        let removed = flow.inputs_mut().remove(index);
        self.reset_all();
        Ok(removed)
    }

    // Apply an edit to the flow list, restoring it if the result is invalid
    fn edit<F>(&mut self, apply: F) -> Result<(), FlowError>
    where
        F: FnOnce(&mut Vec<Flow>) -> Result<(), FlowError>,
    {
        let snapshot = self.flows.clone();

        let result = apply(&mut self.flows).and_then(|_| self.check_structure());
        if let Err(e) = result {
            self.flows = snapshot;
            return Err(e);
        }

        self.reset_all();
        Ok(())
    }

    fn reset_all(&mut self) {
        self.verified = None;
        for flow in &mut self.flows {
            flow.reset();
        }
    }

    // Validation

    // References point at existing slots and flows, and contain no cycle
    fn check_structure(&self) -> Result<(), FlowError> {
        for (id, flow) in self.flows.iter().enumerate() {
            for source in flow.inputs() {
                match *source {
                    InputSource::RawInput(slot) if slot >= self.raw_inputs.len() => {
                        return Err(FlowError::InvalidInputSource(format!(
                            "flow {} reads raw input {}, but only {} exist",
                            id,
                            slot,
                            self.raw_inputs.len()
                        )));
                    }
                    InputSource::FlowOutput(other) if other >= self.flows.len() => {
                        return Err(FlowError::InvalidInputSource(format!(
                            "flow {} reads missing flow {}",
                            id, other
                        )));
                    }
                    _ => {}
                }
            }
        }

        match self.find_cycle() {
            Some((from, to)) => Err(FlowError::CycleDetected { from, to }),
            None => Ok(()),
        }
    }

    // Depth-first search over dependency edges; returns the edge closing a cycle
    fn find_cycle(&self) -> Option<(FlowId, FlowId)> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for id in 0..self.flows.len() {
            if !visited.contains(&id) {
                if let Some(edge) = self.find_cycle_from(id, &mut visited, &mut rec_stack) {
                    return Some(edge);
                }
            }
        }
        None
    }

    fn find_cycle_from(
        &self,
        id: FlowId,
        visited: &mut HashSet<FlowId>,
        rec_stack: &mut HashSet<FlowId>,
    ) -> Option<(FlowId, FlowId)> {
        visited.insert(id);
        rec_stack.insert(id);

        for next_id in self.flows[id].dependencies() {
            if !visited.contains(&next_id) {
                if let Some(edge) = self.find_cycle_from(next_id, visited, rec_stack) {
                    return Some(edge);
                }
            } else if rec_stack.contains(&next_id) {
                return Some((id, next_id));
            }
        }

        rec_stack.remove(&id);
        None
    }

    pub fn consumers(&self, id: FlowId) -> Vec<FlowId> {
        self.flows
            .iter()
            .enumerate()
            .filter(|(_, flow)| flow.dependencies().any(|dep| dep == id))
            .map(|(consumer, _)| consumer)
            .collect()
    }

    /// Checks references and computes the evaluation order.
    ///
    /// Flows are grouped by level (0 for flows reading only raw inputs, one
    /// more than their deepest dependency otherwise) and ordered level-major,
    /// ascending id within a level.
    pub fn verify(&mut self) -> Result<&GraphVerifiedData, FlowError> {
        self.check_structure()?;

        let mut levels: Vec<Option<usize>> = vec![None; self.flows.len()];
        for id in 0..self.flows.len() {
            self.visit_level(id, &mut levels);
        }
        let levels: Vec<usize> = levels.into_iter().map(|level| level.unwrap_or(0)).collect();

        let mut execution_order: Vec<FlowId> = (0..self.flows.len()).collect();
        execution_order.sort_by_key(|&id| (levels[id], id));

        let entry_points = (0..self.flows.len())
            .filter(|&id| self.flows[id].dependencies().next().is_none())
            .collect();

        let consumed: HashSet<FlowId> = self.flows.iter().flat_map(|flow| flow.dependencies()).collect();
        let exit_points = (0..self.flows.len()).filter(|id| !consumed.contains(id)).collect();

        debug!("Execution order: {:?}", execution_order);
        Ok(self.verified.insert(GraphVerifiedData {
            entry_points,
            exit_points,
            execution_order,
            levels,
        }))
    }

    // Only called after check_structure, so the recursion terminates
    fn visit_level(&self, id: FlowId, levels: &mut [Option<usize>]) -> usize {
        if let Some(level) = levels[id] {
            return level;
        }

        let deps: Vec<FlowId> = self.flows[id].dependencies().collect();
        let level = deps
            .into_iter()
            .map(|dep| self.visit_level(dep, levels) + 1)
            .max()
            .unwrap_or(0);

        levels[id] = Some(level);
        level
    }

    fn ensure_verified(&mut self) -> Result<(Vec<FlowId>, Vec<usize>), FlowError> {
        if self.verified.is_none() {
            self.verify()?;
        }
        match &self.verified {
            Some(verified) => Ok((verified.execution_order.clone(), verified.levels.clone())),
            None => Err(FlowError::InvalidState {
                expected: "verified",
                actual: "unverified",
            }),
        }
    }

    // Dimension inference

    /// Infers every flow's shapes until nothing changes.
    ///
    /// Returns whether any flow's input or output shape changed. Fails with
    /// `InferenceDidNotConverge` if shapes are still moving after
    /// `max_inference_passes` passes.
    pub fn infer_all(&mut self) -> Result<bool, FlowError> {
        let (order, levels) = self.ensure_verified()?;
        let max_passes = self.config.max_inference_passes;

        let pool = if self.config.parallel_inference {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.worker_threads)
                .build()
                .map_err(|e| FlowError::InvalidConfig(format!("thread pool: {}", e)))?;
            Some(pool)
        } else {
            None
        };

        let mut outputs: Vec<DimVector> =
            self.flows.iter().map(|flow| flow.current_output_size()).collect();
        let mut any_changed = false;

        for pass in 1..=max_passes {
            let changed = match &pool {
                Some(pool) => self.infer_pass_parallel(pool, &levels, &mut outputs)?,
                None => self.infer_pass(&order, &mut outputs)?,
            };
            any_changed |= changed;

            if !changed {
                info!(
                    "Inferred {} flow(s) in {} pass(es)",
                    self.flows.len(),
                    pass
                );
                return Ok(any_changed);
            }
        }

        warn!("Shapes still changing after {} passes", max_passes);
        Err(FlowError::InferenceDidNotConverge(max_passes))
    }

    fn infer_pass(&mut self, order: &[FlowId], outputs: &mut [DimVector]) -> Result<bool, FlowError> {
        let raw_inputs = &self.raw_inputs;
        let mut changed = false;

        for (position, &id) in order.iter().enumerate() {
            let flow = &mut self.flows[id];
            match flow.infer_dimensions(|source| resolve_shape(source, raw_inputs, outputs)) {
                Ok(flow_changed) => changed |= flow_changed,
                Err(e) => {
                    // Flows not reached this pass may hold shapes built on the failed one
                    for &rest in &order[position + 1..] {
                        self.flows[rest].clear_inference();
                    }
                    return Err(e);
                }
            }
            outputs[id] = self.flows[id].current_output_size();
        }

        Ok(changed)
    }

    // Flows within a level share no references, so each level infers in parallel
    fn infer_pass_parallel(
        &mut self,
        pool: &rayon::ThreadPool,
        levels: &[usize],
        outputs: &mut [DimVector],
    ) -> Result<bool, FlowError> {
        let level_count = levels.iter().max().map_or(0, |max| max + 1);
        let raw_inputs = &self.raw_inputs;
        let mut changed = false;

        for level in 0..level_count {
            let snapshot: &[DimVector] = &*outputs;
            let results: Vec<(FlowId, Result<bool, FlowError>, DimVector)> = pool.install(|| {
                self.flows
                    .par_iter_mut()
                    .enumerate()
                    .filter(|(id, _)| levels[*id] == level)
                    .map(|(id, flow)| {
                        let result =
                            flow.infer_dimensions(|source| resolve_shape(source, raw_inputs, snapshot));
                        (id, result, flow.current_output_size())
                    })
                    .collect()
            });

            // Results arrive in ascending id, so the first error matches a sequential pass
            let mut failure = None;
            for (id, result, output) in results {
                match result {
                    Ok(flow_changed) => {
                        changed |= flow_changed;
                        outputs[id] = output;
                    }
                    Err(e) => {
                        if failure.is_none() {
                            failure = Some(e);
                        }
                    }
                }
            }

            if let Some(e) = failure {
                for (id, flow) in self.flows.iter_mut().enumerate() {
                    if levels[id] > level {
                        flow.clear_inference();
                    }
                }
                return Err(e);
            }
        }

        Ok(changed)
    }

    // Graph construction

    /// Appends every flow's forward graph in execution order.
    ///
    /// `raw_handles[slot]` is the backend node holding raw input `slot`.
    /// Returns each flow's output handle, indexed by flow id.
    pub fn build_forward_all(
        &mut self,
        backend: &mut dyn GraphBackend,
        raw_handles: &[NodeHandle],
    ) -> Result<Vec<NodeHandle>, FlowError> {
        let (order, _) = self.ensure_verified()?;
        let alignment = self.config.channel_alignment;
        let mut outputs: Vec<Option<NodeHandle>> = vec![None; self.flows.len()];

        for id in order {
            let handle =
                self.flows[id].build_forward_graph_with(backend, raw_handles, &outputs, alignment)?;
            outputs[id] = Some(handle);
        }

        outputs
            .into_iter()
            .enumerate()
            .map(|(id, handle)| handle.ok_or(FlowError::FusionMissing { dependency: id }))
            .collect()
    }

    /// Appends every flow's gradient graph in reverse execution order.
    ///
    /// Exit flows are seeded from the backend's output gradient. A flow read
    /// by several consumers gets the sum of their gradients. Returns the
    /// summed gradient per raw input slot.
    pub fn build_backward_all(
        &mut self,
        backend: &mut dyn GraphBackend,
    ) -> Result<Vec<Option<NodeHandle>>, FlowError> {
        let (order, _) = self.ensure_verified()?;
        let mut pending: Vec<Vec<NodeHandle>> = vec![Vec::new(); self.flows.len()];
        let mut raw_pending: Vec<Vec<NodeHandle>> = vec![Vec::new(); self.raw_inputs.len()];

        for id in order.into_iter().rev() {
            let flow = &mut self.flows[id];
            let output = flow.output_handle().ok_or(FlowError::InvalidState {
                expected: "ForwardBuilt",
                actual: flow.state().name(),
            })?;

            // Every consumer sits later in the order, so its gradients are already here
            let output_gradient = if pending[id].is_empty() {
                backend.append_output_gradient(output)?
            } else {
                backend.append_gradient_accumulation(&pending[id])?
            };

            let inputs = flow.inputs().to_vec();
            let gradients = flow.build_backward_graph(backend, output_gradient)?;

            for (source, gradient) in inputs.into_iter().zip(gradients) {
                match source {
                    InputSource::RawInput(slot) => raw_pending[slot].push(gradient),
                    InputSource::FlowOutput(dep) => pending[dep].push(gradient),
                }
            }
        }

        raw_pending
            .iter()
            .map(|gradients| {
                if gradients.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(backend.append_gradient_accumulation(gradients)?))
                }
            })
            .collect()
    }

    /// Re-infers every flow and builds the full forward and backward graph.
    pub fn build_all(
        &mut self,
        backend: &mut dyn GraphBackend,
        raw_handles: &[NodeHandle],
    ) -> Result<GraphBuild, FlowError> {
        self.infer_all()?;
        let outputs = self.build_forward_all(backend, raw_handles)?;
        let raw_input_gradients = self.build_backward_all(backend)?;

        info!(
            "Built {} flow(s): {} output(s), {} raw gradient(s)",
            self.flows.len(),
            outputs.len(),
            raw_input_gradients.iter().flatten().count()
        );

        Ok(GraphBuild {
            outputs,
            raw_input_gradients,
        })
    }
}

fn resolve_shape(
    source: &InputSource,
    raw_inputs: &[DimVector],
    outputs: &[DimVector],
) -> Result<DimVector, FlowError> {
    match *source {
        InputSource::RawInput(slot) => raw_inputs.get(slot).copied().ok_or_else(|| {
            FlowError::InvalidInputSource(format!("raw input {} does not exist", slot))
        }),
        InputSource::FlowOutput(id) => outputs.get(id).copied().ok_or(FlowError::FlowNotFound(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{factory::Layers, padding::PaddingPolicy};
    use crate::model::flow::BuildState;

    fn chain() -> FlowGraph {
        let mut graph = FlowGraph::new();
        graph.add_raw_input(DimVector::new(8, 8, 3, 1));
        graph
            .add_flow(Flow::new_with("a", vec![InputSource::RawInput(0)], vec![Layers::relu()]))
            .unwrap();
        graph
            .add_flow(Flow::new_with("b", vec![InputSource::FlowOutput(0)], vec![Layers::sigmoid()]))
            .unwrap();
        graph
    }

    #[test]
    fn test_levels_and_execution_order() {
        let mut graph = chain();
        // c only reads the raw input, so it shares a level with a
        graph
            .add_flow(Flow::new_with("c", vec![InputSource::RawInput(0)], vec![Layers::tanh()]))
            .unwrap();

        let verified = graph.verify().unwrap();
        assert_eq!(verified.levels, vec![0, 1, 0]);
        assert_eq!(verified.execution_order, vec![0, 2, 1]);
        assert_eq!(verified.entry_points, vec![0, 2]);
        assert_eq!(verified.exit_points, vec![1, 2]);
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let mut graph = chain();
        let result = graph.add_input_source(1, InputSource::FlowOutput(1));
        assert!(matches!(result, Err(FlowError::CycleDetected { from: 1, to: 1 })));
        assert_eq!(graph.flow(1).unwrap().inputs().len(), 1);
    }

    #[test]
    fn test_unknown_raw_slot_rejected() {
        let mut graph = chain();
        let result = graph.add_flow(Flow::new_with("x", vec![InputSource::RawInput(3)], vec![]));
        assert!(matches!(result, Err(FlowError::InvalidInputSource(_))));
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_chain_settles_in_two_passes() {
        let mut graph = chain();
        graph.config.max_inference_passes = 2;
        // A raw-only graph settles on the first pass, the second confirms it
        assert!(graph.infer_all().unwrap());
        assert!(!graph.infer_all().unwrap());
    }

    #[test]
    fn test_shape_error_aborts_inference() {
        let mut graph = chain();
        graph.flow_mut(1).unwrap().push_layer(Layers::conv2d_with(
            4,
            16,
            16,
            1,
            1,
            true,
            PaddingPolicy::valid_only(),
        ));

        assert!(matches!(graph.infer_all(), Err(FlowError::ShapeError { .. })));
        assert!(!graph.flow(1).unwrap().current_output_size().is_resolved());
    }

    fn break_first_flow(graph: &mut FlowGraph) {
        graph.flow_mut(0).unwrap().push_layer(Layers::conv2d_with(
            4,
            16,
            16,
            1,
            1,
            true,
            PaddingPolicy::valid_only(),
        ));
    }

    fn assert_discarded(flow: &Flow) {
        assert_eq!(flow.state(), &BuildState::Unbuilt);
        assert!(!flow.current_input_size().is_resolved());
        assert!(!flow.current_output_size().is_resolved());
    }

    #[test]
    fn test_failed_pass_discards_downstream_shapes() {
        let mut graph = chain();
        graph.infer_all().unwrap();
        assert!(graph.flow(1).unwrap().current_output_size().is_resolved());

        break_first_flow(&mut graph);
        assert!(matches!(
            graph.infer_all(),
            Err(FlowError::ShapeError { layer, .. }) if layer == "a/Conv2D"
        ));
        // b was never re-inferred, so its shapes from the old chain are gone
        assert_discarded(graph.flow(0).unwrap());
        assert_discarded(graph.flow(1).unwrap());
    }

    #[test]
    fn test_failed_parallel_level_discards_later_levels() {
        let mut graph = chain();
        graph.config.parallel_inference = true;
        graph.config.worker_threads = 2;
        graph.infer_all().unwrap();

        break_first_flow(&mut graph);
        assert!(matches!(graph.infer_all(), Err(FlowError::ShapeError { .. })));
        assert_discarded(graph.flow(0).unwrap());
        assert_discarded(graph.flow(1).unwrap());
    }
}
