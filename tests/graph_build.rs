use flowgraph::{
    backend::{instruction::Instruction, kernel::KernelKind, recording::RecordingBackend},
    layer::{layer::Layer, padding::PaddingPolicy},
    BuildState, DimVector, Flow, FlowError, FlowGraph, GraphConfig, InputSource, Layers,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn diamond() -> FlowGraph {
    let mut graph = FlowGraph::new();
    graph.add_raw_input(DimVector::new(16, 16, 3, 1));

    let stem = graph
        .add_flow(Flow::new_with(
            "stem",
            vec![InputSource::RawInput(0)],
            vec![Layers::conv2d(6), Layers::relu()],
        ))
        .unwrap();
    let left = graph
        .add_flow(Flow::new_with(
            "left",
            vec![InputSource::FlowOutput(stem)],
            vec![Layers::sigmoid()],
        ))
        .unwrap();
    let right = graph
        .add_flow(Flow::new_with(
            "right",
            vec![InputSource::FlowOutput(stem)],
            vec![Layers::depthwise_conv2d(2, 3)],
        ))
        .unwrap();
    graph
        .add_flow(Flow::new_with(
            "join",
            vec![InputSource::FlowOutput(left), InputSource::FlowOutput(right)],
            vec![Layers::max_pool(2), Layers::softmax()],
        ))
        .unwrap();

    graph
}

#[test]
fn round_trip_yields_one_gradient_per_source() {
    let mut rng = StdRng::seed_from_u64(727);

    for _ in 0..40 {
        let source_count = rng.gen_range(1..=8);
        let channels: Vec<i64> = (0..source_count).map(|_| rng.gen_range(1..=9)).collect();

        let mut graph = FlowGraph::new();
        for &c in &channels {
            graph.add_raw_input(DimVector::new(6, 6, c, 1));
        }
        let inputs = (0..source_count).map(InputSource::RawInput).collect();
        graph
            .add_flow(Flow::new_with("fused", inputs, vec![Layers::relu()]))
            .unwrap();

        let mut backend = RecordingBackend::new();
        let raw_handles = backend.add_inputs(source_count);
        let build = graph.build_all(&mut backend, &raw_handles).unwrap();

        let flow = graph.flow(0).unwrap();
        let total: i64 = channels.iter().sum();
        assert_eq!(flow.current_output_size(), DimVector::new(6, 6, total, 1));

        let gradients = flow.input_gradients().unwrap();
        assert_eq!(gradients.len(), source_count);

        for (index, gradient) in gradients.iter().enumerate() {
            match backend.instruction(*gradient) {
                Some(Instruction::ConcatGradient { index: split, .. }) => {
                    assert!(source_count > 1);
                    assert_eq!(*split, index);
                }
                Some(Instruction::Gradient { label, .. }) => {
                    assert_eq!(source_count, 1);
                    assert_eq!(label, "ReLU");
                }
                other => panic!("unexpected gradient node {:?}", other),
            }
            // A raw slot read once gets that gradient unchanged
            assert_eq!(build.raw_input_gradients[index], Some(*gradient));
        }
    }
}

#[test]
fn fusion_contraction_matches_combined_channels() {
    let mut graph = FlowGraph::new();
    graph.add_raw_input(DimVector::new(4, 4, 3, 1));
    graph.add_raw_input(DimVector::new(4, 4, 5, 1));
    graph
        .add_flow(Flow::new_with(
            "pair",
            vec![InputSource::RawInput(0), InputSource::RawInput(1)],
            vec![],
        ))
        .unwrap();

    let mut backend = RecordingBackend::new();
    let raw_handles = backend.add_inputs(2);
    let build = graph.build_all(&mut backend, &raw_handles).unwrap();

    match backend.instruction(build.outputs[0]) {
        Some(Instruction::Forward { kernel, .. }) => {
            assert_eq!(kernel.label, "Contraction");
            assert_eq!(kernel.input.channels, 12);
            assert_eq!(kernel.output.channels, 8);
            assert!(matches!(kernel.kind, KernelKind::Convolution { .. }));
        }
        other => panic!("expected contraction, got {:?}", other),
    }
}

#[test]
fn source_without_time_steps_adds_no_channels() {
    let mut graph = FlowGraph::new();
    graph.add_raw_input(DimVector::new(4, 4, 3, 1));
    graph.add_raw_input(DimVector::new(4, 4, 5, 0));
    graph
        .add_flow(Flow::new_with(
            "pair",
            vec![InputSource::RawInput(0), InputSource::RawInput(1)],
            vec![],
        ))
        .unwrap();

    let mut backend = RecordingBackend::new();
    let raw_handles = backend.add_inputs(2);
    let build = graph.build_all(&mut backend, &raw_handles).unwrap();

    let combined = graph.flow(0).unwrap().current_input_size();
    assert_eq!(combined, DimVector::new(4, 4, 3, 1));

    match backend.instruction(build.outputs[0]) {
        Some(Instruction::Forward { kernel, .. }) => {
            assert_eq!(kernel.label, "Contraction");
            assert_eq!(kernel.output.channels, combined.channels);
        }
        other => panic!("expected contraction, got {:?}", other),
    }
}

#[test]
fn inference_is_idempotent() {
    let mut graph = diamond();

    assert!(graph.infer_all().unwrap());
    let first: Vec<DimVector> = graph.flows().iter().map(|f| f.current_output_size()).collect();

    assert!(!graph.infer_all().unwrap());
    let second: Vec<DimVector> = graph.flows().iter().map(|f| f.current_output_size()).collect();
    assert_eq!(first, second);

    // stem 14×14×6, right keeps 14×14 and doubles channels, join stacks 6 + 12
    assert_eq!(second[2], DimVector::new(14, 14, 12, 1));
    assert_eq!(second[3], DimVector::new(7, 7, 18, 1));
}

#[test]
fn dependent_flow_needs_its_dependency_built_first() {
    let mut graph = FlowGraph::new();
    graph.add_raw_input(DimVector::new(8, 8, 2, 1));
    graph
        .add_flow(Flow::new_with("first", vec![InputSource::RawInput(0)], vec![Layers::relu()]))
        .unwrap();
    graph
        .add_flow(Flow::new_with(
            "second",
            vec![InputSource::FlowOutput(0)],
            vec![Layers::tanh()],
        ))
        .unwrap();
    graph.infer_all().unwrap();

    let mut backend = RecordingBackend::new();
    let raw_handles = backend.add_inputs(1);

    let early = graph
        .flow_mut(1)
        .unwrap()
        .build_forward_graph(&mut backend, &raw_handles, &[None, None]);
    assert!(matches!(early, Err(FlowError::FusionMissing { dependency: 0 })));

    let first = graph
        .flow_mut(0)
        .unwrap()
        .build_forward_graph(&mut backend, &raw_handles, &[])
        .unwrap();
    graph
        .flow_mut(1)
        .unwrap()
        .build_forward_graph(&mut backend, &raw_handles, &[Some(first), None])
        .unwrap();

    assert_eq!(graph.flow(1).unwrap().state().name(), "ForwardBuilt");
}

#[test]
fn shared_flow_gradients_are_accumulated() {
    let mut graph = diamond();
    let mut backend = RecordingBackend::new();
    let raw_handles = backend.add_inputs(1);

    let build = graph.build_all(&mut backend, &raw_handles).unwrap();

    let accumulations: Vec<&Instruction> = backend
        .instructions()
        .iter()
        .filter(|i| matches!(i, Instruction::Accumulate { .. }))
        .collect();
    // Only stem feeds more than one flow
    assert_eq!(accumulations.len(), 1);
    match accumulations[0] {
        Instruction::Accumulate { sources } => assert_eq!(sources.len(), 2),
        _ => unreachable!(),
    }

    let outputs_seeded = backend
        .instructions()
        .iter()
        .filter(|i| matches!(i, Instruction::OutputGradient { .. }))
        .count();
    assert_eq!(outputs_seeded, 1);

    assert!(build.raw_input_gradients[0].is_some());
    for flow in graph.flows() {
        assert!(matches!(flow.state(), BuildState::BackwardBuilt { .. }));
    }
}

#[test]
fn rebuild_after_edit_runs_the_full_cycle() {
    let mut graph = diamond();
    let mut backend = RecordingBackend::new();
    let raw_handles = backend.add_inputs(1);
    graph.build_all(&mut backend, &raw_handles).unwrap();

    graph.flow_mut(1).unwrap().push_layer(Layers::dropout(0.5));
    assert_eq!(graph.flow(1).unwrap().state(), &BuildState::Unbuilt);

    // Stale flows are not reused; build_all re-infers everything first
    graph.build_all(&mut backend, &raw_handles).unwrap();
    assert_eq!(graph.flow(1).unwrap().layers().len(), 2);
}

#[test]
fn backend_failures_propagate() {
    let mut graph = diamond();
    let mut backend = RecordingBackend::new().fail_on_label("Sigmoid");
    let raw_handles = backend.add_inputs(1);

    let result = graph.build_all(&mut backend, &raw_handles);
    match result {
        Err(FlowError::BackendError(e)) => assert!(e.reason.contains("Sigmoid")),
        other => panic!("expected backend error, got {:?}", other.map(|_| ())),
    }

    let mut graph = diamond();
    let mut backend = RecordingBackend::new().fail_on_label("Contraction");
    let raw_handles = backend.add_inputs(1);
    assert!(matches!(
        graph.build_all(&mut backend, &raw_handles),
        Err(FlowError::BackendError(_))
    ));
}

#[test]
fn flow_without_inputs_fails_fast() {
    let mut graph = FlowGraph::new();
    graph.add_raw_input(DimVector::new(4, 4, 1, 1));
    graph
        .add_flow(Flow::new_with("orphan", vec![], vec![Layers::relu()]))
        .unwrap();

    let mut backend = RecordingBackend::new();
    let raw_handles = backend.add_inputs(1);
    assert!(matches!(
        graph.build_all(&mut backend, &raw_handles),
        Err(FlowError::NoInputs(label)) if label == "orphan"
    ));
    assert_eq!(backend.len(), 1);
}

#[test]
fn parallel_inference_matches_sequential() {
    let mut sequential = diamond();
    let mut parallel = diamond();
    parallel
        .set_config(GraphConfig {
            parallel_inference: true,
            worker_threads: 2,
            ..GraphConfig::default()
        })
        .unwrap();

    assert_eq!(sequential.infer_all().unwrap(), parallel.infer_all().unwrap());
    assert_eq!(sequential.infer_all().unwrap(), parallel.infer_all().unwrap());

    for (a, b) in sequential.flows().iter().zip(parallel.flows()) {
        assert_eq!(a.current_input_size(), b.current_input_size());
        assert_eq!(a.current_output_size(), b.current_output_size());
    }
}

#[test]
fn parallel_inference_reports_the_same_error() {
    let failing = || {
        let mut graph = FlowGraph::new();
        graph.add_raw_input(DimVector::new(4, 4, 1, 1));
        graph
            .add_flow(Flow::new_with("a", vec![InputSource::RawInput(0)], vec![Layers::max_pool(8)]))
            .unwrap();
        graph
            .add_flow(Flow::new_with(
                "b",
                vec![InputSource::RawInput(0)],
                vec![Layers::conv2d_with(2, 6, 6, 1, 1, true, PaddingPolicy::valid_only())],
            ))
            .unwrap();
        graph
    };

    let mut sequential = failing();
    let mut parallel = failing();
    parallel
        .set_config(GraphConfig {
            parallel_inference: true,
            worker_threads: 2,
            ..GraphConfig::default()
        })
        .unwrap();

    // Both flows fail in the same level; the lower id wins either way
    let a = sequential.infer_all().unwrap_err().to_string();
    let b = parallel.infer_all().unwrap_err().to_string();
    assert!(a.contains("a/MaxPool"), "{}", a);
    assert_eq!(a, b);
}

#[test]
fn normalization_parameters_track_channel_count() {
    let mut graph = FlowGraph::new();
    graph.add_raw_input(DimVector::new(4, 4, 3, 1));
    graph
        .add_flow(Flow::new_with(
            "norm",
            vec![InputSource::RawInput(0)],
            vec![Layers::batch_norm()],
        ))
        .unwrap();

    let mut backend = RecordingBackend::new();
    let raw_handles = backend.add_inputs(1);
    graph.build_all(&mut backend, &raw_handles).unwrap();

    let gamma_len = |graph: &FlowGraph| match &graph.flow(0).unwrap().layers()[0] {
        Layer::Normalization(norm) => norm.data_source.buffer("gamma").map(|b| b.len()),
        other => panic!("unexpected layer {:?}", other),
    };
    assert_eq!(gamma_len(&graph), Some(3));

    graph.set_raw_input(0, DimVector::new(4, 4, 7, 1)).unwrap();
    graph.build_all(&mut backend, &raw_handles).unwrap();
    assert_eq!(gamma_len(&graph), Some(7));

    // Shrinking the input never shrinks the buffers
    graph.set_raw_input(0, DimVector::new(4, 4, 2, 1)).unwrap();
    graph.build_all(&mut backend, &raw_handles).unwrap();
    assert_eq!(gamma_len(&graph), Some(7));
}
