use flowgraph::{
    backend::recording::RecordingBackend, layer::padding::PaddingPolicy,
    model::print_graph_stats::print_graph_stats, DimVector, Flow, FlowError, FlowGraph,
    InputSource, Layers,
};
use log::info;

// Two branches over one image, fused back together before a classifier head
fn build_demo_graph() -> Result<FlowGraph, FlowError> {
    let mut graph = FlowGraph::new();
    let image = graph.add_raw_input(DimVector::new(28, 28, 1, 1));

    let stem = graph.add_flow(Flow::new_with(
        "stem",
        vec![InputSource::RawInput(image)],
        vec![Layers::conv2d(8), Layers::batch_norm(), Layers::relu()],
    ))?;

    let wide = graph.add_flow(Flow::new_with(
        "wide",
        vec![InputSource::FlowOutput(stem)],
        vec![Layers::depthwise_conv2d(2, 3), Layers::relu()],
    ))?;

    let narrow = graph.add_flow(Flow::new_with(
        "narrow",
        vec![InputSource::FlowOutput(stem)],
        vec![
            Layers::conv2d_with(3, 1, 1, 1, 1, true, PaddingPolicy::valid_only()),
            Layers::sigmoid(),
        ],
    ))?;

    graph.add_flow(Flow::new_with(
        "head",
        vec![InputSource::FlowOutput(wide), InputSource::FlowOutput(narrow)],
        vec![
            Layers::max_pool(2),
            Layers::fully_connected(10),
            Layers::softmax(),
        ],
    ))?;

    Ok(graph)
}

fn main() -> Result<(), FlowError> {
    env_logger::init();

    let mut graph = build_demo_graph()?;
    let mut backend = RecordingBackend::new();
    let raw_handles = backend.add_inputs(graph.raw_inputs().len());

    let build = graph.build_all(&mut backend, &raw_handles)?;
    info!(
        "Recorded {} nodes, {} of them gradients",
        backend.len(),
        backend.gradient_count()
    );

    print_graph_stats(&graph);
    println!("\nFlow outputs: {:?}", build.outputs);
    println!("Raw input gradients: {:?}", build.raw_input_gradients);

    println!("\n{}", graph.export_json()?);
    Ok(())
}
