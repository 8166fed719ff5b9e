use super::{flow::Flow, flow_graph::FlowGraph, input_source::InputSource};

pub fn print_graph_stats(graph: &FlowGraph) {
    println!("\nFlow Graph Statistics");
    println!("=====================");
    println!("\nRaw Inputs: {}", graph.raw_inputs().len());
    for (slot, shape) in graph.raw_inputs().iter().enumerate() {
        println!("  [{}] {}", slot, shape);
    }

    println!("\nFlow Details:");
    println!("{:-<110}", "");
    println!(
        "{:<4} {:<20} {:<20} {:<18} {:<18} {:<12} {:<12}",
        "ID", "Label", "Inputs", "Input Shape", "Output Shape", "Output (MB)", "State"
    );
    println!("{:-<110}", "");

    let execution_order = match graph.execution_order() {
        Some(order) => order,
        None => {
            println!("Warning: Graph not verified, execution order unknown");
            return;
        }
    };

    let mut total_layers = 0usize;
    let mut learned_layers = 0usize;
    let mut total_memory = 0u64;

    for &id in execution_order {
        if let Some(flow) = graph.flows().get(id) {
            let memory_bytes = output_bytes(flow);
            println!(
                "{:<4} {:<20} {:<20} {:<18} {:<18} {:<12} {:<12}",
                id,
                flow.label,
                format_sources(flow),
                flow.current_input_size().to_string(),
                flow.current_output_size().to_string(),
                format_memory_mb(memory_bytes),
                flow.state().name()
            );

            for (index, layer) in flow.layers().iter().enumerate() {
                println!("       {:>2}. {}", index, layer.label());
            }

            total_layers += flow.layers().len();
            total_memory += memory_bytes;
            learned_layers += flow.layers().iter().filter(|layer| layer.requires_parameters()).count();
        }
    }

    println!("{:-<110}", "");
    println!("\nGraph Structure:");
    println!("Entry points: {:?}", graph.verified().map_or(vec![], |v| v.entry_points.clone()));
    println!("Exit points: {:?}", graph.verified().map_or(vec![], |v| v.exit_points.clone()));

    println!("\nGraph Summary:");
    println!("Total Flows: {}", graph.len());
    println!("Total Layers: {}", total_layers);
    println!("Layers With Parameters: {}", learned_layers);
    println!("Total Output Memory: {}", format_memory_mb(total_memory));
}

// f32 elements of the flow's output, zero while unresolved
fn output_bytes(flow: &Flow) -> u64 {
    flow.current_output_size().num_elements().max(0) as u64 * std::mem::size_of::<f32>() as u64
}

fn format_memory_mb(bytes: u64) -> String {
    format!("{:.3}", bytes as f64 / (1024.0 * 1024.0))
}

fn format_sources(flow: &Flow) -> String {
    flow.inputs()
        .iter()
        .map(|source| match source {
            InputSource::RawInput(slot) => format!("raw{}", slot),
            InputSource::FlowOutput(id) => format!("flow{}", id),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
