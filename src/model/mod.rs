pub mod flow;
pub mod flow_graph;
pub mod fusion;
pub mod input_source;
pub mod print_graph_stats;
pub mod record;
