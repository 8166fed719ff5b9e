pub mod backend;
pub mod config;
pub mod error;
pub mod layer;
pub mod model;
pub mod tensor;

pub use backend::backend::{BackendError, GraphBackend, NodeHandle};
pub use config::GraphConfig;
pub use error::FlowError;
pub use layer::{factory::Layers, layer::Layer};
pub use model::{
    flow::{BuildState, Flow},
    flow_graph::{FlowGraph, GraphBuild},
    input_source::{FlowId, InputSource},
};
pub use tensor::dim_vector::DimVector;
