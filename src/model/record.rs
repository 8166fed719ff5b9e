use log::info;
use serde::{Deserialize, Serialize};

use crate::{config::GraphConfig, error::FlowError, tensor::dim_vector::DimVector};

use super::{flow::Flow, flow_graph::FlowGraph};

pub const RECORD_VERSION: u32 = 1;

/// Persisted form of a [`FlowGraph`].
///
/// Only document fields are stored. Inferred shapes and build state are
/// recomputed after import; parameter buffers travel with their layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowGraphRecord {
    pub version: u32,
    pub raw_inputs: Vec<DimVector>,
    pub flows: Vec<Flow>,
}

impl FlowGraphRecord {
    pub fn from_graph(graph: &FlowGraph) -> Self {
        Self {
            version: RECORD_VERSION,
            raw_inputs: graph.raw_inputs().to_vec(),
            flows: graph.flows().to_vec(),
        }
    }

    pub fn into_graph(self, config: GraphConfig) -> Result<FlowGraph, FlowError> {
        if self.version != RECORD_VERSION {
            return Err(FlowError::UnsupportedVersion(self.version));
        }
        FlowGraph::from_parts(self.raw_inputs, self.flows, config)
    }
}

impl FlowGraph {
    pub fn export_json(&self) -> Result<String, FlowError> {
        let json = serde_json::to_string_pretty(&FlowGraphRecord::from_graph(self))?;
        info!("Exported {} flow(s)", self.len());
        Ok(json)
    }

    pub fn import_json(json: &str) -> Result<Self, FlowError> {
        Self::import_json_with(json, GraphConfig::default())
    }

    pub fn import_json_with(json: &str, config: GraphConfig) -> Result<Self, FlowError> {
        let record: FlowGraphRecord = serde_json::from_str(json)?;
        let graph = record.into_graph(config)?;
        info!("Imported {} flow(s)", graph.len());
        Ok(graph)
    }
}
