use serde::{Deserialize, Serialize};

pub type FlowId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputSource {
    RawInput(usize),
    FlowOutput(FlowId),
}

impl InputSource {
    pub fn get_flowid(&self) -> Option<FlowId> {
        match self {
            InputSource::RawInput(_) => None,
            InputSource::FlowOutput(id) => Some(*id),
        }
    }

    pub fn get_raw_slot(&self) -> Option<usize> {
        match self {
            InputSource::RawInput(slot) => Some(*slot),
            InputSource::FlowOutput(_) => None,
        }
    }

    // Apply a flow renumbering; raw inputs are never renumbered
    pub fn renumbered(&self, map: impl Fn(FlowId) -> FlowId) -> Self {
        match self {
            InputSource::RawInput(slot) => InputSource::RawInput(*slot),
            InputSource::FlowOutput(id) => InputSource::FlowOutput(map(*id)),
        }
    }
}
