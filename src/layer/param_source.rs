use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-channel parameter buffers owned by a normalization layer.
///
/// Buffers are created zero-filled on first access. When the channel count
/// grows past a buffer's length the buffer is re-allocated zero-filled; prior
/// values are dropped, not copied. The channel count never shrinks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamDataSource {
    owner: String,
    channel_count: usize,
    buffers: BTreeMap<String, Vec<f32>>,
}

impl ParamDataSource {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            channel_count: 0,
            buffers: BTreeMap::new(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn grow_to(&mut self, channel_count: usize) {
        self.channel_count = self.channel_count.max(channel_count);
    }

    pub fn get(&mut self, name: &str) -> &mut Vec<f32> {
        let needed = self.channel_count;
        let buffer = self.buffers.entry(name.to_string()).or_default();
        if buffer.len() < needed {
            *buffer = vec![0.0; needed];
        }
        buffer
    }

    pub fn buffer(&self, name: &str) -> Option<&[f32]> {
        self.buffers.get(name).map(|b| b.as_slice())
    }

    pub fn label(&self) -> String {
        format!("{} parameters", self.owner)
    }
}
