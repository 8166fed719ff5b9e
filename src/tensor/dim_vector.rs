use std::fmt;

use serde::{Deserialize, Serialize};

/// Shape descriptor propagated through a flow: width, height, channels, time steps.
///
/// A slot holding `-1` is unresolved. Only `width` is consulted by
/// [`DimVector::is_resolved`], matching how inference marks a whole vector as
/// unresolved at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimVector {
    pub width: i64,
    pub height: i64,
    pub channels: i64,
    pub time_steps: i64,
}

impl DimVector {
    pub const UNRESOLVED: DimVector = DimVector {
        width: -1,
        height: -1,
        channels: -1,
        time_steps: -1,
    };

    pub fn new(width: i64, height: i64, channels: i64, time_steps: i64) -> Self {
        Self {
            width,
            height,
            channels,
            time_steps,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.width >= 0
    }

    // Stacks `channels * time_steps` more channels, ignoring spatial size
    pub fn with_channels_added(&self, channels: i64, time_steps: i64) -> Self {
        Self {
            channels: self.channels + channels * time_steps,
            ..*self
        }
    }

    pub fn changed_from(&self, previous: &DimVector) -> bool {
        self != previous
    }

    pub fn with_extent(&self, width: i64, height: i64) -> Self {
        Self {
            width,
            height,
            ..*self
        }
    }

    // Channels a backend sees once time steps are folded into the feature axis.
    // Must agree with with_channels_added, so T=0 contributes nothing.
    pub fn stacked_channels(&self) -> i64 {
        self.channels * self.time_steps
    }

    pub fn num_elements(&self) -> i64 {
        if !self.is_resolved() {
            return 0;
        }
        self.width * self.height * self.channels * self.time_steps.max(1)
    }

    pub fn to_dims(&self) -> [i64; 4] {
        [self.width, self.height, self.channels, self.time_steps]
    }
}

impl Default for DimVector {
    fn default() -> Self {
        Self::UNRESOLVED
    }
}

impl fmt::Display for DimVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_resolved() {
            return write!(f, "unresolved");
        }
        write!(
            f,
            "{}×{}×{}×{}",
            self.width, self.height, self.channels, self.time_steps
        )
    }
}
