use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaddingMode {
    #[default]
    ValidOnly,
    SizeSame,
    SizeFull,
    Custom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Feature,
}

// What a layer tells the padding policy about the window it is sliding
#[derive(Clone, Copy, Debug)]
pub struct PaddingContext<'a> {
    pub layer: &'a str,
    pub axis: Axis,
    pub input: i64,
    pub kernel: i64,
    pub stride: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaddingPolicy {
    pub x: PaddingMode,
    pub y: PaddingMode,
    pub feature: PaddingMode,
}

impl PaddingPolicy {
    pub fn uniform(mode: PaddingMode) -> Self {
        Self {
            x: mode,
            y: mode,
            feature: mode,
        }
    }

    pub fn valid_only() -> Self {
        Self::uniform(PaddingMode::ValidOnly)
    }

    pub fn size_same() -> Self {
        Self::uniform(PaddingMode::SizeSame)
    }

    pub fn size_full() -> Self {
        Self::uniform(PaddingMode::SizeFull)
    }

    pub fn mode(&self, axis: Axis) -> PaddingMode {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Feature => self.feature,
        }
    }

    /// Output extent along `ctx.axis`, or `None` if the window does not fit.
    pub fn output_extent(&self, ctx: &PaddingContext) -> Option<i64> {
        if ctx.kernel <= 0 || ctx.stride <= 0 || ctx.input <= 0 {
            return None;
        }

        let suggested = match self.mode(ctx.axis) {
            PaddingMode::ValidOnly | PaddingMode::Custom => {
                if ctx.input < ctx.kernel {
                    return None;
                }
                (ctx.input - ctx.kernel) / ctx.stride + 1
            }
            PaddingMode::SizeSame => div_ceil(ctx.input, ctx.stride),
            PaddingMode::SizeFull => div_ceil(ctx.input + ctx.kernel - 1, ctx.stride),
        };

        let resolved = self.resolved_extent(suggested, ctx);
        (resolved > 0).then_some(resolved)
    }

    /// Hook applied on top of the suggested extent.
    ///
    /// Non-custom modes return `suggested` untouched. `Custom` is where
    /// layer-specific edge handling (e.g. pooling windows hanging off the
    /// border) plugs in; no layer overrides it yet, so it passes through too.
    pub fn resolved_extent(&self, suggested: i64, ctx: &PaddingContext) -> i64 {
        if self.mode(ctx.axis) == PaddingMode::Custom {
            debug!("{}: custom {:?} extent {}", ctx.layer, ctx.axis, suggested);
        }
        suggested
    }
}

fn div_ceil(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator - 1) / denominator
}
