//! Error types for tree construction and frame updates.

#[derive(Debug, thiserror::Error)]
pub enum FractalError {
    #[error("invalid depth {depth}: must be within 1..={max}")]
    InvalidDepth { depth: usize, max: usize },

    #[error("invalid {name} range: min {min} max {max}")]
    InvalidRange {
        name: &'static str,
        min: f32,
        max: f32,
    },

    #[error("invalid {name} probability: {value}")]
    InvalidProbability { name: &'static str, value: f32 },

    #[error("failed to allocate {len} entries for level {level}")]
    Allocation { level: usize, len: usize },

    #[error("level {level} out of range for tree of depth {depth}")]
    LevelOutOfRange { level: usize, depth: usize },

    #[error("level buffers disagree: {parents} parents, {parts} parts, {matrices} matrices")]
    LevelMismatch {
        parents: usize,
        parts: usize,
        matrices: usize,
    },

    #[error("{levels} part levels but {buffers} matrix levels")]
    DepthMismatch { levels: usize, buffers: usize },

    #[error("fractal tree is not built")]
    NotBuilt,
}

pub type Result<T> = std::result::Result<T, FractalError>;
