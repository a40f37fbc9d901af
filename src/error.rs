use thiserror::Error;

/// Errors surfaced by the layer norm kernels and their wrappers.
#[derive(Debug, Error)]
pub enum LayerNormError {
    #[error("shape mismatch for {tensor}: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        tensor: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("shape ({batch}, {seq_len}, {channels}) overflows usize")]
    ShapeOverflow {
        batch: usize,
        seq_len: usize,
        channels: usize,
    },

    #[error("feature axis must have at least one channel")]
    EmptyFeatureAxis,

    #[error("non-finite value in {stage} at index {index}")]
    NumericOverflow { stage: &'static str, index: usize },

    #[error("backward called without a forward cache")]
    MissingCache,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LayerNormError>;

pub(crate) fn check_len(tensor: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(LayerNormError::ShapeMismatch { tensor, expected, actual });
    }
    Ok(())
}
