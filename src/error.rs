use thiserror::Error;

use crate::tensor::TensorKind;

#[derive(Error, Debug)]
pub enum VizError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Native model bridge is not attached")]
    BridgeUnavailable,

    #[error("Tensor not found: {0}")]
    TensorNotFound(TensorKind),

    #[error("Index {index} out of bounds for {kind} tensor of length {len}")]
    OutOfBounds {
        kind: TensorKind,
        index: usize,
        len: usize,
    },

    #[error("Sequence length {len} exceeds context length {max}")]
    ContextOverflow { len: usize, max: usize },

    #[error("Sequence length {len} would reach context length {max}")]
    ContextFull { len: usize, max: usize },

    #[error("Model error: {0}")]
    Model(String),
}
