// Model shape extracted from a model config JSON document.
//
// Config endpoints report dimensions under either GPT-style names
// (n_embd, n_head, n_layer, block_size) or LLaMA-style names (hidden_size,
// num_attention_heads, num_hidden_layers, max_position_embeddings), and
// frequently both at once. ModelShape normalizes them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::VizError;

/// Dimensions of a decoder-only transformer, as far as playback cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelShape {
    /// Number of transformer blocks (nBlocks).
    pub n_layer: usize,
    pub n_head: usize,
    /// Residual stream width (C).
    pub n_embd: usize,
    pub vocab_size: usize,
    /// Context length (T).
    pub block_size: usize,
}

/// Raw config document. Every field is optional; both naming families are
/// kept as separate fields because endpoints often emit them side by side.
#[derive(Debug, Default, Deserialize)]
struct RawModelConfig {
    n_embd: Option<usize>,
    hidden_size: Option<usize>,
    n_head: Option<usize>,
    num_attention_heads: Option<usize>,
    n_layer: Option<usize>,
    num_hidden_layers: Option<usize>,
    vocab_size: Option<usize>,
    block_size: Option<usize>,
    n_positions: Option<usize>,
    max_position_embeddings: Option<usize>,
}

fn require(value: Option<usize>, keys: &str) -> Result<usize, VizError> {
    match value {
        Some(0) => Err(VizError::Config(format!("{} must be positive", keys))),
        Some(v) => Ok(v),
        None => Err(VizError::Config(format!("missing model dimension: {}", keys))),
    }
}

impl ModelShape {
    /// The small three-layer model used when no config is supplied.
    pub fn nano() -> Self {
        Self {
            n_layer: 3,
            n_head: 3,
            n_embd: 48,
            vocab_size: 3,
            block_size: 11,
        }
    }

    /// Parse a config JSON document.
    ///
    /// GPT-style keys win when both families are present. Unknown keys are
    /// ignored.
    pub fn from_json(json: &str) -> Result<Self, VizError> {
        let raw: RawModelConfig = serde_json::from_str(json)
            .map_err(|e| VizError::Config(format!("invalid model config JSON: {}", e)))?;

        let shape = Self {
            n_embd: require(raw.n_embd.or(raw.hidden_size), "n_embd / hidden_size")?,
            n_head: require(
                raw.n_head.or(raw.num_attention_heads),
                "n_head / num_attention_heads",
            )?,
            n_layer: require(
                raw.n_layer.or(raw.num_hidden_layers),
                "n_layer / num_hidden_layers",
            )?,
            vocab_size: require(raw.vocab_size, "vocab_size")?,
            block_size: require(
                raw.block_size
                    .or(raw.n_positions)
                    .or(raw.max_position_embeddings),
                "block_size / n_positions / max_position_embeddings",
            )?,
        };

        info!(
            n_layer = shape.n_layer,
            n_head = shape.n_head,
            n_embd = shape.n_embd,
            vocab_size = shape.vocab_size,
            block_size = shape.block_size,
            "Model shape loaded"
        );
        Ok(shape)
    }

    /// Read and parse a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, VizError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Number of transformer blocks walked by the playback.
    pub fn n_blocks(&self) -> usize {
        self.n_layer
    }

    /// Context length.
    pub fn context_len(&self) -> usize {
        self.block_size
    }

    /// Entries per position in `sortedBuf`: one (token id, probability) pair
    /// per vocabulary entry.
    pub fn sorted_stride(&self) -> usize {
        self.vocab_size * 2
    }
}

impl Default for ModelShape {
    fn default() -> Self {
        Self::nano()
    }
}
