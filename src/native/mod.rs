//! Native inference module contract.
//!
//! Defines the [`NativeModule`] trait that compiled inference modules
//! implement, and [`ModelLink`], the read-only view of sequence length,
//! model shape and the sorted probability buffer that samplers consume.

pub mod reference;

pub use reference::ReferenceModel;

use crate::error::VizError;
use crate::model::ModelShape;
use crate::tensor::{Tensor, TensorKind};

/// A native inference module that owns the model's tensor buffers.
///
/// All buffers belong to the module. Callers only borrow them, and every
/// borrow ends before the next [`NativeModule::run_model`] call, which is free
/// to reallocate.
pub trait NativeModule: Send {
    fn shape(&self) -> &ModelShape;

    /// Look up a tensor by kind.
    fn tensor(&self, kind: TensorKind) -> Option<&Tensor>;

    /// Mutable lookup; used to write the input sequence.
    fn tensor_mut(&mut self, kind: TensorKind) -> Option<&mut Tensor>;

    /// Run one full forward pass over the first `input_len` positions.
    ///
    /// Synchronous: returns once every output tensor and the sorted
    /// probability buffer are up to date.
    fn run_model(&mut self) -> Result<(), VizError>;

    /// Current sequence length.
    fn input_len(&self) -> usize;

    /// Set the sequence length used by the next forward pass.
    fn set_input_len(&mut self, len: usize) -> Result<(), VizError>;

    /// Position-major, pair-minor buffer of `(token id, probability)` entries
    /// sorted by descending probability, `[T, vocab, 2]`.
    fn sorted_buf(&self) -> &[f32];
}

/// Borrowed view of the model state a sampler needs.
#[derive(Debug, Clone, Copy)]
pub struct ModelLink<'a> {
    pub shape: &'a ModelShape,
    pub input_len: usize,
    pub sorted_buf: &'a [f32],
    /// Input tensor contents (f32 token ids). Empty when not exposed.
    pub input_tokens: &'a [f32],
}

impl<'a> ModelLink<'a> {
    pub fn new(shape: &'a ModelShape, input_len: usize, sorted_buf: &'a [f32]) -> Self {
        Self {
            shape,
            input_len,
            sorted_buf,
            input_tokens: &[],
        }
    }

    pub fn with_input_tokens(mut self, input_tokens: &'a [f32]) -> Self {
        self.input_tokens = input_tokens;
        self
    }

    pub fn from_module(module: &'a dyn NativeModule) -> Self {
        let input = module
            .tensor(TensorKind::InputTokens)
            .map(Tensor::as_f32)
            .unwrap_or(&[]);
        Self::new(module.shape(), module.input_len(), module.sorted_buf()).with_input_tokens(input)
    }

    /// Token ids of the current sequence (the first `input_len` entries of the
    /// input tensor). Entries that are not valid ids are skipped.
    pub fn context_tokens(&self) -> impl Iterator<Item = u32> + 'a {
        let tokens: &'a [f32] = self.input_tokens;
        let len = self.input_len.min(tokens.len());
        tokens[..len]
            .iter()
            .filter(|t| t.is_finite() && **t >= 0.0)
            .map(|&t| t as u32)
    }

    /// The `(id, prob)` entries for `pos`, or `None` when the buffer is too
    /// short to hold them.
    pub fn position_entries(&self, pos: usize) -> Option<&'a [f32]> {
        let stride = self.shape.sorted_stride();
        if stride == 0 {
            return None;
        }
        let start = pos.checked_mul(stride)?;
        let end = start.checked_add(stride)?;
        self.sorted_buf.get(start..end)
    }

    /// Entries for the last valid input position (`input_len - 1`).
    pub fn last_position_entries(&self) -> Option<&'a [f32]> {
        let pos = self.input_len.checked_sub(1)?;
        self.position_entries(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(vocab_size: usize) -> ModelShape {
        ModelShape {
            n_layer: 1,
            n_head: 1,
            n_embd: 4,
            vocab_size,
            block_size: 4,
        }
    }

    #[test]
    fn test_position_entries_stride() {
        let s = shape(2);
        let buf = [1.0, 0.6, 0.0, 0.4, 0.0, 0.7, 1.0, 0.3];
        let link = ModelLink::new(&s, 2, &buf);
        assert_eq!(link.position_entries(0), Some(&buf[0..4]));
        assert_eq!(link.position_entries(1), Some(&buf[4..8]));
        assert_eq!(link.last_position_entries(), Some(&buf[4..8]));
        assert_eq!(link.position_entries(2), None);
    }

    #[test]
    fn test_context_tokens_bounded_by_input_len() {
        let s = shape(4);
        let input = [3.0, 1.0, -1.0, 2.0, 0.0];
        let link = ModelLink::new(&s, 4, &[]).with_input_tokens(&input);
        assert_eq!(link.context_tokens().collect::<Vec<_>>(), vec![3, 1, 2]);

        let link = ModelLink::new(&s, 9, &[]).with_input_tokens(&input[..2]);
        assert_eq!(link.context_tokens().collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(ModelLink::new(&s, 2, &[]).context_tokens().count(), 0);
    }

    #[test]
    fn test_last_position_entries_empty_sequence() {
        let s = shape(2);
        let buf = [0.0; 8];
        let link = ModelLink::new(&s, 0, &buf);
        assert!(link.last_position_entries().is_none());
    }

    #[test]
    fn test_position_entries_undersized_buffer() {
        let s = shape(3);
        let buf = [2.0, 0.5, 1.0];
        let link = ModelLink::new(&s, 1, &buf);
        assert!(link.last_position_entries().is_none());
    }
}
