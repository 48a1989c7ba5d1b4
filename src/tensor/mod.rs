//! Host tensors exchanged with the native inference module.
//!
//! Provides the F32 [`Tensor`] owned by native modules, the [`TensorKind`] tag
//! used to look tensors up, and [`TensorViewMut`], the borrowed window the
//! playback controller writes through.

use std::fmt;

use tracing::debug;

use crate::error::VizError;

/// Tensors a native module exposes to the playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorKind {
    /// Token ids of the current sequence, one f32 per position, `[T]`.
    InputTokens,
    /// Raw output logits, `[T, vocab]`.
    Logits,
    /// Softmax of the logits, `[T, vocab]`.
    Probs,
}

impl fmt::Display for TensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorKind::InputTokens => write!(f, "input_tokens"),
            TensorKind::Logits => write!(f, "logits"),
            TensorKind::Probs => write!(f, "probs"),
        }
    }
}

/// Row-major F32 tensor.
#[derive(Debug, Clone)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a zero-filled tensor.
    pub fn zeros(shape: &[usize]) -> Self {
        let n_elements: usize = shape.iter().product();
        debug!(?shape, "Allocated tensor");
        Self {
            shape: shape.to_vec(),
            data: vec![0.0f32; n_elements],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn as_f32(&self) -> &[f32] {
        &self.data
    }

    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Borrow row `i` of a 2D tensor, or `None` when out of range.
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        if self.shape.len() != 2 || i >= self.shape[0] {
            return None;
        }
        let cols = self.shape[1];
        Some(&self.data[i * cols..(i + 1) * cols])
    }

    /// Mutable counterpart of [`Tensor::row`].
    pub fn row_mut(&mut self, i: usize) -> Option<&mut [f32]> {
        if self.shape.len() != 2 || i >= self.shape[0] {
            return None;
        }
        let cols = self.shape[1];
        Some(&mut self.data[i * cols..(i + 1) * cols])
    }

    /// Tag this tensor with its kind and borrow it as a bounds-checked view.
    pub fn view_mut(&mut self, kind: TensorKind) -> TensorViewMut<'_> {
        TensorViewMut {
            kind,
            data: &mut self.data,
        }
    }
}

/// Borrowed, bounds-checked window into a native tensor.
///
/// The view borrows the bridge mutably, so it cannot outlive the call that
/// produced it nor survive a forward pass that may reallocate the buffer.
#[derive(Debug)]
pub struct TensorViewMut<'a> {
    kind: TensorKind,
    data: &'a mut [f32],
}

impl<'a> TensorViewMut<'a> {
    pub fn kind(&self) -> TensorKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write one entry, refusing indices past the end of the buffer.
    pub fn set(&mut self, index: usize, value: f32) -> Result<(), VizError> {
        let len = self.data.len();
        match self.data.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VizError::OutOfBounds {
                kind: self.kind,
                index,
                len,
            }),
        }
    }

    /// Copy `values` starting at `offset`. Nothing is written if the range
    /// does not fit.
    pub fn write_at(&mut self, offset: usize, values: &[f32]) -> Result<(), VizError> {
        let len = self.data.len();
        let end = match offset.checked_add(values.len()) {
            Some(end) if end <= len => end,
            _ => {
                return Err(VizError::OutOfBounds {
                    kind: self.kind,
                    index: offset.saturating_add(values.len()).saturating_sub(1),
                    len,
                })
            }
        };
        self.data[offset..end].copy_from_slice(values);
        Ok(())
    }
}
