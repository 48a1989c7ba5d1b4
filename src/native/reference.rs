//! Deterministic CPU reference module.
//!
//! [`ReferenceModel`] stands in for a compiled inference module. It scores the
//! next token from seeded token-transition weights plus a small position bias,
//! which is enough to exercise every part of the tensor-exchange contract.
//! Seeded weights are hashed from `(seed, token, next token)` on demand, so
//! memory grows with `block_size * vocab_size`, never `vocab_size^2`.

use tracing::debug;

use crate::error::VizError;
use crate::model::ModelShape;
use crate::tensor::{Tensor, TensorKind};

use super::NativeModule;

/// Weight applied to the position bias term.
const POSITION_BIAS: f32 = 0.05;

/// Upper bound on `block_size * vocab_size` accepted by [`ReferenceModel::try_new`].
/// The logits, probability and sorted buffers together hold four f32 per entry.
pub const MAX_BUFFER_ENTRIES: usize = 1 << 26;

/// Token-transition weights, row = current token, column = next token.
enum Transitions {
    Seeded(u64),
    Table(Vec<f32>),
}

impl Transitions {
    fn weight(&self, tok: usize, next: usize, vocab: usize) -> f32 {
        match self {
            Transitions::Seeded(seed) => seeded_weight(*seed, tok, next),
            Transitions::Table(table) => table[tok * vocab + next],
        }
    }
}

/// Uniform weight in [-2, 2) from a SplitMix64 finalizer over the indices.
fn seeded_weight(seed: u64, tok: usize, next: usize) -> f32 {
    let mut x = seed
        ^ (tok as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (next as u64).wrapping_add(1).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^= x >> 31;
    (x >> 40) as f32 / (1u64 << 24) as f32 * 4.0 - 2.0
}

/// A CPU-only native module with seeded transition weights.
pub struct ReferenceModel {
    shape: ModelShape,
    transitions: Transitions,
    input: Tensor,
    logits: Tensor,
    probs: Tensor,
    sorted_buf: Vec<f32>,
    input_len: usize,
    forward_passes: u64,
}

impl ReferenceModel {
    /// Build a model for `shape` with transition weights drawn from `seed`.
    ///
    /// Allocates `block_size * vocab_size` entries per output buffer. Use
    /// [`ReferenceModel::try_new`] for shapes read from untrusted configs.
    pub fn new(shape: ModelShape, seed: u64) -> Self {
        let vocab = shape.vocab_size;
        let t = shape.block_size;

        debug!(vocab, block_size = t, seed, "Created reference model");

        Self {
            shape,
            transitions: Transitions::Seeded(seed),
            input: Tensor::zeros(&[t]),
            logits: Tensor::zeros(&[t, vocab]),
            probs: Tensor::zeros(&[t, vocab]),
            sorted_buf: vec![0.0; t * vocab * 2],
            input_len: 0,
            forward_passes: 0,
        }
    }

    /// Like [`ReferenceModel::new`], but refuses shapes whose buffers would
    /// exceed [`MAX_BUFFER_ENTRIES`].
    pub fn try_new(shape: ModelShape, seed: u64) -> Result<Self, VizError> {
        let entries = shape.block_size.checked_mul(shape.vocab_size);
        match entries {
            Some(n) if n <= MAX_BUFFER_ENTRIES => Ok(Self::new(shape, seed)),
            _ => Err(VizError::Config(format!(
                "block_size {} x vocab_size {} exceeds the reference model limit of {} entries",
                shape.block_size, shape.vocab_size, MAX_BUFFER_ENTRIES
            ))),
        }
    }

    /// Build a model with explicit transition weights, `[vocab, vocab]`
    /// row-major (row = current token, column = next token).
    pub fn with_transitions(shape: ModelShape, transitions: Vec<f32>) -> Result<Self, VizError> {
        let expected = shape.vocab_size.checked_mul(shape.vocab_size);
        if expected != Some(transitions.len()) {
            return Err(VizError::Model(format!(
                "transition table has {} entries, expected {} x {}",
                transitions.len(),
                shape.vocab_size,
                shape.vocab_size
            )));
        }
        let mut model = Self::new(shape, 1);
        model.transitions = Transitions::Table(transitions);
        Ok(model)
    }

    /// Number of forward passes run so far.
    pub fn forward_passes(&self) -> u64 {
        self.forward_passes
    }

    fn token_at(&self, pos: usize) -> Result<usize, VizError> {
        let raw = self.input.as_f32()[pos];
        let vocab = self.shape.vocab_size;
        if !raw.is_finite() || raw < 0.0 || raw as usize >= vocab {
            return Err(VizError::Model(format!(
                "token id {} at position {} is outside vocabulary of {}",
                raw, pos, vocab
            )));
        }
        Ok(raw as usize)
    }
}

fn softmax_into(logits: &[f32], out: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for (o, &l) in out.iter_mut().zip(logits) {
        *o = (l - max).exp();
        sum += *o;
    }
    if sum > 0.0 {
        for o in out.iter_mut() {
            *o /= sum;
        }
    }
}

impl NativeModule for ReferenceModel {
    fn shape(&self) -> &ModelShape {
        &self.shape
    }

    fn tensor(&self, kind: TensorKind) -> Option<&Tensor> {
        match kind {
            TensorKind::InputTokens => Some(&self.input),
            TensorKind::Logits => Some(&self.logits),
            TensorKind::Probs => Some(&self.probs),
        }
    }

    fn tensor_mut(&mut self, kind: TensorKind) -> Option<&mut Tensor> {
        match kind {
            TensorKind::InputTokens => Some(&mut self.input),
            TensorKind::Logits => Some(&mut self.logits),
            TensorKind::Probs => Some(&mut self.probs),
        }
    }

    fn run_model(&mut self) -> Result<(), VizError> {
        let vocab = self.shape.vocab_size;
        let t = self.shape.block_size;
        if self.input_len > t {
            return Err(VizError::ContextOverflow {
                len: self.input_len,
                max: t,
            });
        }

        let tokens = (0..self.input_len)
            .map(|pos| self.token_at(pos))
            .collect::<Result<Vec<_>, _>>()?;

        self.logits.as_f32_mut().fill(0.0);
        self.probs.as_f32_mut().fill(0.0);
        self.sorted_buf.fill(0.0);

        let mut order: Vec<usize> = Vec::with_capacity(vocab);
        for (pos, &tok) in tokens.iter().enumerate() {
            if let Some(row) = self.logits.row_mut(pos) {
                for (v, l) in row.iter_mut().enumerate() {
                    let bias = POSITION_BIAS * ((pos + v) % vocab) as f32;
                    *l = self.transitions.weight(tok, v, vocab) + bias;
                }
            }

            let (logits, probs) = (&self.logits, &mut self.probs);
            if let (Some(l), Some(p)) = (logits.row(pos), probs.row_mut(pos)) {
                softmax_into(l, p);
            }

            let Some(p) = self.probs.row(pos) else {
                continue;
            };
            order.clear();
            order.extend(0..vocab);
            // Stable sort keeps the lower token id first on ties.
            order.sort_by(|&a, &b| {
                p[b].partial_cmp(&p[a]).unwrap_or(std::cmp::Ordering::Equal)
            });

            let base = pos * vocab * 2;
            for (i, &v) in order.iter().enumerate() {
                self.sorted_buf[base + i * 2] = v as f32;
                self.sorted_buf[base + i * 2 + 1] = p[v];
            }
        }

        self.forward_passes += 1;
        debug!(
            input_len = self.input_len,
            forward_passes = self.forward_passes,
            "Reference forward pass complete"
        );
        Ok(())
    }

    fn input_len(&self) -> usize {
        self.input_len
    }

    fn set_input_len(&mut self, len: usize) -> Result<(), VizError> {
        if len > self.shape.block_size {
            return Err(VizError::ContextOverflow {
                len,
                max: self.shape.block_size,
            });
        }
        self.input_len = len;
        Ok(())
    }

    fn sorted_buf(&self) -> &[f32] {
        &self.sorted_buf
    }
}
