//! Playback phases and the phase → block lookup shared by camera and
//! highlight.

use std::fmt;

use serde::Serialize;

use crate::layout::{BlockRef, Vec3};

/// Coarse step of the playback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,
    Embedding,
    Transformer,
    Output,
    Complete,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Idle => write!(f, "idle"),
            Step::Embedding => write!(f, "embedding"),
            Step::Transformer => write!(f, "transformer"),
            Step::Output => write!(f, "output"),
            Step::Complete => write!(f, "complete"),
        }
    }
}

/// Fully-qualified phase: the step plus, for `transformer`, the block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Embedding,
    Transformer(usize),
    Output,
    Complete,
}

impl Phase {
    pub fn step(&self) -> Step {
        match self {
            Phase::Idle => Step::Idle,
            Phase::Embedding => Step::Embedding,
            Phase::Transformer(_) => Step::Transformer,
            Phase::Output => Step::Output,
            Phase::Complete => Step::Complete,
        }
    }

    /// Block index within `transformer`; 0 for every other phase.
    pub fn camera_phase(&self) -> usize {
        match self {
            Phase::Transformer(k) => *k,
            _ => 0,
        }
    }

    /// Phase that follows this one when the current step finishes, for a
    /// model with `n_blocks` transformer blocks. `Output` is followed by
    /// `Embedding` when decoding continues; the controller decides between
    /// that and `Complete`.
    pub fn next(&self, n_blocks: usize) -> Phase {
        match *self {
            Phase::Idle => Phase::Embedding,
            Phase::Embedding if n_blocks == 0 => Phase::Output,
            Phase::Embedding => Phase::Transformer(0),
            Phase::Transformer(k) if k + 1 < n_blocks => Phase::Transformer(k + 1),
            Phase::Transformer(_) => Phase::Output,
            Phase::Output => Phase::Embedding,
            Phase::Complete => Phase::Complete,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Transformer(k) => write!(f, "transformer({})", k),
            other => write!(f, "{}", other.step()),
        }
    }
}

/// Viewing angle while the embedding blocks are presented
/// (azimuth degrees, elevation degrees, zoom).
pub const EMBEDDING_ANGLE: Vec3 = Vec3::new(290.0, 15.0, 2.5);
/// Viewing angle while a transformer block is presented.
pub const TRANSFORMER_ANGLE: Vec3 = Vec3::new(300.0, 10.0, 1.8);
/// Viewing angle while the output blocks are presented.
pub const OUTPUT_ANGLE: Vec3 = Vec3::new(315.0, 20.0, 2.2);

/// What a phase presents: the block the camera centres on, the camera
/// angle, and the blocks to emphasize.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTargets {
    pub focus: BlockRef,
    pub angle: Vec3,
    pub highlight: Vec<BlockRef>,
}

/// The single phase → presentation table. `Idle` and `Complete` present
/// nothing.
pub fn phase_targets(phase: Phase) -> Option<PhaseTargets> {
    match phase {
        Phase::Idle | Phase::Complete => None,
        Phase::Embedding => Some(PhaseTargets {
            focus: BlockRef::Residual0,
            angle: EMBEDDING_ANGLE,
            highlight: vec![
                BlockRef::Idx,
                BlockRef::TokEmbed,
                BlockRef::PosEmbed,
                BlockRef::Residual0,
            ],
        }),
        Phase::Transformer(k) => Some(PhaseTargets {
            focus: BlockRef::MlpResidual(k),
            angle: TRANSFORMER_ANGLE,
            highlight: vec![
                BlockRef::Ln1Resid(k),
                BlockRef::AttnOut(k),
                BlockRef::AttnResidual(k),
                BlockRef::Ln2Resid(k),
                BlockRef::MlpResult(k),
                BlockRef::MlpResidual(k),
            ],
        }),
        Phase::Output => Some(PhaseTargets {
            focus: BlockRef::LogitsSoftmax,
            angle: OUTPUT_ANGLE,
            highlight: vec![BlockRef::LnFResid, BlockRef::Logits, BlockRef::LogitsSoftmax],
        }),
    }
}
