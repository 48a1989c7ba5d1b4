//! Highlight emphasis: phase → emphasized block set.

use tracing::warn;

use crate::layout::Layout;

use super::phase::{phase_targets, Phase};

/// Emphasis applied to the active phase's blocks.
pub const HIGHLIGHT_LEVEL: f32 = 0.6;

#[derive(Debug, Default, Clone, Copy)]
pub struct HighlightManager;

impl HighlightManager {
    pub fn new() -> Self {
        Self
    }

    /// Reset every block, then emphasize the blocks of `phase`. Returns the
    /// number of blocks emphasized.
    pub fn set(&self, phase: Phase, layout: &mut Layout) -> usize {
        self.clear(layout);
        let Some(targets) = phase_targets(phase) else {
            return 0;
        };
        let mut count = 0;
        for r in targets.highlight {
            match layout.block_mut(r) {
                Some(block) => {
                    block.highlight = HIGHLIGHT_LEVEL;
                    count += 1;
                }
                None => warn!(%phase, block = ?r, "Highlight block missing from layout"),
            }
        }
        count
    }

    pub fn clear(&self, layout: &mut Layout) {
        for block in layout.iter_blocks_mut() {
            block.highlight = 0.0;
        }
    }
}
