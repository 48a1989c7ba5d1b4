//! Scene layout: named block descriptors for one model.
//!
//! The playback engine reads block positions and sizes and writes the
//! per-block `highlight` value. [`Layout::from_shape`] builds a simple column
//! layout so the engine can run without an external layout generator.

use serde::Serialize;

use crate::model::ModelShape;

/// Three-component vector used for positions, sizes and camera angles.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn scale(self, s: f32) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }
}

/// One renderable block: position of its minimum corner, extent, and
/// emphasis in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LayoutBlock {
    pub pos: Vec3,
    pub size: Vec3,
    pub highlight: f32,
}

impl LayoutBlock {
    pub fn new(pos: Vec3, size: Vec3) -> Self {
        Self {
            pos,
            size,
            highlight: 0.0,
        }
    }

    pub fn center(&self) -> Vec3 {
        self.pos.add(self.size.scale(0.5))
    }
}

/// Blocks of one transformer layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformerBlockLayout {
    /// `ln1.lnResid`
    pub ln1_resid: LayoutBlock,
    pub attn_out: LayoutBlock,
    pub attn_residual: LayoutBlock,
    /// `ln2.lnResid`
    pub ln2_resid: LayoutBlock,
    pub mlp_result: LayoutBlock,
    pub mlp_residual: LayoutBlock,
}

impl TransformerBlockLayout {
    fn blocks(&self) -> [&LayoutBlock; 6] {
        [
            &self.ln1_resid,
            &self.attn_out,
            &self.attn_residual,
            &self.ln2_resid,
            &self.mlp_result,
            &self.mlp_residual,
        ]
    }

    fn blocks_mut(&mut self) -> [&mut LayoutBlock; 6] {
        [
            &mut self.ln1_resid,
            &mut self.attn_out,
            &mut self.attn_residual,
            &mut self.ln2_resid,
            &mut self.mlp_result,
            &mut self.mlp_residual,
        ]
    }
}

/// Name of a block in the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockRef {
    /// `idxObj`: input token indices.
    Idx,
    /// `tokEmbedObj`
    TokEmbed,
    /// `posEmbedObj`
    PosEmbed,
    /// `residual0`: first residual stream.
    Residual0,
    Ln1Resid(usize),
    AttnOut(usize),
    AttnResidual(usize),
    Ln2Resid(usize),
    MlpResult(usize),
    MlpResidual(usize),
    /// `ln_f.lnResid`
    LnFResid,
    Logits,
    LogitsSoftmax,
}

/// Every block the playback engine addresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub idx_obj: LayoutBlock,
    pub tok_embed_obj: LayoutBlock,
    pub pos_embed_obj: LayoutBlock,
    pub residual0: LayoutBlock,
    pub blocks: Vec<TransformerBlockLayout>,
    pub ln_f_resid: LayoutBlock,
    pub logits: LayoutBlock,
    pub logits_softmax: LayoutBlock,
}

/// World units per tensor cell in the column layout.
const CELL: f32 = 1.5;
/// Vertical gap between consecutive blocks.
const GAP: f32 = 4.0 * CELL;

/// Stacks blocks top to bottom along +y.
struct ColumnCursor {
    y: f32,
}

impl ColumnCursor {
    fn place(&mut self, x: f32, width: f32, height: f32, depth: f32) -> LayoutBlock {
        let block = LayoutBlock::new(
            Vec3::new(x - width * 0.5, self.y, -depth * 0.5),
            Vec3::new(width, height, depth),
        );
        self.y += height + GAP;
        block
    }
}

impl Layout {
    /// Build a column layout for `shape`: embeddings on top, one group per
    /// transformer block, output blocks at the bottom.
    pub fn from_shape(shape: &ModelShape) -> Self {
        let t = shape.block_size as f32 * CELL;
        let c = shape.n_embd as f32 * CELL;
        let vocab = shape.vocab_size as f32 * CELL;
        let depth = CELL;
        let mut cur = ColumnCursor { y: 0.0 };

        let idx_obj = cur.place(0.0, t, CELL, depth);
        let tok_embed_obj = LayoutBlock::new(
            Vec3::new(-t * 0.5 - GAP - vocab, cur.y, -depth * 0.5),
            Vec3::new(vocab, c, depth),
        );
        let pos_embed_obj = LayoutBlock::new(
            Vec3::new(t * 0.5 + GAP, cur.y, -depth * 0.5),
            Vec3::new(t, c, depth),
        );
        let residual0 = cur.place(0.0, t, c, depth);

        let blocks = (0..shape.n_layer)
            .map(|_| TransformerBlockLayout {
                ln1_resid: cur.place(0.0, t, c, depth),
                attn_out: cur.place(0.0, t, c, depth),
                attn_residual: cur.place(0.0, t, c, depth),
                ln2_resid: cur.place(0.0, t, c, depth),
                mlp_result: cur.place(0.0, t, c, depth),
                mlp_residual: cur.place(0.0, t, c, depth),
            })
            .collect();

        let ln_f_resid = cur.place(0.0, t, c, depth);
        let logits = cur.place(0.0, t, vocab, depth);
        let logits_softmax = cur.place(0.0, t, vocab, depth);

        Self {
            idx_obj,
            tok_embed_obj,
            pos_embed_obj,
            residual0,
            blocks,
            ln_f_resid,
            logits,
            logits_softmax,
        }
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Resolve a block name. Returns `None` for a layer index past the end.
    pub fn block(&self, r: BlockRef) -> Option<&LayoutBlock> {
        Some(match r {
            BlockRef::Idx => &self.idx_obj,
            BlockRef::TokEmbed => &self.tok_embed_obj,
            BlockRef::PosEmbed => &self.pos_embed_obj,
            BlockRef::Residual0 => &self.residual0,
            BlockRef::Ln1Resid(k) => &self.blocks.get(k)?.ln1_resid,
            BlockRef::AttnOut(k) => &self.blocks.get(k)?.attn_out,
            BlockRef::AttnResidual(k) => &self.blocks.get(k)?.attn_residual,
            BlockRef::Ln2Resid(k) => &self.blocks.get(k)?.ln2_resid,
            BlockRef::MlpResult(k) => &self.blocks.get(k)?.mlp_result,
            BlockRef::MlpResidual(k) => &self.blocks.get(k)?.mlp_residual,
            BlockRef::LnFResid => &self.ln_f_resid,
            BlockRef::Logits => &self.logits,
            BlockRef::LogitsSoftmax => &self.logits_softmax,
        })
    }

    pub fn block_mut(&mut self, r: BlockRef) -> Option<&mut LayoutBlock> {
        Some(match r {
            BlockRef::Idx => &mut self.idx_obj,
            BlockRef::TokEmbed => &mut self.tok_embed_obj,
            BlockRef::PosEmbed => &mut self.pos_embed_obj,
            BlockRef::Residual0 => &mut self.residual0,
            BlockRef::Ln1Resid(k) => &mut self.blocks.get_mut(k)?.ln1_resid,
            BlockRef::AttnOut(k) => &mut self.blocks.get_mut(k)?.attn_out,
            BlockRef::AttnResidual(k) => &mut self.blocks.get_mut(k)?.attn_residual,
            BlockRef::Ln2Resid(k) => &mut self.blocks.get_mut(k)?.ln2_resid,
            BlockRef::MlpResult(k) => &mut self.blocks.get_mut(k)?.mlp_result,
            BlockRef::MlpResidual(k) => &mut self.blocks.get_mut(k)?.mlp_residual,
            BlockRef::LnFResid => &mut self.ln_f_resid,
            BlockRef::Logits => &mut self.logits,
            BlockRef::LogitsSoftmax => &mut self.logits_softmax,
        })
    }

    /// Every block in the scene.
    pub fn iter_blocks(&self) -> impl Iterator<Item = &LayoutBlock> {
        [
            &self.idx_obj,
            &self.tok_embed_obj,
            &self.pos_embed_obj,
            &self.residual0,
        ]
        .into_iter()
        .chain(self.blocks.iter().flat_map(|b| b.blocks()))
        .chain([&self.ln_f_resid, &self.logits, &self.logits_softmax])
    }

    /// Every block in the scene, mutably.
    pub fn iter_blocks_mut(&mut self) -> impl Iterator<Item = &mut LayoutBlock> {
        [
            &mut self.idx_obj,
            &mut self.tok_embed_obj,
            &mut self.pos_embed_obj,
            &mut self.residual0,
        ]
        .into_iter()
        .chain(self.blocks.iter_mut().flat_map(|b| b.blocks_mut()))
        .chain([
            &mut self.ln_f_resid,
            &mut self.logits,
            &mut self.logits_softmax,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_count() {
        let layout = Layout::from_shape(&ModelShape::nano());
        assert_eq!(layout.n_blocks(), 3);
        // 4 embedding blocks + 6 per layer + 3 output blocks.
        assert_eq!(layout.iter_blocks().count(), 4 + 3 * 6 + 3);
    }

    #[test]
    fn test_blocks_start_unhighlighted() {
        let layout = Layout::from_shape(&ModelShape::nano());
        assert!(layout.iter_blocks().all(|b| b.highlight == 0.0));
    }

    #[test]
    fn test_column_is_ordered_top_to_bottom() {
        let layout = Layout::from_shape(&ModelShape::nano());
        let residual0 = layout.block(BlockRef::Residual0).unwrap().pos.y;
        let first = layout.block(BlockRef::Ln1Resid(0)).unwrap().pos.y;
        let last = layout.block(BlockRef::MlpResidual(2)).unwrap().pos.y;
        let softmax = layout.block(BlockRef::LogitsSoftmax).unwrap().pos.y;
        assert!(residual0 < first && first < last && last < softmax);
    }

    #[test]
    fn test_block_lookup_out_of_range() {
        let mut layout = Layout::from_shape(&ModelShape::nano());
        assert!(layout.block(BlockRef::AttnOut(3)).is_none());
        assert!(layout.block_mut(BlockRef::MlpResidual(7)).is_none());
        assert!(layout.block(BlockRef::AttnOut(2)).is_some());
    }

    #[test]
    fn test_block_mut_writes_through() {
        let mut layout = Layout::from_shape(&ModelShape::nano());
        layout.block_mut(BlockRef::Logits).unwrap().highlight = 0.6;
        assert_eq!(layout.logits.highlight, 0.6);
        assert_eq!(
            layout.iter_blocks().filter(|b| b.highlight > 0.0).count(),
            1
        );
    }

    #[test]
    fn test_center() {
        let block = LayoutBlock::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(2.0, 4.0, 6.0));
        assert_eq!(block.center(), Vec3::new(2.0, 4.0, 6.0));
    }

    #[test]
    fn test_default_vec3_is_origin() {
        assert_eq!(Vec3::default(), Vec3::new(0.0, 0.0, 0.0));
        let block = LayoutBlock::new(Vec3::default(), Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(block.center(), Vec3::new(1.0, 1.0, 1.0));
    }
}
