//! Presentation state handed to the renderer each frame.

use serde::Serialize;

use crate::layout::Layout;
use crate::model::ModelShape;

use super::camera::CameraTarget;

/// Which token buffer the renderer shows in the input-index block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", content = "tokens", rename_all = "snake_case")]
pub enum TokenDisplay {
    /// Prompt plus tokens generated so far, as f32 ids.
    Playback(Vec<f32>),
    /// No playback buffer; show the model's own input tensor.
    ModelInput,
}

impl TokenDisplay {
    pub fn tokens(&self) -> Option<&[f32]> {
        match self {
            TokenDisplay::Playback(buf) => Some(buf),
            TokenDisplay::ModelInput => None,
        }
    }
}

impl Default for TokenDisplay {
    fn default() -> Self {
        TokenDisplay::ModelInput
    }
}

/// Everything the playback engine writes for the renderer.
#[derive(Debug, Clone, Serialize)]
pub struct Scene {
    pub layout: Layout,
    pub camera: CameraTarget,
    pub tokens: TokenDisplay,
}

impl Scene {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            camera: CameraTarget::default(),
            tokens: TokenDisplay::ModelInput,
        }
    }

    pub fn from_shape(shape: &ModelShape) -> Self {
        Self::new(Layout::from_shape(shape))
    }

    /// Number of blocks with nonzero emphasis.
    pub fn highlighted_blocks(&self) -> usize {
        self.layout.iter_blocks().filter(|b| b.highlight > 0.0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_scene_is_neutral() {
        let scene = Scene::from_shape(&ModelShape::nano());
        assert_eq!(scene.highlighted_blocks(), 0);
        assert!(scene.camera.desired().is_none());
        assert_eq!(scene.tokens, TokenDisplay::ModelInput);
        assert!(scene.tokens.tokens().is_none());
    }

    #[test]
    fn test_token_display_serializes_with_source_tag() {
        let json = serde_json::to_string(&TokenDisplay::Playback(vec![1.0, 2.0])).unwrap();
        assert_eq!(json, r#"{"source":"playback","tokens":[1.0,2.0]}"#);
        let json = serde_json::to_string(&TokenDisplay::ModelInput).unwrap();
        assert_eq!(json, r#"{"source":"model_input"}"#);
    }
}
