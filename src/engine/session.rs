//! Playback session: one controller, one scene and a cache of loaded models.
//!
//! Switching models puts the attached module back into the session's
//! [`ModelCache`] so switching back is cheap. The attached module is held
//! by the bridge, outside the cache, and does not count against capacity.

use tracing::{debug, info, warn};

use crate::error::VizError;
use crate::model::{ModelCache, ModelShape};
use crate::native::NativeModule;

use super::bridge::NativeModelBridge;
use super::controller::{GenerationController, GenerationState, PlaybackConfig, StopReason};
use super::scene::Scene;

pub struct Session {
    cache: ModelCache<Box<dyn NativeModule>>,
    controller: GenerationController,
    scene: Scene,
    active_model: Option<String>,
}

impl Session {
    pub fn new(config: PlaybackConfig, cache_capacity: usize) -> Self {
        Self {
            cache: ModelCache::new(cache_capacity),
            controller: GenerationController::new(NativeModelBridge::detached(), config),
            scene: Scene::from_shape(&ModelShape::default()),
            active_model: None,
        }
    }

    /// Attach model `id`, taking it from the cache or calling `load` on a
    /// miss. Cancels any active run and rebuilds the scene for the new
    /// model's shape. A failed load leaves the current model attached.
    pub fn load_model(
        &mut self,
        id: &str,
        load: impl FnOnce(&str) -> Result<Box<dyn NativeModule>, VizError>,
    ) -> Result<(), VizError> {
        if self.active_model.as_deref() == Some(id) {
            debug!(model_id = %id, "Model already attached");
            return Ok(());
        }

        let module = match self.cache.take(id) {
            Some(module) => {
                debug!(model_id = %id, "Model cache hit");
                module
            }
            None => {
                info!(model_id = %id, "Loading model");
                load(id)?
            }
        };

        self.controller.stop(&mut self.scene);
        if let Some(previous) = self.controller.bridge_mut().detach() {
            if let Some(previous_id) = self.active_model.take() {
                if let Some((evicted, _)) = self.cache.insert(previous_id, previous) {
                    debug!(model_id = %evicted, "Dropped least recently used model");
                }
            }
        }

        self.scene = Scene::from_shape(module.shape());
        self.controller.bridge_mut().attach(module);
        self.active_model = Some(id.to_string());
        Ok(())
    }

    pub fn start(&mut self, prompt: Option<&[u32]>, target_tokens: usize) -> Result<(), VizError> {
        self.controller.start(prompt, target_tokens, &mut self.scene)
    }

    /// Advance one frame and return the scene to render.
    pub fn frame(&mut self, dt: f32) -> &Scene {
        self.controller.advance(dt, &mut self.scene);
        &self.scene
    }

    pub fn stop(&mut self) {
        self.controller.stop(&mut self.scene);
    }

    /// Drop model `id`. Evicting the attached model cancels the run and
    /// detaches it. Returns whether anything was dropped.
    pub fn evict(&mut self, id: &str) -> bool {
        if self.active_model.as_deref() == Some(id) {
            warn!(model_id = %id, "Evicting attached model");
            self.controller.stop(&mut self.scene);
            self.controller.bridge_mut().detach();
            self.active_model = None;
            return true;
        }
        self.cache.evict(id)
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn state(&self) -> &GenerationState {
        self.controller.state()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.controller.stop_reason()
    }

    pub fn controller(&self) -> &GenerationController {
        &self.controller
    }

    pub fn active_model(&self) -> Option<&str> {
        self.active_model.as_deref()
    }

    /// Ids of cached (not attached) models, least recently used first.
    pub fn cached_models(&self) -> Vec<String> {
        self.cache.ids().map(str::to_string).collect()
    }

    /// Whether the renderer must re-read tensors. Clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        self.controller.bridge_mut().take_dirty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::phase::Step;
    use crate::native::ReferenceModel;
    use std::cell::Cell;

    fn shape(n_layer: usize) -> ModelShape {
        ModelShape {
            n_layer,
            n_head: 1,
            n_embd: 4,
            vocab_size: 4,
            block_size: 8,
        }
    }

    fn loader(n_layer: usize, calls: &Cell<usize>) -> impl FnOnce(&str) -> Result<Box<dyn NativeModule>, VizError> + '_ {
        move |_id| {
            calls.set(calls.get() + 1);
            Ok(Box::new(ReferenceModel::new(shape(n_layer), 7)) as Box<dyn NativeModule>)
        }
    }

    #[test]
    fn test_session_without_model() {
        let mut session = Session::new(PlaybackConfig::default(), 2);
        assert!(session.active_model().is_none());
        let err = session.start(Some(&[1]), 1).unwrap_err();
        assert!(matches!(err, VizError::BridgeUnavailable));
        session.frame(1.0);
        assert!(!session.state().active);
    }

    #[test]
    fn test_full_run_through_frames() {
        let calls = Cell::new(0);
        let mut session = Session::new(PlaybackConfig::default(), 2);
        session.load_model("tiny", loader(2, &calls)).unwrap();
        assert_eq!(session.scene().layout.n_blocks(), 2);
        assert!(session.take_dirty());

        session.start(Some(&[1, 2]), 2).unwrap();
        let mut frames = 0;
        while session.state().active && frames < 1000 {
            session.frame(0.5);
            frames += 1;
        }
        assert_eq!(session.state().tokens_generated, 2);
        assert_eq!(session.state().current_step, Step::Complete);
        assert_eq!(session.stop_reason(), Some(StopReason::TargetReached));
        assert_eq!(session.scene().highlighted_blocks(), 0);
    }

    #[test]
    fn test_switching_back_uses_cache() {
        let calls = Cell::new(0);
        let mut session = Session::new(PlaybackConfig::default(), 2);
        session.load_model("a", loader(1, &calls)).unwrap();
        session.load_model("b", loader(3, &calls)).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(session.cached_models(), vec!["a".to_string()]);
        assert_eq!(session.scene().layout.n_blocks(), 3);

        session.load_model("a", loader(1, &calls)).unwrap();
        assert_eq!(calls.get(), 2, "Cached model must not be reloaded");
        assert_eq!(session.active_model(), Some("a"));
        assert_eq!(session.cached_models(), vec!["b".to_string()]);
        assert_eq!(session.scene().layout.n_blocks(), 1);
    }

    #[test]
    fn test_reloading_attached_model_is_noop() {
        let calls = Cell::new(0);
        let mut session = Session::new(PlaybackConfig::default(), 2);
        session.load_model("a", loader(1, &calls)).unwrap();
        session.start(Some(&[1]), 3).unwrap();
        session.load_model("a", loader(1, &calls)).unwrap();
        assert_eq!(calls.get(), 1);
        assert!(session.state().active, "Run continues on same model");
    }

    #[test]
    fn test_cache_capacity_drops_oldest() {
        let calls = Cell::new(0);
        let mut session = Session::new(PlaybackConfig::default(), 1);
        session.load_model("a", loader(1, &calls)).unwrap();
        session.load_model("b", loader(1, &calls)).unwrap();
        session.load_model("c", loader(1, &calls)).unwrap();
        assert_eq!(session.cached_models(), vec!["b".to_string()]);

        session.load_model("a", loader(1, &calls)).unwrap();
        assert_eq!(calls.get(), 4, "Dropped model must be reloaded");
    }

    #[test]
    fn test_switching_model_cancels_run() {
        let calls = Cell::new(0);
        let mut session = Session::new(PlaybackConfig::default(), 2);
        session.load_model("a", loader(2, &calls)).unwrap();
        session.start(Some(&[1]), 5).unwrap();
        session.frame(1.0);
        session.load_model("b", loader(2, &calls)).unwrap();
        assert!(!session.state().active);
        assert_eq!(session.stop_reason(), Some(StopReason::Cancelled));
    }

    #[test]
    fn test_failed_load_keeps_current_model() {
        let calls = Cell::new(0);
        let mut session = Session::new(PlaybackConfig::default(), 2);
        session.load_model("a", loader(2, &calls)).unwrap();
        session.start(Some(&[1]), 2).unwrap();

        let err = session
            .load_model("missing", |id| Err(VizError::Model(format!("no model '{}'", id))))
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert_eq!(session.active_model(), Some("a"));
        assert!(session.state().active, "Failed load must not cancel the run");
    }

    #[test]
    fn test_evict() {
        let calls = Cell::new(0);
        let mut session = Session::new(PlaybackConfig::default(), 2);
        session.load_model("a", loader(1, &calls)).unwrap();
        session.load_model("b", loader(1, &calls)).unwrap();
        assert!(session.evict("a"));
        assert!(!session.evict("a"));
        assert!(session.cached_models().is_empty());

        session.start(Some(&[1]), 2).unwrap();
        assert!(session.evict("b"));
        assert!(session.active_model().is_none());
        assert!(!session.state().active);
        assert!(!session.controller().bridge().is_available());
    }
}
