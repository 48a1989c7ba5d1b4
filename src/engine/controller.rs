//! Generation playback controller.
//!
//! [`GenerationController`] is a frame-driven state machine. Each rendered
//! frame calls [`GenerationController::advance`] with the elapsed time; when
//! the current phase has run for `step_duration` the controller moves to the
//! next phase, publishing the camera target and highlight set for it. At the
//! end of the `output` phase it samples a token and either finishes or feeds
//! the token back through the native module for the next round.
//!
//! Phase order: `idle → embedding → transformer(0..n) → output →
//! (embedding … | complete)`.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::VizError;
use crate::tensor::TensorKind;

use super::bridge::NativeModelBridge;
use super::camera::CameraChoreographer;
use super::highlight::HighlightManager;
use super::phase::{Phase, Step};
use super::sampler::{sampler_from_config, SamplingConfig, TokenSampler};
use super::scene::{Scene, TokenDisplay};

/// Seconds each phase stays on screen unless configured otherwise.
pub const DEFAULT_STEP_DURATION: f32 = 1.0;

/// Playback tuning.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Seconds per phase.
    pub step_duration: f32,
    /// Extra attempts after a failed forward pass before the run is ended.
    pub max_forward_retries: u32,
    /// Sampling parameters (greedy by default).
    pub sampling: SamplingConfig,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            step_duration: DEFAULT_STEP_DURATION,
            max_forward_retries: 2,
            sampling: SamplingConfig::default(),
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Generated `target_tokens` tokens.
    TargetReached,
    /// The next token would not fit in the context window.
    ContextLength,
    /// The forward pass kept failing after retries.
    ForwardFailed,
    /// The native module was detached mid-run.
    BridgeUnavailable,
    /// `stop()` was called.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TargetReached => write!(f, "target_reached"),
            StopReason::ContextLength => write!(f, "context_length"),
            StopReason::ForwardFailed => write!(f, "forward_failed"),
            StopReason::BridgeUnavailable => write!(f, "bridge_unavailable"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Playback state. Only the controller mutates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationState {
    pub active: bool,
    pub target_tokens: usize,
    pub tokens_generated: usize,
    pub current_step: Step,
    /// Fraction of the current phase elapsed, in `[0, 1)`.
    pub step_progress: f32,
    /// Block index while in `transformer`.
    pub camera_phase: usize,
    /// Prompt as written to the input tensor, after truncation to `T`.
    pub prompt_tokens: Option<Vec<u32>>,
    pub generated_tokens: Vec<u32>,
}

impl GenerationState {
    fn new(target_tokens: usize) -> Self {
        Self {
            active: false,
            target_tokens,
            tokens_generated: 0,
            current_step: Step::Idle,
            step_progress: 0.0,
            camera_phase: 0,
            prompt_tokens: None,
            generated_tokens: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        match self.current_step {
            Step::Idle => Phase::Idle,
            Step::Embedding => Phase::Embedding,
            Step::Transformer => Phase::Transformer(self.camera_phase),
            Step::Output => Phase::Output,
            Step::Complete => Phase::Complete,
        }
    }
}

impl Default for GenerationState {
    fn default() -> Self {
        Self::new(0)
    }
}

pub struct GenerationController {
    state: GenerationState,
    config: PlaybackConfig,
    bridge: NativeModelBridge,
    sampler: Box<dyn TokenSampler>,
    camera: CameraChoreographer,
    highlight: HighlightManager,
    stop_reason: Option<StopReason>,
}

impl GenerationController {
    pub fn new(bridge: NativeModelBridge, mut config: PlaybackConfig) -> Self {
        if !config.step_duration.is_finite() || config.step_duration <= 0.0 {
            warn!(
                step_duration = config.step_duration,
                "Invalid step duration, using default"
            );
            config.step_duration = DEFAULT_STEP_DURATION;
        }
        let sampler = sampler_from_config(&config.sampling);
        debug!(sampler = sampler.name(), step_duration = config.step_duration, "Created generation controller");
        Self {
            state: GenerationState::default(),
            config,
            bridge,
            sampler,
            camera: CameraChoreographer::new(),
            highlight: HighlightManager::new(),
            stop_reason: None,
        }
    }

    /// Replace the sampling strategy.
    pub fn with_sampler(mut self, sampler: Box<dyn TokenSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn sampler_name(&self) -> &'static str {
        self.sampler.name()
    }

    pub fn bridge(&self) -> &NativeModelBridge {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut NativeModelBridge {
        &mut self.bridge
    }

    /// Begin a run of `target_tokens` decoding steps.
    ///
    /// With a non-empty prompt, the prompt (truncated to the context length)
    /// replaces the native input sequence. Without one, the sequence already
    /// in the module is used. The first forward pass runs here, and the
    /// controller enters `embedding`.
    pub fn start(
        &mut self,
        prompt: Option<&[u32]>,
        target_tokens: usize,
        scene: &mut Scene,
    ) -> Result<(), VizError> {
        if target_tokens == 0 {
            return Err(VizError::InvalidArgument(
                "target_tokens must be positive".to_string(),
            ));
        }

        self.state = GenerationState::new(target_tokens);
        self.stop_reason = None;
        self.highlight.clear(&mut scene.layout);

        let (context_len, vocab_size, current_len) = {
            let link = self.bridge.link()?;
            (link.shape.block_size, link.shape.vocab_size, link.input_len)
        };

        match prompt.filter(|p| !p.is_empty()) {
            Some(prompt) => {
                let kept = &prompt[..prompt.len().min(context_len)];
                if kept.len() < prompt.len() {
                    warn!(
                        prompt_len = prompt.len(),
                        context_len,
                        "Prompt truncated to context length"
                    );
                }
                if let Some(&bad) = kept.iter().find(|&&id| id as usize >= vocab_size) {
                    return Err(VizError::InvalidArgument(format!(
                        "prompt token {} is outside vocabulary of {}",
                        bad, vocab_size
                    )));
                }
                let values: Vec<f32> = kept.iter().map(|&id| id as f32).collect();
                self.bridge.tensor(TensorKind::InputTokens)?.write_at(0, &values)?;
                self.bridge.set_input_len(kept.len())?;
                self.state.prompt_tokens = Some(kept.to_vec());
            }
            None if current_len == 0 => {
                return Err(VizError::InvalidArgument(
                    "no prompt given and the model input sequence is empty".to_string(),
                ));
            }
            None => debug!(input_len = current_len, "Reusing model input sequence"),
        }

        self.state.active = true;
        info!(
            target_tokens,
            prompt_len = self.state.prompt_tokens.as_ref().map(Vec::len),
            sampler = self.sampler.name(),
            "Starting generation playback"
        );

        if let Err(e) = self.forward_with_retries() {
            self.finish(StopReason::ForwardFailed, scene);
            return Err(e);
        }
        self.enter(Phase::Embedding, scene);
        Ok(())
    }

    /// Advance playback by `dt` seconds. Call once per rendered frame.
    ///
    /// Performs at most one phase transition per call. Non-positive or
    /// non-finite `dt` is ignored.
    pub fn advance(&mut self, dt: f32, scene: &mut Scene) {
        if !self.state.active {
            return;
        }
        if !self.bridge.is_available() {
            warn!(phase = %self.phase(), "Native module unavailable; deactivating playback");
            self.state.active = false;
            self.stop_reason = Some(StopReason::BridgeUnavailable);
            return;
        }
        if !dt.is_finite() || dt <= 0.0 {
            return;
        }

        self.state.step_progress += dt / self.config.step_duration;
        if self.state.step_progress < 1.0 {
            return;
        }

        match self.phase() {
            Phase::Output => self.finish_output(scene),
            // start() always leaves the controller in embedding, so an active
            // idle or complete state has nothing to advance.
            Phase::Idle | Phase::Complete => {
                self.state.active = false;
                self.state.step_progress = 0.0;
            }
            phase => {
                let n_blocks = self.n_blocks();
                self.enter(phase.next(n_blocks), scene);
            }
        }
    }

    /// Cancel the current run immediately.
    pub fn stop(&mut self, scene: &mut Scene) {
        if self.state.active {
            self.finish(StopReason::Cancelled, scene);
        }
    }

    /// Token buffer for the renderer: the playback buffer when a prompt was
    /// given, otherwise the model's own input tensor.
    pub fn display_tokens(&self) -> TokenDisplay {
        match &self.state.prompt_tokens {
            Some(prompt) => TokenDisplay::Playback(
                prompt
                    .iter()
                    .chain(&self.state.generated_tokens)
                    .map(|&id| id as f32)
                    .collect(),
            ),
            None => {
                debug!("No playback buffer; renderer falls back to model input tensor");
                TokenDisplay::ModelInput
            }
        }
    }

    fn n_blocks(&self) -> usize {
        self.bridge
            .module()
            .map(|m| m.shape().n_blocks())
            .unwrap_or(0)
    }

    fn enter(&mut self, phase: Phase, scene: &mut Scene) {
        debug!(from = %self.phase(), to = %phase, "Phase transition");
        self.state.current_step = phase.step();
        self.state.camera_phase = phase.camera_phase();
        self.state.step_progress = 0.0;
        self.camera.move_to(phase, &scene.layout, &mut scene.camera);
        self.highlight.set(phase, &mut scene.layout);
        scene.tokens = self.display_tokens();
    }

    fn finish(&mut self, reason: StopReason, scene: &mut Scene) {
        self.state.current_step = Step::Complete;
        self.state.camera_phase = 0;
        self.state.step_progress = 0.0;
        self.state.active = false;
        self.stop_reason = Some(reason);
        self.highlight.clear(&mut scene.layout);
        scene.tokens = self.display_tokens();
        info!(
            %reason,
            tokens_generated = self.state.tokens_generated,
            target_tokens = self.state.target_tokens,
            "Generation playback complete"
        );
    }

    /// End of the output phase: sample, then finish or feed the token back.
    fn finish_output(&mut self, scene: &mut Scene) {
        let token = match self.bridge.link() {
            Ok(link) => self.sampler.sample(&link),
            Err(_) => {
                self.state.active = false;
                self.stop_reason = Some(StopReason::BridgeUnavailable);
                return;
            }
        };

        self.state.generated_tokens.push(token);
        self.state.tokens_generated += 1;
        debug!(
            token,
            tokens_generated = self.state.tokens_generated,
            target_tokens = self.state.target_tokens,
            "Sampled token"
        );

        if self.state.tokens_generated >= self.state.target_tokens {
            self.finish(StopReason::TargetReached, scene);
            return;
        }

        match self.append_token(token) {
            Ok(()) => {}
            Err(VizError::ContextFull { len, max }) => {
                warn!(len, max, "Context window full; ending playback");
                self.finish(StopReason::ContextLength, scene);
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to append token; ending playback");
                self.finish(StopReason::ForwardFailed, scene);
                return;
            }
        }

        if self.forward_with_retries().is_err() {
            self.finish(StopReason::ForwardFailed, scene);
            return;
        }
        self.enter(Phase::Embedding, scene);
    }

    /// Write `token` after the current sequence. Refuses to grow the sequence
    /// to the full context length, so nothing is written past `T - 1`.
    fn append_token(&mut self, token: u32) -> Result<(), VizError> {
        let (input_len, context_len) = {
            let link = self.bridge.link()?;
            (link.input_len, link.shape.block_size)
        };
        let new_len = input_len + 1;
        if new_len >= context_len {
            return Err(VizError::ContextFull {
                len: new_len,
                max: context_len,
            });
        }
        self.bridge
            .tensor(TensorKind::InputTokens)?
            .set(input_len, token as f32)?;
        self.bridge.set_input_len(new_len)
    }

    fn forward_with_retries(&mut self) -> Result<(), VizError> {
        let mut retries = 0;
        loop {
            match self.bridge.run_forward_pass() {
                Ok(()) => {
                    self.bridge.mark_dirty();
                    return Ok(());
                }
                Err(VizError::BridgeUnavailable) => return Err(VizError::BridgeUnavailable),
                Err(e) if retries < self.config.max_forward_retries => {
                    retries += 1;
                    warn!(error = %e, retry = retries, "Forward pass failed; retrying");
                }
                Err(e) => {
                    warn!(error = %e, retries, "Forward pass failed; giving up");
                    return Err(e);
                }
            }
        }
    }
}
