//! Generation playback.
//!
//! - [`GenerationController`]: frame-driven phase state machine
//! - [`NativeModelBridge`]: borrowed access to the native module's tensors
//! - [`TokenSampler`]: picks the next token from the sorted probabilities
//! - [`CameraChoreographer`] / [`HighlightManager`]: per-phase presentation
//! - [`Session`]: controller + scene + session-scoped model cache

pub mod bridge;
pub mod camera;
pub mod controller;
pub mod highlight;
pub mod phase;
pub mod sampler;
pub mod scene;
pub mod session;

pub use bridge::NativeModelBridge;
pub use camera::{CameraChoreographer, CameraPose, CameraTarget};
pub use controller::{GenerationController, GenerationState, PlaybackConfig, StopReason};
pub use highlight::HighlightManager;
pub use phase::{Phase, Step};
pub use sampler::{GreedySampler, SamplingConfig, StochasticSampler, TokenSampler};
pub use scene::{Scene, TokenDisplay};
pub use session::Session;
