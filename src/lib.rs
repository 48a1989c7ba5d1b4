pub mod cli;
pub mod engine;
pub mod error;
pub mod layout;
pub mod model;
pub mod native;
pub mod tensor;

pub use engine::{GenerationController, PlaybackConfig, Session, StopReason};
pub use error::VizError;
pub use model::ModelShape;
pub use native::{NativeModule, ReferenceModel};
