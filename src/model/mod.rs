//! Model description and session-scoped model storage.
//!
//! - [`ModelShape`]: normalized dimensions from a model config document
//! - [`ModelCache`]: LRU cache of loaded models owned by a session

pub mod cache;
pub mod config;

pub use cache::ModelCache;
pub use config::ModelShape;
