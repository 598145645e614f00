//! Scenecast Core Engine
//!
//! Core render service module.
//! Handles templates, render configuration, the job queue and store, and
//! service settings.

pub mod fs;
pub mod hardware;
pub mod jobs;
pub mod process;
pub mod render;
pub mod settings;
pub mod template;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
