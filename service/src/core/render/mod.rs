//! Render Module
//!
//! Render engine configuration, the two encoder profiles, and the engine seam.
//!
//! # Modules
//!
//! - `config`: Fully materialized render configuration and scene graph
//! - `encoder`: Hardware and software H.264 profiles
//! - `engine`: `RenderEngine` trait, progress ticks, scripted engine
//! - `command`: External-program renderer

pub mod command;
pub mod config;
pub mod encoder;
pub mod engine;

pub use command::{parse_progress_line, CommandRenderEngine};
pub use config::{
    Animation, AudioTrack, Placement, RenderElement, RenderEngineConfig, RenderScene, TextStyle,
    Transition,
};
pub use encoder::{EncoderFamily, EncoderProfile, RateControl};
pub use engine::{RenderEngine, RenderOutcome, RenderProgress, ScriptedEngine};
