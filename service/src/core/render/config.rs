//! Render Engine Configuration
//!
//! Fully materialized structure handed to the render engine: dimensions,
//! concurrency hints, encoder selection and the complete scene graph. Nothing
//! in here carries unresolved template structure.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::encoder::EncoderProfile;
use crate::core::template::{ConfigMap, ConfigValue};
use crate::core::TimeSec;

// =============================================================================
// Engine Settings
// =============================================================================

/// Top-level render configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEngineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub debug: bool,
    pub pool: bool,
    /// Frames rendered in parallel
    pub parallel: u32,
    /// Encoder threads
    pub threads: u32,
    pub high_water_mark: String,
    pub render: ConfigValue,
    pub force_canvas: bool,
    pub hardware_accelerated: bool,
    pub encoder: EncoderProfile,
    /// Engine-specific options passed through verbatim
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub engine_options: ConfigMap,
    pub scenes: Vec<RenderScene>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioTrack>,
}

impl RenderEngineConfig {
    /// Sum of scene durations, ignoring transition overlap
    pub fn total_duration(&self) -> TimeSec {
        self.scenes.iter().map(|s| s.duration).sum()
    }

    pub fn element_count(&self) -> usize {
        self.scenes.iter().map(|s| s.elements.len()).sum()
    }
}

// =============================================================================
// Scene Graph
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderScene {
    pub duration: TimeSec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
    pub elements: Vec<RenderElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioTrack>,
}

/// Scene-entry transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub name: String,
    pub duration: TimeSec,
}

/// Entry/exit effect applied to an element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animation {
    pub effect: String,
    pub duration: TimeSec,
    pub delay: TimeSec,
}

/// Audio attachment at scene or template level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    pub path: PathBuf,
    pub volume: f64,
    #[serde(rename = "loop")]
    pub looped: bool,
    pub start: TimeSec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_in: Option<TimeSec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_out: Option<TimeSec>,
}

/// Placement shared by every visual element
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// Typed text style; unrecognized keys are kept in `extra`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_align: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_shadow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_radius: Option<String>,
    #[serde(default, flatten)]
    pub extra: ConfigMap,
}

/// A constructed visual element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderElement {
    Image {
        path: PathBuf,
        fit: String,
        #[serde(flatten)]
        placement: Placement,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        animations: Vec<Animation>,
        /// Remaining resolved props (filters, style, anchor...)
        #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
        props: ConfigMap,
    },
    Text {
        text: String,
        font_size: f64,
        style: TextStyle,
        #[serde(flatten)]
        placement: Placement,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        animations: Vec<Animation>,
        #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
        props: ConfigMap,
    },
    Rect {
        color: String,
        #[serde(flatten)]
        placement: Placement,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        animations: Vec<Animation>,
        #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
        props: ConfigMap,
    },
    Video {
        path: PathBuf,
        #[serde(flatten)]
        placement: Placement,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        animations: Vec<Animation>,
        #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
        props: ConfigMap,
    },
}

impl RenderElement {
    pub fn kind_name(&self) -> &'static str {
        match self {
            RenderElement::Image { .. } => "image",
            RenderElement::Text { .. } => "text",
            RenderElement::Rect { .. } => "rect",
            RenderElement::Video { .. } => "video",
        }
    }

    pub fn animations(&self) -> &[Animation] {
        match self {
            RenderElement::Image { animations, .. }
            | RenderElement::Text { animations, .. }
            | RenderElement::Rect { animations, .. }
            | RenderElement::Video { animations, .. } => animations,
        }
    }

    pub fn placement(&self) -> &Placement {
        match self {
            RenderElement::Image { placement, .. }
            | RenderElement::Text { placement, .. }
            | RenderElement::Rect { placement, .. }
            | RenderElement::Video { placement, .. } => placement,
        }
    }

    pub(crate) fn set_animations(&mut self, list: Vec<Animation>) {
        match self {
            RenderElement::Image { animations, .. }
            | RenderElement::Text { animations, .. }
            | RenderElement::Rect { animations, .. }
            | RenderElement::Video { animations, .. } => *animations = list,
        }
    }
}
