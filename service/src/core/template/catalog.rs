//! Template Catalog
//!
//! Built-in mobile templates, their metadata and required-variable lists,
//! the platform-to-template mapping, and the custom one-scene builder.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::models::{TemplateMetadata, TemplateSpec, TemplateSummary};
use super::value::{ConfigMap, ConfigValue};
use crate::core::{CoreError, CoreResult, TemplateId};

/// Template used when a platform has no dedicated mapping
pub const DEFAULT_TEMPLATE_ID: &str = "mobile_vertical_standard";

const BASE_VARIABLES: &[&str] = &["comfyui_image", "subtitle_text", "tts_audio", "duration"];
const TITLED_VARIABLES: &[&str] = &[
    "comfyui_image",
    "title_text",
    "subtitle_text",
    "tts_audio",
    "duration",
];

/// Required variable names for a catalog template. Unknown ids require nothing.
pub fn required_variables(template_id: &str) -> &'static [&'static str] {
    match template_id {
        "mobile_vertical_standard" | "mobile_tiktok_style" | "mobile_square_universal" => {
            BASE_VARIABLES
        }
        "mobile_instagram_stories" | "mobile_youtube_shorts" => TITLED_VARIABLES,
        _ => &[],
    }
}

/// Maps a target platform to a catalog template id (case-insensitive).
pub fn platform_template_id(platform: &str) -> &'static str {
    match platform.trim().to_lowercase().as_str() {
        "tiktok" | "instagram_reels" => "mobile_tiktok_style",
        "instagram_stories" => "mobile_instagram_stories",
        "youtube_shorts" => "mobile_youtube_shorts",
        "facebook" | "twitter" | "linkedin" => "mobile_square_universal",
        _ => DEFAULT_TEMPLATE_ID,
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// One immutable catalog entry
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogTemplate {
    pub id: TemplateId,
    pub metadata: TemplateMetadata,
    pub spec: TemplateSpec,
}

impl CatalogTemplate {
    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            id: self.id.clone(),
            metadata: self.metadata.clone(),
            required_variables: required_variables(&self.id)
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Static template catalog
#[derive(Clone, Debug)]
pub struct TemplateCatalog {
    templates: BTreeMap<TemplateId, CatalogTemplate>,
}

impl TemplateCatalog {
    /// Loads the built-in templates.
    pub fn builtin() -> CoreResult<Self> {
        let mut templates = BTreeMap::new();
        for (id, metadata, body) in builtin_entries() {
            let mut spec = TemplateSpec::from_value(&ConfigValue::from(body))?;
            spec.template_id = Some(id.to_string());
            templates.insert(
                id.to_string(),
                CatalogTemplate {
                    id: id.to_string(),
                    metadata,
                    spec,
                },
            );
        }
        Ok(Self { templates })
    }

    pub fn get(&self, template_id: &str) -> CoreResult<&CatalogTemplate> {
        self.templates
            .get(template_id)
            .ok_or_else(|| CoreError::TemplateNotFound(template_id.to_string()))
    }

    pub fn for_platform(&self, platform: &str) -> CoreResult<&CatalogTemplate> {
        self.get(platform_template_id(platform))
    }

    pub fn contains(&self, template_id: &str) -> bool {
        self.templates.contains_key(template_id)
    }

    /// Every template with its metadata, sorted by id.
    pub fn list_templates(&self) -> Vec<TemplateSummary> {
        self.templates.values().map(CatalogTemplate::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

// =============================================================================
// Custom Template Builder
// =============================================================================

/// Parameters for a one-scene custom mobile template
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomTemplateParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration: f64,
    #[serde(alias = "background_color")]
    pub background_color: String,
    /// Merged over the image element props
    #[serde(alias = "image_props")]
    pub image_props: ConfigMap,
    /// Merged over the text element style
    #[serde(alias = "text_props")]
    pub text_props: ConfigMap,
    /// Merged over the scene audio
    #[serde(alias = "audio_props")]
    pub audio_props: ConfigMap,
}

impl Default for CustomTemplateParams {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 30,
            duration: 10.0,
            background_color: "#000000".to_string(),
            image_props: ConfigMap::new(),
            text_props: ConfigMap::new(),
            audio_props: ConfigMap::new(),
        }
    }
}

/// Builds a one-scene template: full-frame image, bottom subtitle, narration.
pub fn custom_mobile_template(params: &CustomTemplateParams) -> CoreResult<TemplateSpec> {
    let width = f64::from(params.width);
    let height = f64::from(params.height);

    let mut image_props = json_map(json!({
        "path": "{{comfyui_image}}",
        "x": width / 2.0,
        "y": height / 2.0,
        "width": params.width,
        "height": params.height,
        "fit": "cover"
    }));
    image_props.extend(params.image_props.clone());

    let mut text_style = json_map(json!({
        "fontSize": (width * 0.045).floor() as i64,
        "color": "#FFFFFF",
        "backgroundColor": "rgba(0,0,0,0.8)",
        "textAlign": "center",
        "fontFamily": "Arial, sans-serif",
        "fontWeight": "bold",
        "padding": "20px",
        "borderRadius": "12px"
    }));
    text_style.extend(params.text_props.clone());

    let mut audio = json_map(json!({"path": "{{tts_audio}}", "volume": 1.0}));
    audio.extend(params.audio_props.clone());

    let body = ConfigValue::mapping([
        ("template_id", ConfigValue::from("custom_mobile")),
        (
            "creator_config",
            ConfigValue::from(json!({
                "width": params.width,
                "height": params.height,
                "fps": params.fps,
                "debug": false
            })),
        ),
        (
            "scenes",
            ConfigValue::Sequence(vec![ConfigValue::mapping([
                ("type", ConfigValue::from("custom_content")),
                ("duration", ConfigValue::Float(params.duration)),
                ("background_color", ConfigValue::from(params.background_color.clone())),
                (
                    "elements",
                    ConfigValue::Sequence(vec![
                        ConfigValue::mapping([
                            ("type", ConfigValue::from("FFImage")),
                            ("props", ConfigValue::Mapping(image_props)),
                            (
                                "animations",
                                ConfigValue::from(json!([
                                    {"effect": "fadeIn", "duration": 1, "delay": 0}
                                ])),
                            ),
                        ]),
                        ConfigValue::mapping([
                            ("type", ConfigValue::from("FFText")),
                            (
                                "props",
                                ConfigValue::mapping([
                                    ("text", ConfigValue::from("{{subtitle_text}}")),
                                    ("x", ConfigValue::Float(width / 2.0)),
                                    ("y", ConfigValue::Float(height - 170.0)),
                                    ("width", ConfigValue::Float(width - 80.0)),
                                    ("style", ConfigValue::Mapping(text_style)),
                                ]),
                            ),
                            (
                                "animations",
                                ConfigValue::from(json!([
                                    {"effect": "slideInUp", "duration": 0.8, "delay": 0.5}
                                ])),
                            ),
                        ]),
                    ]),
                ),
                ("audio", ConfigValue::Mapping(audio)),
            ])]),
        ),
    ]);

    TemplateSpec::from_value(&body)
}

fn json_map(value: serde_json::Value) -> ConfigMap {
    match ConfigValue::from(value) {
        ConfigValue::Mapping(map) => map,
        _ => ConfigMap::new(),
    }
}

// =============================================================================
// Built-in Templates
// =============================================================================

fn metadata(
    name: &str,
    description: &str,
    aspect_ratio: &str,
    resolution: &str,
    duration: &str,
    platforms: &[&str],
    features: &[&str],
) -> TemplateMetadata {
    TemplateMetadata {
        name: name.to_string(),
        description: description.to_string(),
        aspect_ratio: aspect_ratio.to_string(),
        resolution: resolution.to_string(),
        duration: duration.to_string(),
        platforms: platforms.iter().map(|s| s.to_string()).collect(),
        features: features.iter().map(|s| s.to_string()).collect(),
    }
}

fn vertical_creator() -> serde_json::Value {
    json!({"width": 1080, "height": 1920, "fps": 30, "debug": false})
}

fn builtin_entries() -> Vec<(&'static str, TemplateMetadata, serde_json::Value)> {
    vec![
        (
            "mobile_vertical_standard",
            metadata(
                "Mobile Vertical Standard",
                "Clean 9:16 template with image background and bottom subtitles",
                "9:16",
                "1080x1920",
                "variable",
                &["TikTok", "Instagram Stories", "YouTube Shorts"],
                &["Background Image", "Subtitle Text", "Audio Support", "Fade Animations"],
            ),
            json!({
                "creator_config": vertical_creator(),
                "scenes": [{
                    "type": "main_content",
                    "duration": "{{duration}}",
                    "background_color": "#000000",
                    "elements": [
                        {
                            "type": "FFImage",
                            "props": {
                                "path": "{{comfyui_image}}",
                                "x": 540, "y": 960, "width": 1080, "height": 1920,
                                "fit": "cover"
                            },
                            "animations": [{"effect": "fadeIn", "duration": 1, "delay": 0}]
                        },
                        {
                            "type": "FFText",
                            "props": {
                                "text": "{{subtitle_text}}",
                                "x": 540, "y": 1750, "width": 1000,
                                "style": {
                                    "fontSize": 48,
                                    "color": "#FFFFFF",
                                    "backgroundColor": "rgba(0,0,0,0.8)",
                                    "textAlign": "center",
                                    "fontFamily": "Arial, sans-serif",
                                    "fontWeight": "bold",
                                    "padding": "20px",
                                    "borderRadius": "12px",
                                    "textShadow": "2px 2px 4px rgba(0,0,0,0.8)"
                                }
                            },
                            "animations": [{"effect": "slideInUp", "duration": 0.8, "delay": 0.5}]
                        }
                    ],
                    "audio": {"path": "{{tts_audio}}", "volume": 1.0}
                }]
            }),
        ),
        (
            "mobile_tiktok_style",
            metadata(
                "TikTok Style Mobile",
                "Energetic template with branded intro and dynamic animations",
                "9:16",
                "1080x1920",
                "variable",
                &["TikTok", "Instagram Reels"],
                &["Intro Scene", "Bounce Animations", "Brand Colors", "Text Effects"],
            ),
            json!({
                "creator_config": vertical_creator(),
                "scenes": [
                    {
                        "type": "intro_scene",
                        "duration": 2,
                        "background_color": "#ff0050",
                        "elements": [{
                            "type": "FFText",
                            "props": {
                                "text": "🎬 AI Generated",
                                "x": 540, "y": 960,
                                "style": {
                                    "fontSize": 72,
                                    "color": "#FFFFFF",
                                    "fontWeight": "bold",
                                    "textAlign": "center",
                                    "textShadow": "4px 4px 8px rgba(0,0,0,0.8)"
                                }
                            },
                            "animations": [{"effect": "bounceIn", "duration": 1.5, "delay": 0}]
                        }]
                    },
                    {
                        "type": "main_content",
                        "duration": "{{duration}}",
                        "background_color": "#000000",
                        "elements": [
                            {
                                "type": "FFImage",
                                "props": {
                                    "path": "{{comfyui_image}}",
                                    "x": 540, "y": 960, "width": 1080, "height": 1920,
                                    "fit": "cover"
                                },
                                "animations": [{"effect": "zoomIn", "duration": 1, "delay": 0}]
                            },
                            {
                                "type": "FFRect",
                                "props": {
                                    "x": 0, "y": 1500, "width": 1080, "height": 420,
                                    "color": "linear-gradient(transparent, rgba(0,0,0,0.9))"
                                }
                            },
                            {
                                "type": "FFText",
                                "props": {
                                    "text": "{{subtitle_text}}",
                                    "x": 540, "y": 1700, "width": 1000,
                                    "style": {
                                        "fontSize": 52,
                                        "color": "#FFFFFF",
                                        "textAlign": "center",
                                        "fontFamily": "Arial, sans-serif",
                                        "fontWeight": "700",
                                        "textShadow": "2px 2px 4px rgba(0,0,0,0.8)",
                                        "lineHeight": 1.3
                                    }
                                },
                                "animations": [{"effect": "slideInUp", "duration": 0.6, "delay": 0.3}]
                            }
                        ],
                        "audio": {"path": "{{tts_audio}}", "volume": 0.9}
                    }
                ]
            }),
        ),
        (
            "mobile_instagram_stories",
            metadata(
                "Instagram Stories",
                "Stories-optimized template with centered image and glass effects",
                "9:16",
                "1080x1920",
                "15s (Stories limit)",
                &["Instagram Stories"],
                &["Blur Background", "Centered Image", "Glass Effects", "Pulse Animation"],
            ),
            json!({
                "creator_config": vertical_creator(),
                "scenes": [{
                    "type": "story_content",
                    "duration": "{{duration}}",
                    "elements": [
                        {
                            "type": "FFImage",
                            "props": {
                                "path": "{{comfyui_image}}",
                                "x": 540, "y": 960, "width": 1080, "height": 1920,
                                "fit": "cover",
                                "filter": "blur(10px) brightness(0.4)"
                            }
                        },
                        {
                            "type": "FFImage",
                            "props": {
                                "path": "{{comfyui_image}}",
                                "x": 540, "y": 800, "width": 900, "height": 900,
                                "fit": "contain",
                                "style": {
                                    "borderRadius": "20px",
                                    "border": "4px solid #FFFFFF",
                                    "boxShadow": "0 8px 32px rgba(0,0,0,0.3)"
                                }
                            },
                            "animations": [{"effect": "pulse", "duration": 0.8, "delay": 0.2}]
                        },
                        {
                            "type": "FFText",
                            "props": {
                                "text": "{{title_text}}",
                                "x": 540, "y": 200, "width": 1000,
                                "style": {
                                    "fontSize": 48,
                                    "color": "#FFFFFF",
                                    "textAlign": "center",
                                    "fontWeight": "bold",
                                    "textShadow": "2px 2px 4px rgba(0,0,0,1)"
                                }
                            },
                            "animations": [{"effect": "fadeInDown", "duration": 1, "delay": 0}]
                        },
                        {
                            "type": "FFText",
                            "props": {
                                "text": "{{subtitle_text}}",
                                "x": 540, "y": 1750, "width": 1000,
                                "style": {
                                    "fontSize": 36,
                                    "color": "#FFFFFF",
                                    "textAlign": "center",
                                    "backgroundColor": "rgba(255,255,255,0.2)",
                                    "padding": "15px",
                                    "borderRadius": "25px",
                                    "backdropFilter": "blur(10px)",
                                    "border": "1px solid rgba(255,255,255,0.3)"
                                }
                            },
                            "animations": [{"effect": "slideInUp", "duration": 0.8, "delay": 0.5}]
                        }
                    ],
                    "audio": {"path": "{{tts_audio}}", "volume": 0.8}
                }]
            }),
        ),
        (
            "mobile_youtube_shorts",
            metadata(
                "YouTube Shorts",
                "YouTube Shorts template with bold text and high contrast",
                "9:16",
                "1080x1920",
                "30s (Shorts limit)",
                &["YouTube Shorts"],
                &["Bold Typography", "Text Stroke", "High Contrast", "Bounce Effects"],
            ),
            json!({
                "creator_config": vertical_creator(),
                "scenes": [{
                    "type": "shorts_content",
                    "duration": "{{duration}}",
                    "elements": [
                        {
                            "type": "FFImage",
                            "props": {
                                "path": "{{comfyui_image}}",
                                "x": 540, "y": 960, "width": 1080, "height": 1920,
                                "fit": "cover"
                            }
                        },
                        {
                            "type": "FFText",
                            "props": {
                                "text": "{{title_text}}",
                                "x": 540, "y": 300, "width": 1000,
                                "style": {
                                    "fontSize": 64,
                                    "color": "#FFFFFF",
                                    "fontWeight": "bold",
                                    "textAlign": "center",
                                    "textStroke": "3px #000000",
                                    "textShadow": "4px 4px 8px rgba(0,0,0,0.8)",
                                    "fontFamily": "Arial Black, sans-serif"
                                }
                            },
                            "animations": [{"effect": "bounceInDown", "duration": 1, "delay": 0.2}]
                        },
                        {
                            "type": "FFText",
                            "props": {
                                "text": "{{subtitle_text}}",
                                "x": 540, "y": 1600, "width": 1000,
                                "style": {
                                    "fontSize": 40,
                                    "color": "#FFFFFF",
                                    "backgroundColor": "rgba(0,0,0,0.8)",
                                    "padding": "25px",
                                    "borderRadius": "15px",
                                    "textAlign": "center",
                                    "border": "2px solid #FFFFFF",
                                    "fontWeight": "600"
                                }
                            },
                            "animations": [{"effect": "slideInUp", "duration": 0.8, "delay": 0.8}]
                        }
                    ],
                    "audio": {"path": "{{tts_audio}}", "volume": 1.0}
                }]
            }),
        ),
        (
            "mobile_square_universal",
            metadata(
                "Universal Square",
                "Cross-platform square template for maximum compatibility",
                "1:1",
                "1080x1080",
                "variable",
                &["Instagram Posts", "Facebook", "Twitter", "LinkedIn"],
                &["Universal Format", "Clean Design", "Professional Look"],
            ),
            json!({
                "creator_config": {"width": 1080, "height": 1080, "fps": 30, "debug": false},
                "scenes": [{
                    "type": "square_content",
                    "duration": "{{duration}}",
                    "background_color": "#f8f9fa",
                    "elements": [
                        {
                            "type": "FFImage",
                            "props": {
                                "path": "{{comfyui_image}}",
                                "x": 540, "y": 400, "width": 900, "height": 500,
                                "fit": "contain",
                                "style": {
                                    "borderRadius": "20px",
                                    "boxShadow": "0 4px 16px rgba(0,0,0,0.2)"
                                }
                            },
                            "animations": [{"effect": "fadeIn", "duration": 1, "delay": 0}]
                        },
                        {
                            "type": "FFText",
                            "props": {
                                "text": "{{subtitle_text}}",
                                "x": 540, "y": 850, "width": 1000,
                                "style": {
                                    "fontSize": 36,
                                    "color": "#2c3e50",
                                    "textAlign": "center",
                                    "fontFamily": "Arial, sans-serif",
                                    "fontWeight": "600",
                                    "lineHeight": 1.4
                                }
                            },
                            "animations": [{"effect": "slideInUp", "duration": 0.8, "delay": 0.5}]
                        }
                    ],
                    "audio": {"path": "{{tts_audio}}", "volume": 0.9}
                }]
            }),
        ),
    ]
}
