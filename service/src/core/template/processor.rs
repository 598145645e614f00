//! Template Processor
//!
//! Builds a concrete `RenderEngineConfig` from a template body and a variable
//! set: engine settings, hardware-aware encoder selection, scenes, elements,
//! animations and audio.
//!
//! Only structural problems fail a build. Element and audio construction
//! problems are logged and the item is omitted.

use std::path::PathBuf;
use std::sync::Arc;

use super::models::{ElementKind, ElementSpec, SceneSpec, TemplateSpec};
use super::resolver::{resolve, VariableSet};
use super::value::{ConfigMap, ConfigValue};
use crate::core::fs::{file_exists, resolve_asset_path};
use crate::core::hardware::HardwareProbe;
use crate::core::render::{
    Animation, AudioTrack, EncoderProfile, Placement, RenderElement, RenderEngineConfig,
    RenderScene, TextStyle, Transition,
};
use crate::core::{CoreError, CoreResult};

const DEFAULT_SCENE_DURATION: f64 = 5.0;
const DEFAULT_FONT_SIZE: f64 = 36.0;

/// Directories the processor resolves against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorPaths {
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Base for relative image/video paths
    pub assets_dir: PathBuf,
    /// Base for relative audio paths
    pub audio_dir: PathBuf,
}

impl Default for ProcessorPaths {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("/app/cache"),
            output_dir: PathBuf::from("/app/videos"),
            assets_dir: PathBuf::from("/app/ai-assets"),
            audio_dir: PathBuf::from("/app/tts-audio"),
        }
    }
}

/// Expands template bodies into render configurations
pub struct TemplateProcessor {
    paths: ProcessorPaths,
    probe: Arc<dyn HardwareProbe>,
}

impl TemplateProcessor {
    pub fn new(paths: ProcessorPaths, probe: Arc<dyn HardwareProbe>) -> Self {
        Self { paths, probe }
    }

    pub fn paths(&self) -> &ProcessorPaths {
        &self.paths
    }

    /// Parses `template` and builds it.
    pub async fn build_value(
        &self,
        template: &ConfigValue,
        variables: &VariableSet,
    ) -> CoreResult<RenderEngineConfig> {
        let spec = TemplateSpec::from_value(template)?;
        self.build(&spec, variables).await
    }

    /// Builds a render configuration.
    ///
    /// The hardware probe runs exactly once per call.
    pub async fn build(
        &self,
        spec: &TemplateSpec,
        variables: &VariableSet,
    ) -> CoreResult<RenderEngineConfig> {
        if spec.scenes.is_empty() {
            return Err(CoreError::InvalidTemplate(
                "Template must contain at least one scene".to_string(),
            ));
        }

        let hardware = self.probe.has_accelerated_encoder().await;
        let mut config = self.engine_settings(spec, variables, hardware);

        for (index, scene) in spec.scenes.iter().enumerate() {
            let built = self.build_scene(index, scene, variables).await;
            config.scenes.push(built);
        }

        if let Some(audio) = &spec.audio {
            config.audio = self.build_audio(audio, variables, "Template").await;
        }

        tracing::info!(
            "Template processed: {} ({} scenes, {} elements, {} encoder)",
            spec.template_id.as_deref().unwrap_or("custom"),
            config.scenes.len(),
            config.element_count(),
            config.encoder.codec
        );
        Ok(config)
    }

    // =========================================================================
    // Engine Settings
    // =========================================================================

    fn engine_settings(
        &self,
        spec: &TemplateSpec,
        variables: &VariableSet,
        hardware: bool,
    ) -> RenderEngineConfig {
        let creator = resolve(&ConfigValue::Mapping(spec.creator_config.clone()), variables);
        let positive = |key: &str, default: u32| {
            creator
                .get(key)
                .and_then(ConfigValue::as_u32)
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        let engine_options = ["engineOptions", "engine_options", "ffcreator_options"]
            .iter()
            .find_map(|k| creator.get(k).and_then(ConfigValue::as_mapping))
            .cloned()
            .unwrap_or_default();

        RenderEngineConfig {
            template_id: spec.template_id.clone(),
            cache_dir: self.paths.cache_dir.clone(),
            output_dir: self.paths.output_dir.clone(),
            width: positive("width", 1920),
            height: positive("height", 1080),
            fps: positive("fps", 30),
            debug: creator.get("debug").and_then(ConfigValue::as_bool).unwrap_or(false),
            pool: creator.get("pool").and_then(ConfigValue::as_bool).unwrap_or(true),
            parallel: positive("parallel", if hardware { 8 } else { 4 }),
            threads: positive("threads", if hardware { 12 } else { 6 }),
            high_water_mark: text_value(creator.get("highWaterMark"))
                .unwrap_or_else(|| "512kb".to_string()),
            render: creator
                .get("render")
                .cloned()
                .unwrap_or(ConfigValue::Integer(0)),
            force_canvas: creator
                .get("forceCanvas")
                .and_then(ConfigValue::as_bool)
                .unwrap_or(false),
            hardware_accelerated: hardware,
            encoder: EncoderProfile::select(hardware),
            engine_options,
            scenes: Vec::with_capacity(spec.scenes.len()),
            audio: None,
        }
    }

    // =========================================================================
    // Scenes
    // =========================================================================

    async fn build_scene(
        &self,
        index: usize,
        scene: &SceneSpec,
        variables: &VariableSet,
    ) -> RenderScene {
        let duration = match scene.duration.as_ref().map(|d| resolve(d, variables)) {
            None | Some(ConfigValue::Null) => DEFAULT_SCENE_DURATION,
            Some(value) => match value.as_f64().filter(|d| *d > 0.0) {
                Some(d) => d,
                None => {
                    tracing::warn!(
                        "Scene {} duration {} is not a positive number, using {}s",
                        index,
                        value,
                        DEFAULT_SCENE_DURATION
                    );
                    DEFAULT_SCENE_DURATION
                }
            },
        };

        let background_color = scene
            .background_color
            .as_ref()
            .and_then(|c| text_value(Some(&resolve(c, variables))));

        // The first scene has nothing to transition from.
        let transition = if index > 0 {
            scene
                .transition
                .as_ref()
                .and_then(|t| transition(&resolve(t, variables)))
        } else {
            None
        };

        let mut elements = Vec::with_capacity(scene.elements.len());
        for element in &scene.elements {
            match self.build_element(element, variables).await {
                Ok(built) => elements.push(built),
                Err(e) => tracing::warn!(
                    "Skipping {} element in scene {}: {}",
                    display_type(element),
                    index,
                    e
                ),
            }
        }

        let audio = match &scene.audio {
            Some(audio) => self.build_audio(audio, variables, "Scene").await,
            None => None,
        };

        RenderScene {
            duration,
            background_color,
            transition,
            elements,
            audio,
        }
    }

    // =========================================================================
    // Elements
    // =========================================================================

    /// Constructs one element. Errors here are element-scoped.
    pub async fn build_element(
        &self,
        element: &ElementSpec,
        variables: &VariableSet,
    ) -> CoreResult<RenderElement> {
        let kind = element
            .kind()
            .ok_or_else(|| CoreError::UnsupportedElement(display_type(element)))?;

        let props = match resolve(&ConfigValue::Mapping(element.props.clone()), variables) {
            ConfigValue::Mapping(map) => map,
            _ => ConfigMap::new(),
        };

        let mut built = match kind {
            ElementKind::Image => {
                let path = self.existing_asset(&props, "Image").await?;
                RenderElement::Image {
                    path,
                    fit: text_value(props.get("fit")).unwrap_or_else(|| "contain".to_string()),
                    placement: placement(&props, None),
                    animations: Vec::new(),
                    props: remaining(&props, &["path", "src", "x", "y", "width", "height", "fit"]),
                }
            }
            ElementKind::Text => {
                let style = props
                    .get("style")
                    .and_then(ConfigValue::as_mapping)
                    .map(text_style)
                    .unwrap_or_default();
                let font_size = style
                    .font_size
                    .or_else(|| props.get("fontSize").and_then(ConfigValue::as_f64))
                    .filter(|s| *s > 0.0)
                    .unwrap_or(DEFAULT_FONT_SIZE);
                RenderElement::Text {
                    text: text_value(props.get("text")).unwrap_or_default(),
                    font_size,
                    style,
                    placement: placement(&props, None),
                    animations: Vec::new(),
                    props: remaining(
                        &props,
                        &["text", "x", "y", "width", "height", "style", "fontSize"],
                    ),
                }
            }
            ElementKind::Rect => RenderElement::Rect {
                color: text_value(props.get("color"))
                    .or_else(|| text_value(props.get("background")))
                    .unwrap_or_else(|| "#000000".to_string()),
                placement: placement(&props, Some(100.0)),
                animations: Vec::new(),
                props: remaining(&props, &["x", "y", "width", "height", "color", "background"]),
            },
            ElementKind::Video => {
                let path = self.existing_asset(&props, "Video").await?;
                RenderElement::Video {
                    path,
                    placement: placement(&props, None),
                    animations: Vec::new(),
                    props: remaining(&props, &["path", "src", "x", "y", "width", "height"]),
                }
            }
        };

        let animations = element
            .animations
            .iter()
            .filter_map(|a| animation(&resolve(a, variables)))
            .collect();
        built.set_animations(animations);
        Ok(built)
    }

    async fn existing_asset(&self, props: &ConfigMap, label: &str) -> CoreResult<PathBuf> {
        let raw = text_value(props.get("path"))
            .or_else(|| text_value(props.get("src")))
            .ok_or_else(|| CoreError::AssetNotFound(format!("{label} path is required")))?;
        let path = resolve_asset_path(&self.paths.assets_dir, &raw);
        if !file_exists(&path).await {
            return Err(CoreError::AssetNotFound(format!(
                "{label} file not found: {}",
                path.display()
            )));
        }
        Ok(path)
    }

    // =========================================================================
    // Audio
    // =========================================================================

    async fn build_audio(
        &self,
        audio: &ConfigValue,
        variables: &VariableSet,
        scope: &str,
    ) -> Option<AudioTrack> {
        let resolved = resolve(audio, variables);
        let raw = text_value(resolved.get("path")).or_else(|| text_value(resolved.get("src")))?;

        let path = resolve_asset_path(&self.paths.audio_dir, &raw);
        if !file_exists(&path).await {
            tracing::warn!("{} audio file not found: {}", scope, path.display());
            return None;
        }

        Some(AudioTrack {
            path,
            volume: resolved
                .get("volume")
                .and_then(ConfigValue::as_f64)
                .filter(|v| *v >= 0.0)
                .unwrap_or(1.0),
            looped: resolved
                .get("loop")
                .and_then(ConfigValue::as_bool)
                .unwrap_or(false),
            start: resolved
                .get("start")
                .and_then(ConfigValue::as_f64)
                .unwrap_or(0.0),
            fade_in: resolved.get("fadeIn").and_then(ConfigValue::as_f64),
            fade_out: resolved.get("fadeOut").and_then(ConfigValue::as_f64),
        })
    }
}

// =============================================================================
// Value Helpers
// =============================================================================

/// Non-empty scalar text (numbers and booleans are stringified).
fn text_value(value: Option<&ConfigValue>) -> Option<String> {
    match value? {
        ConfigValue::Null | ConfigValue::Sequence(_) | ConfigValue::Mapping(_) => None,
        ConfigValue::String(s) if s.trim().is_empty() => None,
        other => Some(other.to_interpolated()),
    }
}

fn display_type(element: &ElementSpec) -> String {
    if element.element_type.is_empty() {
        "<untyped>".to_string()
    } else {
        element.element_type.clone()
    }
}

fn placement(props: &ConfigMap, default_size: Option<f64>) -> Placement {
    let num = |key: &str| props.get(key).and_then(ConfigValue::as_f64);
    let size = |key: &str| num(key).filter(|v| *v > 0.0).or(default_size);
    Placement {
        x: num("x").unwrap_or(0.0),
        y: num("y").unwrap_or(0.0),
        width: size("width"),
        height: size("height"),
    }
}

fn remaining(props: &ConfigMap, consumed: &[&str]) -> ConfigMap {
    props
        .iter()
        .filter(|(k, v)| !consumed.contains(&k.as_str()) && !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn text_style(style: &ConfigMap) -> TextStyle {
    let text = |key: &str| text_value(style.get(key));
    let num = |key: &str| style.get(key).and_then(ConfigValue::as_f64);
    TextStyle {
        color: text("color"),
        background_color: text("backgroundColor"),
        font_size: num("fontSize"),
        font_family: text("fontFamily"),
        font_weight: text("fontWeight"),
        text_align: text("textAlign"),
        text_shadow: text("textShadow"),
        line_height: num("lineHeight"),
        padding: text("padding"),
        border_radius: text("borderRadius"),
        extra: remaining(
            style,
            &[
                "color",
                "backgroundColor",
                "fontSize",
                "fontFamily",
                "fontWeight",
                "textAlign",
                "textShadow",
                "lineHeight",
                "padding",
                "borderRadius",
            ],
        ),
    }
}

fn animation(value: &ConfigValue) -> Option<Animation> {
    let effect = text_value(value.get("effect"))?;
    Some(Animation {
        effect,
        duration: value
            .get("duration")
            .and_then(ConfigValue::as_f64)
            .filter(|d| *d > 0.0)
            .unwrap_or(1.0),
        delay: value
            .get("delay")
            .and_then(ConfigValue::as_f64)
            .unwrap_or(0.0),
    })
}

fn transition(value: &ConfigValue) -> Option<Transition> {
    let (name, duration) = match value {
        ConfigValue::Mapping(_) => (
            text_value(value.get("type")).or_else(|| text_value(value.get("name")))?,
            value.get("duration").and_then(ConfigValue::as_f64),
        ),
        other => (text_value(Some(other))?, None),
    };
    Some(Transition {
        name,
        duration: duration.filter(|d| *d > 0.0).unwrap_or(1.0),
    })
}
