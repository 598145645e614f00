//! Raw Config Normalization
//!
//! Free-form workflow configs (`width`, `height`, `fps`, `background`,
//! `scenes[].elements[]`, `audio`) are rewritten into the template shape so
//! they go through the same processor as catalog templates.
//!
//! Element kinds:
//! - `comfyui_image`: full-frame image with an optional single animation
//! - `subtitle`: centered caption near the bottom that fades in and out
//!
//! Anything else is passed through for the processor to interpret.

use super::models::TemplateSpec;
use super::value::{ConfigMap, ConfigValue};
use crate::core::CoreResult;

const RAW_TRANSITION: &str = "GridFlip";

/// Normalizes a raw config into a template.
pub fn normalize_raw_config(raw: &ConfigValue) -> CoreResult<TemplateSpec> {
    let width = truthy_number(raw.get("width")).unwrap_or(1920.0);
    let height = truthy_number(raw.get("height")).unwrap_or(1080.0);
    let fps = truthy_number(raw.get("fps")).unwrap_or(30.0);
    let background = raw
        .get("background")
        .filter(|v| v.is_present())
        .cloned()
        .unwrap_or_else(|| ConfigValue::from("#000000"));

    let frame = Frame { width, height };

    let scenes = match raw.get("scenes") {
        Some(ConfigValue::Sequence(items)) => ConfigValue::Sequence(
            items
                .iter()
                .enumerate()
                .map(|(index, scene)| normalize_scene(index, scene, &background, &frame))
                .collect(),
        ),
        // Let structural validation report the problem.
        Some(other) => other.clone(),
        None => ConfigValue::Null,
    };

    let mut template = ConfigMap::new();
    template.insert(
        "creator_config".to_string(),
        ConfigValue::mapping([
            ("width", ConfigValue::Float(width)),
            ("height", ConfigValue::Float(height)),
            ("fps", ConfigValue::Float(fps)),
        ]),
    );
    template.insert("scenes".to_string(), scenes);
    if let Some(audio) = raw.get("audio").and_then(normalize_audio) {
        template.insert("audio".to_string(), audio);
    }

    TemplateSpec::from_value(&ConfigValue::Mapping(template))
}

struct Frame {
    width: f64,
    height: f64,
}

fn normalize_scene(
    index: usize,
    scene: &ConfigValue,
    background: &ConfigValue,
    frame: &Frame,
) -> ConfigValue {
    if scene.as_mapping().is_none() {
        return scene.clone();
    }

    let mut out = ConfigMap::new();
    out.insert("background_color".to_string(), background.clone());
    out.insert(
        "duration".to_string(),
        scene
            .get("duration")
            .filter(|v| v.is_present())
            .cloned()
            .unwrap_or(ConfigValue::Float(5.0)),
    );
    if index > 0 {
        out.insert(
            "transition".to_string(),
            ConfigValue::mapping([
                ("type", ConfigValue::from(RAW_TRANSITION)),
                ("duration", ConfigValue::Float(1.0)),
            ]),
        );
    }

    let elements = match scene.get("elements") {
        Some(ConfigValue::Sequence(items)) => ConfigValue::Sequence(
            items.iter().map(|e| normalize_element(e, frame)).collect(),
        ),
        Some(other) => other.clone(),
        None => ConfigValue::Sequence(Vec::new()),
    };
    out.insert("elements".to_string(), elements);

    ConfigValue::Mapping(out)
}

fn normalize_element(element: &ConfigValue, frame: &Frame) -> ConfigValue {
    match element.get("type").and_then(ConfigValue::as_str) {
        Some("comfyui_image") => image_element(element, frame),
        Some("subtitle") => subtitle_element(element, frame),
        _ => element.clone(),
    }
}

fn image_element(element: &ConfigValue, frame: &Frame) -> ConfigValue {
    let mut props = ConfigMap::new();
    if let Some(src) = element.get("src") {
        props.insert("path".to_string(), src.clone());
    }
    props.insert("x".to_string(), number_or(element.get("x"), 0.0));
    props.insert("y".to_string(), number_or(element.get("y"), 0.0));
    props.insert("width".to_string(), number_or(element.get("width"), frame.width));
    props.insert("height".to_string(), number_or(element.get("height"), frame.height));

    let mut animations = Vec::new();
    if let Some(effect) = element.get("animation").filter(|v| v.is_present()) {
        animations.push(ConfigValue::mapping([
            ("effect", effect.clone()),
            ("duration", number_or(element.get("duration"), 2.0)),
            ("delay", number_or(element.get("delay"), 0.0)),
        ]));
    }

    ConfigValue::mapping([
        ("type", ConfigValue::from("image")),
        ("props", ConfigValue::Mapping(props)),
        ("animations", ConfigValue::Sequence(animations)),
    ])
}

fn subtitle_element(element: &ConfigValue, frame: &Frame) -> ConfigValue {
    let style_value = |key: &str, default: ConfigValue| {
        element
            .get("style")
            .and_then(|s| s.get(key))
            .filter(|v| v.is_present())
            .cloned()
            .unwrap_or(default)
    };

    let style = ConfigValue::mapping([
        ("fontSize", style_value("fontSize", ConfigValue::Integer(36))),
        ("color", style_value("color", ConfigValue::from("#FFFFFF"))),
        (
            "backgroundColor",
            style_value("backgroundColor", ConfigValue::from("rgba(0,0,0,0.8)")),
        ),
        ("fontFamily", style_value("fontFamily", ConfigValue::from("Arial Bold"))),
    ]);

    let delay = truthy_number(element.get("delay")).unwrap_or(0.0);
    let duration = truthy_number(element.get("duration")).unwrap_or(5.0);

    ConfigValue::mapping([
        ("type", ConfigValue::from("text")),
        (
            "props",
            ConfigValue::mapping([
                (
                    "text",
                    element.get("text").cloned().unwrap_or(ConfigValue::Null),
                ),
                ("x", number_or(element.get("x"), frame.width / 2.0)),
                ("y", number_or(element.get("y"), frame.height - 100.0)),
                ("anchor", ConfigValue::Float(0.5)),
                ("style", style),
            ]),
        ),
        (
            "animations",
            ConfigValue::Sequence(vec![
                fade("fadeIn", delay),
                fade("fadeOut", duration - 0.5),
            ]),
        ),
    ])
}

fn fade(effect: &str, delay: f64) -> ConfigValue {
    ConfigValue::mapping([
        ("effect", ConfigValue::from(effect)),
        ("duration", ConfigValue::Float(0.5)),
        ("delay", ConfigValue::Float(delay)),
    ])
}

fn normalize_audio(audio: &ConfigValue) -> Option<ConfigValue> {
    let src = audio.get("src").filter(|v| v.is_present())?;
    Some(ConfigValue::mapping([
        ("path", src.clone()),
        ("volume", number_or(audio.get("volume"), 1.0)),
        ("fadeIn", ConfigValue::Float(0.5)),
        ("fadeOut", ConfigValue::Float(0.5)),
    ]))
}

/// Numeric value unless absent or zero
fn truthy_number(value: Option<&ConfigValue>) -> Option<f64> {
    value.and_then(ConfigValue::as_f64).filter(|v| *v != 0.0)
}

fn number_or(value: Option<&ConfigValue>, default: f64) -> ConfigValue {
    ConfigValue::Float(truthy_number(value).unwrap_or(default))
}
