//! Template Models
//!
//! Declarative template shapes. A template is parsed from a `ConfigValue` tree
//! (catalog entry or caller-supplied body) with structural validation; leaf
//! values stay unresolved `ConfigValue`s until the processor runs.

use serde::{Deserialize, Serialize};

use super::value::{ConfigMap, ConfigValue};
use crate::core::{CoreError, CoreResult};

// =============================================================================
// Metadata
// =============================================================================

/// Descriptive catalog metadata for a template
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    pub name: String,
    pub description: String,
    pub aspect_ratio: String,
    pub resolution: String,
    pub duration: String,
    pub platforms: Vec<String>,
    pub features: Vec<String>,
}

/// Listing entry returned by the catalog
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    pub id: String,
    #[serde(flatten)]
    pub metadata: TemplateMetadata,
    pub required_variables: Vec<String>,
}

// =============================================================================
// Element Kind
// =============================================================================

/// Visual primitive kinds understood by the processor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Image,
    Text,
    Rect,
    Video,
}

impl ElementKind {
    /// Maps a declared element type (including legacy aliases) to a kind.
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name.trim() {
            "image" | "FFImage" | "background_image" | "comfyui_image" => Some(Self::Image),
            "text" | "FFText" | "subtitle_text" | "title_text" => Some(Self::Text),
            "rect" | "FFRect" | "rectangle" => Some(Self::Rect),
            "video" | "FFVideo" => Some(Self::Video),
            _ => None,
        }
    }
}

// =============================================================================
// Specs
// =============================================================================

/// One declared element: type name, raw props and raw animations
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default)]
    pub props: ConfigMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub animations: Vec<ConfigValue>,
}

impl ElementSpec {
    /// Lenient parse; a malformed element keeps an empty type and is later
    /// rejected by the processor as unsupported.
    fn from_value(value: &ConfigValue) -> Self {
        let element_type = value
            .get("type")
            .map(ConfigValue::to_interpolated)
            .unwrap_or_default();
        let props = value
            .get("props")
            .and_then(ConfigValue::as_mapping)
            .cloned()
            .unwrap_or_default();
        let animations = match value.get("animations") {
            Some(ConfigValue::Sequence(items)) => items.clone(),
            Some(single) => vec![single.clone()],
            None => Vec::new(),
        };
        Self {
            element_type,
            props,
            animations,
        }
    }

    pub fn kind(&self) -> Option<ElementKind> {
        ElementKind::from_type_name(&self.element_type)
    }
}

/// One declared scene
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<ConfigValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<ConfigValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<ConfigValue>,
    #[serde(default)]
    pub elements: Vec<ElementSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<ConfigValue>,
}

/// A complete declarative template body
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default)]
    pub creator_config: ConfigMap,
    pub scenes: Vec<SceneSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<ConfigValue>,
}

impl TemplateSpec {
    /// Parses and structurally validates a template body.
    ///
    /// Accepts both `snake_case` and `camelCase` keys for the template-level
    /// and scene-level fields.
    pub fn from_value(value: &ConfigValue) -> CoreResult<Self> {
        let root = value.as_mapping().ok_or_else(|| {
            CoreError::InvalidTemplate("Template configuration must be an object".to_string())
        })?;

        let scenes = match root.get("scenes") {
            Some(ConfigValue::Sequence(items)) => items,
            _ => {
                return Err(CoreError::InvalidTemplate(
                    "Template must contain scenes array".to_string(),
                ))
            }
        };
        if scenes.is_empty() {
            return Err(CoreError::InvalidTemplate(
                "Template must contain at least one scene".to_string(),
            ));
        }

        let scenes = scenes
            .iter()
            .enumerate()
            .map(|(index, scene)| SceneSpec::from_value(index, scene))
            .collect::<CoreResult<Vec<_>>>()?;

        let creator_config = lookup(value, &["creator_config", "creatorConfig"])
            .and_then(ConfigValue::as_mapping)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            template_id: lookup(value, &["template_id", "templateId"])
                .and_then(ConfigValue::as_str)
                .map(str::to_string),
            creator_config,
            scenes,
            audio: value.get("audio").cloned(),
        })
    }

    /// Converts the template back into a value tree (catalog bodies, CLI output).
    pub fn to_value(&self) -> CoreResult<ConfigValue> {
        Ok(ConfigValue::from(serde_json::to_value(self)?))
    }
}

impl SceneSpec {
    fn from_value(index: usize, value: &ConfigValue) -> CoreResult<Self> {
        if value.as_mapping().is_none() {
            return Err(CoreError::InvalidTemplate(format!(
                "Scene {index} must be an object"
            )));
        }

        let elements = match value.get("elements") {
            None => Vec::new(),
            Some(ConfigValue::Sequence(items)) => items.iter().map(ElementSpec::from_value).collect(),
            Some(_) => {
                return Err(CoreError::InvalidTemplate(format!(
                    "Scene {index} elements must be an array"
                )))
            }
        };

        Ok(Self {
            label: value.get("type").and_then(ConfigValue::as_str).map(str::to_string),
            duration: value.get("duration").cloned(),
            background_color: lookup(value, &["background_color", "backgroundColor"]).cloned(),
            transition: value.get("transition").cloned(),
            elements,
            audio: value.get("audio").cloned(),
        })
    }
}

fn lookup<'a>(value: &'a ConfigValue, keys: &[&str]) -> Option<&'a ConfigValue> {
    keys.iter().find_map(|k| value.get(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> CoreResult<TemplateSpec> {
        TemplateSpec::from_value(&ConfigValue::from(v))
    }

    fn message(result: CoreResult<TemplateSpec>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn test_element_kind_aliases() {
        assert_eq!(ElementKind::from_type_name("FFImage"), Some(ElementKind::Image));
        assert_eq!(ElementKind::from_type_name("comfyui_image"), Some(ElementKind::Image));
        assert_eq!(ElementKind::from_type_name("title_text"), Some(ElementKind::Text));
        assert_eq!(ElementKind::from_type_name("rectangle"), Some(ElementKind::Rect));
        assert_eq!(ElementKind::from_type_name("FFVideo"), Some(ElementKind::Video));
        assert_eq!(ElementKind::from_type_name("FFSvg"), None);
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(
            message(parse(json!([]))),
            "Template processing failed: Template configuration must be an object"
        );
        assert_eq!(
            message(parse(json!({"scenes": {}}))),
            "Template processing failed: Template must contain scenes array"
        );
        assert_eq!(
            message(parse(json!({"scenes": []}))),
            "Template processing failed: Template must contain at least one scene"
        );
        assert_eq!(
            message(parse(json!({"scenes": [{}, 3]}))),
            "Template processing failed: Scene 1 must be an object"
        );
        assert_eq!(
            message(parse(json!({"scenes": [{"elements": {"type": "FFText"}}]}))),
            "Template processing failed: Scene 0 elements must be an array"
        );
    }

    #[test]
    fn test_parse_accepts_both_key_styles() {
        let spec = parse(json!({
            "template_id": "demo",
            "creatorConfig": {"width": 1080},
            "scenes": [
                {"duration": "{{duration}}", "background_color": "#000000"},
                {"backgroundColor": "#111111"}
            ]
        }))
        .unwrap();
        assert_eq!(spec.template_id.as_deref(), Some("demo"));
        assert_eq!(spec.creator_config.get("width"), Some(&ConfigValue::Integer(1080)));
        assert_eq!(spec.scenes[0].background_color, Some(ConfigValue::from("#000000")));
        assert_eq!(spec.scenes[1].background_color, Some(ConfigValue::from("#111111")));
    }

    #[test]
    fn test_single_animation_is_wrapped() {
        let spec = parse(json!({
            "scenes": [{"elements": [
                {"type": "FFText", "props": {"text": "x"}, "animations": {"effect": "fadeIn"}},
                "not an element"
            ]}]
        }))
        .unwrap();
        let elements = &spec.scenes[0].elements;
        assert_eq!(elements[0].animations.len(), 1);
        assert_eq!(elements[1].element_type, "");
        assert_eq!(elements[1].kind(), None);
    }

    #[test]
    fn test_to_value_round_trips_through_parse() {
        let spec = parse(json!({
            "scenes": [{"duration": 5, "elements": [{"type": "rect", "props": {"x": 1}}]}]
        }))
        .unwrap();
        let reparsed = TemplateSpec::from_value(&spec.to_value().unwrap()).unwrap();
        assert_eq!(reparsed, spec);
    }
}
