//! Render request payloads.
//!
//! Submissions arrive from an untrusted caller. This module provides:
//! - One typed request variant per job kind (serde `deny_unknown_fields`)
//! - Size limits to mitigate JSON payload DoS
//! - Normalization of every variant into a template plus variables

use serde::{Deserialize, Serialize};

use super::JobKind;
use crate::core::fs::validate_path_id_component;
use crate::core::template::{
    custom_mobile_template, normalize_raw_config, ConfigValue, CustomTemplateParams,
    TemplateCatalog, TemplateSpec, VariableSet,
};
use crate::core::{CoreError, CoreResult, JobId};

const MAX_REQUEST_PAYLOAD_BYTES: usize = 1024 * 1024; // 1MiB

fn enforce_payload_limits(value: &serde_json::Value) -> Result<(), String> {
    if !value.is_object() {
        return Err("Render request must be a JSON object".to_string());
    }
    let size = serde_json::to_vec(value)
        .map(|b| b.len())
        .map_err(|e| format!("Failed to serialize payload for size check: {e}"))?;
    if size > MAX_REQUEST_PAYLOAD_BYTES {
        return Err(format!(
            "Render request too large ({} bytes > {} bytes)",
            size, MAX_REQUEST_PAYLOAD_BYTES
        ));
    }
    Ok(())
}

fn validate_id(label: &str, id: &str) -> Result<(), String> {
    validate_path_id_component(id, label)?;
    if id.len() > 128 {
        return Err(format!("{label} is too long (max 128 chars)"));
    }
    Ok(())
}

// =============================================================================
// Requests
// =============================================================================

/// A render request, one variant per job kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum RenderRequest {
    /// Free-form workflow config
    #[serde(rename_all = "camelCase")]
    RawConfig { config: ConfigValue },

    /// Catalog template by id
    #[serde(rename_all = "camelCase")]
    TemplateById {
        template_id: String,
        #[serde(default)]
        variables: VariableSet,
    },

    /// Catalog template picked for a platform
    #[serde(rename_all = "camelCase")]
    PlatformTemplate {
        platform: String,
        #[serde(default)]
        variables: VariableSet,
    },

    /// Caller-supplied template body, or builder parameters for one
    #[serde(rename_all = "camelCase")]
    CustomTemplate {
        #[serde(default)]
        template_config: Option<ConfigValue>,
        #[serde(default)]
        params: Option<CustomTemplateParams>,
        #[serde(default)]
        variables: VariableSet,
    },
}

impl RenderRequest {
    /// Parses a stored request payload.
    pub fn from_json(value: &serde_json::Value) -> CoreResult<Self> {
        enforce_payload_limits(value).map_err(CoreError::InvalidPayload)?;
        serde_json::from_value(value.clone()).map_err(|e| CoreError::InvalidPayload(e.to_string()))
    }

    pub fn to_json(&self) -> CoreResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn kind(&self) -> JobKind {
        match self {
            RenderRequest::RawConfig { .. } => JobKind::RawConfig,
            RenderRequest::TemplateById { .. } => JobKind::TemplateById,
            RenderRequest::PlatformTemplate { .. } => JobKind::PlatformTemplate,
            RenderRequest::CustomTemplate { .. } => JobKind::CustomTemplate,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        let json = self.to_json()?;
        enforce_payload_limits(&json).map_err(CoreError::InvalidPayload)?;

        match self {
            RenderRequest::RawConfig { config } => {
                if config.as_mapping().is_none() {
                    return Err(CoreError::InvalidPayload(
                        "config must be an object".to_string(),
                    ));
                }
            }
            RenderRequest::TemplateById { template_id, .. } => {
                validate_id("templateId", template_id).map_err(CoreError::InvalidPayload)?;
            }
            RenderRequest::PlatformTemplate { platform, .. } => {
                validate_id("platform", platform).map_err(CoreError::InvalidPayload)?;
            }
            RenderRequest::CustomTemplate {
                template_config,
                params,
                ..
            } => match (template_config, params) {
                (Some(_), Some(_)) => {
                    return Err(CoreError::InvalidPayload(
                        "templateConfig and params are mutually exclusive".to_string(),
                    ))
                }
                (None, None) => {
                    return Err(CoreError::InvalidPayload(
                        "templateConfig or params is required".to_string(),
                    ))
                }
                _ => {}
            },
        }
        Ok(())
    }

    /// Output file name used when the caller does not supply one
    pub fn default_output_name(&self, job_id: &JobId) -> String {
        match self {
            RenderRequest::RawConfig { .. } => format!("video_{job_id}.mp4"),
            RenderRequest::TemplateById { template_id, .. } => {
                format!("template_{}_{job_id}.mp4", template_id.trim())
            }
            RenderRequest::PlatformTemplate { platform, .. } => {
                format!("platform_{}_{job_id}.mp4", platform.trim().to_lowercase())
            }
            RenderRequest::CustomTemplate { .. } => format!("custom_template_{job_id}.mp4"),
        }
    }

    /// Normalizes the request into the shared template shape.
    ///
    /// Every kind ends up as a `TemplateSpec` plus the variables used to
    /// resolve it; structural problems surface here as `InvalidTemplate`.
    pub fn normalize(&self, catalog: &TemplateCatalog) -> CoreResult<(TemplateSpec, VariableSet)> {
        match self {
            RenderRequest::RawConfig { config } => {
                Ok((normalize_raw_config(config)?, VariableSet::new()))
            }
            RenderRequest::TemplateById {
                template_id,
                variables,
            } => Ok((
                catalog.get(template_id.trim())?.spec.clone(),
                with_default_duration(variables),
            )),
            RenderRequest::PlatformTemplate {
                platform,
                variables,
            } => Ok((
                catalog.for_platform(platform)?.spec.clone(),
                with_default_duration(variables),
            )),
            RenderRequest::CustomTemplate {
                template_config,
                params,
                variables,
            } => {
                let spec = match (template_config, params) {
                    (Some(config), _) => TemplateSpec::from_value(config)?,
                    (None, Some(params)) => custom_mobile_template(params)?,
                    (None, None) => {
                        return Err(CoreError::InvalidPayload(
                            "templateConfig or params is required".to_string(),
                        ))
                    }
                };
                Ok((spec, variables.clone()))
            }
        }
    }
}

/// Catalog requests render the main scene for this many seconds unless the
/// caller sets `duration`.
pub const DEFAULT_TEMPLATE_DURATION: i64 = 10;

/// Copies `variables`, filling in `duration` when it is absent or null.
pub fn with_default_duration(variables: &VariableSet) -> VariableSet {
    let mut variables = variables.clone();
    let missing = variables.get("duration").is_none_or(ConfigValue::is_null);
    if missing {
        variables.insert(
            "duration".to_string(),
            ConfigValue::Integer(DEFAULT_TEMPLATE_DURATION),
        );
    }
    variables
}

// =============================================================================
// Queue Payload
// =============================================================================

/// What a worker receives for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub job_id: JobId,
    pub output_name: String,
    pub request: RenderRequest,
}
