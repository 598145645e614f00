//! Template System
//!
//! Declarative scene templates and their expansion into render configs.
//!
//! # Modules
//!
//! - `value`: Tagged config value tree
//! - `resolver`: `{{name}}` token substitution and required-variable checks
//! - `models`: Template, scene and element specs with structural validation
//! - `catalog`: Built-in mobile templates and platform mapping
//! - `raw`: Raw workflow config normalization
//! - `processor`: Template to `RenderEngineConfig` expansion

pub mod catalog;
pub mod models;
pub mod processor;
pub mod raw;
pub mod resolver;
pub mod value;

pub use catalog::{
    custom_mobile_template, platform_template_id, required_variables, CatalogTemplate,
    CustomTemplateParams, TemplateCatalog, DEFAULT_TEMPLATE_ID,
};
pub use models::{
    ElementKind, ElementSpec, SceneSpec, TemplateMetadata, TemplateSpec, TemplateSummary,
};
pub use processor::{ProcessorPaths, TemplateProcessor};
pub use raw::normalize_raw_config;
pub use resolver::{referenced_tokens, resolve, resolve_str, validate, ValidationReport, VariableSet};
pub use value::{ConfigMap, ConfigValue};
