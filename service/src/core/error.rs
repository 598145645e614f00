//! Scenecast Error Definitions
//!
//! Defines error types used throughout the service.

use thiserror::Error;

use super::JobId;

/// Core service error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Template Errors
    // =========================================================================
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Malformed scene/element shape. Raised before the engine is touched.
    #[error("Template processing failed: {0}")]
    InvalidTemplate(String),

    #[error("Missing required variables: {}", missing.join(", "))]
    MissingVariables {
        missing: Vec<String>,
        required: Vec<String>,
    },

    /// Element or audio asset that could not be resolved on disk.
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Unsupported element type: {0}")]
    UnsupportedElement(String),

    // =========================================================================
    // Render Errors
    // =========================================================================
    /// Failure reported by the render engine, carried verbatim.
    #[error("{0}")]
    EngineFailed(String),

    #[error("Renderer unavailable: {0}")]
    RendererUnavailable(String),

    // =========================================================================
    // Job Errors
    // =========================================================================
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid job transition for {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: String,
        to: String,
    },

    #[error("Job queue is full: {0}")]
    QueueFull(String),

    #[error("No worker registered for job kind: {0}")]
    NoWorker(String),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core service result type
pub type CoreResult<T> = Result<T, CoreError>;

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_message_is_verbatim() {
        let err = CoreError::EngineFailed("encoder exited with status 1".to_string());
        assert_eq!(err.to_string(), "encoder exited with status 1");
    }

    #[test]
    fn test_missing_variables_message_lists_names() {
        let err = CoreError::MissingVariables {
            missing: vec!["tts_audio".to_string(), "duration".to_string()],
            required: vec![],
        };
        assert_eq!(
            err.to_string(),
            "Missing required variables: tts_audio, duration"
        );
    }
}
