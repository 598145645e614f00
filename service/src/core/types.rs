//! Scenecast Core Type Definitions
//!
//! Defines fundamental types used throughout the service.

// =============================================================================
// ID Types
// =============================================================================

/// Job unique identifier (UUID v4, matches the persisted primary key)
pub type JobId = String;

/// Queue entry reference (ULID, sortable by enqueue time)
pub type QueueRef = String;

/// Catalog template identifier
pub type TemplateId = String;

/// Creates a fresh job identifier
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

/// Creates a fresh queue reference
pub fn new_queue_ref() -> QueueRef {
    ulid::Ulid::new().to_string()
}

// =============================================================================
// Time Types
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;
