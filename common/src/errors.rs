// Error handling framework for the monitoring core

use thiserror::Error;

/// Errors raised while resolving, initialising or polling monitored devices
#[derive(Error, Debug)]
pub enum MonitoringError {
    #[error("Failed to resolve registration '{key}': {reason}")]
    ResolutionFailed { key: String, reason: String },

    #[error("Resource setup failed for device {device_id}: {reason}")]
    SetupFailed { device_id: String, reason: String },

    #[error("Endpoint update failed for device {device_id}: {reason}")]
    EndpointUpdateFailed { device_id: String, reason: String },

    #[error("Poll callback panicked for device {0}")]
    CallbackPanicked(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Monitoring scheduler already started")]
    AlreadyStarted,
}

impl MonitoringError {
    /// Short label used as a metrics dimension
    pub fn kind(&self) -> &'static str {
        match self {
            MonitoringError::ResolutionFailed { .. } => "resolution",
            MonitoringError::SetupFailed { .. } => "setup",
            MonitoringError::EndpointUpdateFailed { .. } => "endpoint_update",
            MonitoringError::CallbackPanicked(_) => "panic",
            MonitoringError::DeviceNotFound(_) => "device_not_found",
            MonitoringError::AlreadyStarted => "already_started",
        }
    }
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}
