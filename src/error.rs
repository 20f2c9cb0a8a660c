//! Custom error types for the application.
//!
//! This module defines the primary error type, `ScanError`, shared by every
//! layer of the survey system. Using the `thiserror` crate, it gives plan
//! validation, hardware control and persistence one consistent error surface.
//!
//! ## Error Hierarchy
//!
//! - **`Validation`**: Malformed plan parameters (bandwidth above the receiver
//!   ceiling, unknown body or object name, zero step). Raised at submission
//!   time, before anything is queued.
//! - **`Hardware`**: An individual pointing or acquisition call failed. The run
//!   that hit it stops, persists what it already collected, and reports this.
//! - **`Persistence`**: Writing the observation table or an artifact failed.
//! - **`Config`**: Wraps errors from `figment` while loading settings.
//! - **`Io`**: Wraps standard `std::io::Error`.
//!
//! Skipping a target below the horizon, an empty result set and cancellation
//! are deliberately absent here: they are normal outcomes, logged and reported
//! through `SurveyOutcome` rather than raised.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid plan: {0}")]
    Validation(String),

    #[error("Hardware command failed: {0}")]
    Hardware(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Scheduler is shut down")]
    Shutdown,
}

impl ScanError {
    /// Wraps a driver error with the operation that produced it.
    pub fn hardware(context: &str, err: anyhow::Error) -> Self {
        ScanError::Hardware(format!("{context}: {err:#}"))
    }
}

impl From<bincode::Error> for ScanError {
    fn from(err: bincode::Error) -> Self {
        ScanError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::Validation("bandwidth must be <5e6".to_string());
        assert_eq!(err.to_string(), "Invalid plan: bandwidth must be <5e6");
    }

    #[test]
    fn test_hardware_error_keeps_context() {
        let err = ScanError::hardware("point(10, 20)", anyhow::anyhow!("mount timeout"));
        assert!(err.to_string().contains("point(10, 20)"));
        assert!(err.to_string().contains("mount timeout"));
    }
}
