//! Error types for telemetry streaming.
//!
//! This module provides the single error type used across pitlane. All errors
//! implement `std::error::Error` and carry enough structured context to decide
//! whether an operation can be retried.
//!
//! ## Error Categories
//!
//! - **Service Errors**: A broker-side service refused or failed an operation
//! - **Parse Errors**: Open data protocol bytes could not be decoded
//! - **Record Errors**: A decoded record is internally inconsistent
//! - **Lookup Errors**: Parameter lists could not be resolved for a data format
//! - **Configuration Errors**: Invalid settings or unreadable configuration files
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use pitlane::TelemetryError;
//!
//! let error = TelemetryError::service_failed("session management", "create_session", "broker unavailable");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```
//!
//! ## Per-record errors
//!
//! [`TelemetryError::MalformedRecord`] and [`TelemetryError::ParameterLookup`]
//! describe a single received packet. Readers log them and move on to the next
//! packet; they never end a stream.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for telemetry operations.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Main error type for telemetry operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("Failed to connect to broker: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{service} service failed during {operation}: {reason}")]
    Service { service: String, operation: String, reason: String },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Malformed record: {parameters} parameters for {columns} columns")]
    MalformedRecord { parameters: usize, columns: usize },

    #[error("Parameter lookup failed for data format {data_format_id} on '{data_source}': {reason}")]
    ParameterLookup { data_source: String, data_format_id: u64, reason: String },

    #[error("Session '{session_key}' not found")]
    SessionNotFound { session_key: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Configuration file error: {path}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl TelemetryError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TelemetryError::Connection { .. } => true,
            TelemetryError::Service { .. } => true,
            TelemetryError::Timeout { .. } => true,
            TelemetryError::ParameterLookup { .. } => true,
            TelemetryError::Parse { .. } => false,
            TelemetryError::MalformedRecord { .. } => false,
            TelemetryError::SessionNotFound { .. } => false,
            TelemetryError::Config { .. } => false,
            TelemetryError::ConfigFile { .. } => false,
        }
    }

    /// Returns whether this error concerns a single received record only.
    ///
    /// Record-scoped errors are logged by readers and never stop a stream.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            TelemetryError::Parse { .. }
                | TelemetryError::MalformedRecord { .. }
                | TelemetryError::ParameterLookup { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            TelemetryError::Connection { .. } => vec![
                "Ensure the broker is running and reachable",
                "Check the configured broker URL",
                "Verify network permissions",
            ],
            TelemetryError::Service { .. } => vec![
                "Retry the operation",
                "Check broker logs for the rejected request",
                "Verify the service was created against the right broker",
            ],
            TelemetryError::Parse { .. } => vec![
                "Check the producer uses a compatible open data protocol version",
                "Verify source data integrity",
            ],
            TelemetryError::MalformedRecord { .. } => vec![
                "Check the data format registered for this record",
                "Verify the producer writes one column per parameter",
            ],
            TelemetryError::ParameterLookup { .. } => vec![
                "Verify the data format id was registered on this data source",
                "Retry once the data format management service is available",
            ],
            TelemetryError::SessionNotFound { .. } => vec![
                "List available sessions before selecting one",
                "Check the session key spelling",
            ],
            TelemetryError::Config { .. } => vec![
                "Check configuration values against the documented ranges",
                "Start from the default configuration",
            ],
            TelemetryError::ConfigFile { .. } => vec![
                "Check the configuration file exists and is readable",
                "Validate the YAML syntax",
            ],
            TelemetryError::Timeout { .. } => vec![
                "Increase timeout duration",
                "Check broker responsiveness",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        TelemetryError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        TelemetryError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for service failures.
    pub fn service_failed(
        service: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        TelemetryError::Service {
            service: service.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Helper constructor for decode failures.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        TelemetryError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for invalid configuration values.
    pub fn config(reason: impl Into<String>) -> Self {
        TelemetryError::Config { reason: reason.into() }
    }

    /// Helper constructor for configuration file errors with path context.
    pub fn config_file(path: PathBuf, source: Box<dyn std::error::Error + Send + Sync>) -> Self {
        TelemetryError::ConfigFile { path, source }
    }
}
