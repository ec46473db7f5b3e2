//! Core error types for bloom-core.
//!
//! This module defines the error hierarchy using thiserror. Remote-store
//! failures live in [`crate::gateway::GatewayError`] and queue failures in
//! [`crate::sync::QueueError`]; both fold into [`CoreError`].

use std::path::PathBuf;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::sync::QueueError;

/// Core error type for bloom-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed engagement input, recovered defensively by the caller
    #[error("Computation error: {0}")]
    Computation(#[from] ComputationError),

    /// Remote store errors (transient or permanent)
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Offline queue errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Errors raised while turning raw engagement input into streak metrics.
#[derive(Error, Debug)]
pub enum ComputationError {
    /// Engagement timestamp resolves to a local day after the reference day
    #[error("Engagement day {day} is in the future (as of {as_of})")]
    FutureEngagement {
        day: chrono::NaiveDate,
        as_of: chrono::NaiveDate,
    },

    /// Timestamp could not be mapped to a local calendar day
    #[error("Invalid engagement timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CoreError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        CoreError::Custom(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
