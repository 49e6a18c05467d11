//! Unified error handling for tpfan
//!
//! This crate provides a single error type used across all tpfan components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using TpfanError
pub type Result<T> = std::result::Result<T, TpfanError>;

/// Unified error type for all tpfan operations
#[derive(thiserror::Error, Debug)]
pub enum TpfanError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Configuration and Profile Errors
    // ============================================================================
    /// Out-of-range option, unknown backend or malformed trigger value.
    /// Fatal at startup.
    #[error("Invalid configuration value for {field}: {reason}")]
    ConfigInvalid {
        field: String,
        reason: String,
    },

    #[error("Failed to parse line {line:?}: {reason}")]
    ConfigParse {
        line: String,
        reason: String,
    },

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Profile unavailable: {0}")]
    ProfileUnavailable(String),

    #[error("Profile is not overridden; set override_profile first")]
    ProfileNotOverridden,

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Sensor unavailable at {path}: {reason}")]
    SensorUnavailable {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to read fan state from {path}: {reason}")]
    FanStateRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write fan command to {path}: {reason}")]
    ActuatorWrite {
        path: PathBuf,
        reason: String,
    },

    #[error("System not suitable for fan control: {0}")]
    UnsupportedSystem(String),

    // ============================================================================
    // IPC Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl TpfanError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config validation error
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a per-line parse error
    pub fn config_parse(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigParse {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Create a sensor read error
    pub fn sensor_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::SensorUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error must stop the daemon before it enters the poll loop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid { .. } | Self::UnsupportedSystem(_) | Self::FileWrite { .. }
        )
    }
}

// Allow converting from String to TpfanError
impl From<String> for TpfanError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to TpfanError
impl From<&str> for TpfanError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
