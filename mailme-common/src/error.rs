//! Error types for the mailme-common crate.
//!
//! Configuration errors are raised eagerly when a notifier is built. Capture
//! and render errors are raised on the notification path, where the caller
//! logs them instead of letting them replace the monitored outcome.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while assembling a notification configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required value was neither provided nor found in the environment.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// No recipients were configured.
    #[error("At least one recipient address is required")]
    NoRecipients,

    /// A recipient or sender address could not be parsed.
    #[error("Invalid email address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// A value was present but unusable.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// The configuration file could not be read.
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised by the log capture adapter.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Another scope in this process already owns the capture sink.
    #[error("A log capture is already active in this process")]
    AlreadyActive,

    /// The temporary sink could not be created, written or read.
    #[error("Log capture I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Creating the temporary file failed before it had a path.
    #[error("Failed to create temporary log file: {0}")]
    Create(#[source] io::Error),
}

impl CaptureError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while rendering a notification body.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The template references a placeholder with invalid syntax.
    #[error("Malformed placeholder at byte {position} in {template} template")]
    MalformedPlaceholder {
        template: &'static str,
        position: usize,
    },

    /// A custom renderer failed.
    #[error("Failed to render template: {0}")]
    Custom(String),
}
