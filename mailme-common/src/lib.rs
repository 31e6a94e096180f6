//! Shared building blocks for mailme.
//!
//! - [`config`]: notification and transport configuration, environment fallbacks
//! - [`capture`]: process-wide log capture into a temporary sink
//! - [`render`]: text/HTML rendering of the notification body
//! - [`outcome`]: success/failure classification of monitored work
//! - [`logging`]: subscriber initialisation and protocol tracing macros

pub mod capture;
pub mod config;
pub mod error;
pub mod logging;
pub mod outcome;
pub mod render;

pub use error::{CaptureError, ConfigError, RenderError};
pub use outcome::Outcome;
pub use tracing;
