//! Minimal SMTP submission client used by mailme to deliver notifications.

pub mod client;
