//! Classification of how a monitored unit of work ended.

use std::{any::Any, fmt};

use serde::{Deserialize, Serialize};

/// Type name recorded for scopes that were dropped before being closed.
pub const CANCELLED: &str = "Cancelled";

/// Type name recorded for work that panicked.
pub const PANIC: &str = "Panic";

/// How the monitored work exited.
///
/// Captured once when the scope closes and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The work returned normally.
    Success,
    /// The work returned an error, panicked or was cancelled.
    Failure {
        /// The error's display text.
        message: String,
        /// The error's type name, or [`PANIC`] / [`CANCELLED`].
        type_name: String,
    },
}

impl Outcome {
    /// Builds a failure outcome from any displayable error, recording its type name.
    #[must_use]
    pub fn failure<E: fmt::Display + ?Sized>(error: &E) -> Self {
        Self::Failure {
            message: error.to_string(),
            type_name: short_type_name::<E>(),
        }
    }

    /// Classifies a `Result` without consuming it.
    #[must_use]
    pub fn from_result<T, E: fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(error) => Self::failure(error),
        }
    }

    /// Builds a failure outcome from a panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with a non-string payload".to_string());

        Self::Failure {
            message,
            type_name: PANIC.to_string(),
        }
    }

    /// Outcome recorded when a scope is dropped without an explicit close.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::Failure {
            message: "monitored work was cancelled before it completed".to_string(),
            type_name: CANCELLED.to_string(),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// The error message, if this is a failure.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failure { message, .. } => Some(message),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure { message, type_name } => write!(f, "failure ({type_name}): {message}"),
        }
    }
}

/// `std::any::type_name` without the module path, keeping generic arguments intact.
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let (base, generics) = full.split_at(full.find('<').unwrap_or(full.len()));
    let short = base.rsplit("::").next().unwrap_or(base);
    format!("{short}{generics}")
}
