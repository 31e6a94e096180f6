use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// A fully formed message ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Envelope sender (`MAIL FROM`).
    pub sender: String,
    /// Envelope recipients (`RCPT TO`), never empty.
    pub recipients: Vec<String>,
    /// The complete MIME message, headers included.
    pub data: String,
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason")]
pub enum AttemptResult {
    Sent,
    /// Failed, and the policy may try again.
    TransientFailure(String),
    /// Failed in a way another attempt cannot fix.
    FatalFailure(String),
}

impl AttemptResult {
    pub(crate) fn from_error(error: &DeliveryError) -> Self {
        if error.is_temporary() {
            Self::TransientFailure(error.to_string())
        } else {
            Self::FatalFailure(error.to_string())
        }
    }
}

/// Record of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// 1-based attempt number.
    pub index: u32,
    pub result: AttemptResult,
    pub elapsed: Duration,
}

/// Everything the delivery policy did for one message.
#[derive(Debug)]
pub struct DeliveryReport {
    pub attempts: Vec<DeliveryAttempt>,
    pub result: Result<(), DeliveryError>,
}

impl DeliveryReport {
    /// A report for a message that was never handed to a transport.
    #[must_use]
    pub const fn not_attempted(error: DeliveryError) -> Self {
        Self {
            attempts: Vec::new(),
            result: Err(error),
        }
    }

    #[must_use]
    pub const fn is_sent(&self) -> bool {
        self.result.is_ok()
    }

    /// Number of attempts made.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Converts the report into a hard failure for callers that want one.
    pub fn into_result(self) -> Result<(), DeliveryError> {
        self.result
    }
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(()) => write!(f, "sent after {} attempt(s)", self.attempts.len()),
            Err(e) => write!(f, "failed after {} attempt(s): {e}", self.attempts.len()),
        }
    }
}
