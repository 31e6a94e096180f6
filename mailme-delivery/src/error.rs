//! Typed error handling for delivery operations.
//!
//! Errors fall into three classes that drive the retry decision:
//! - Permanent failures (5xx replies, rejected credentials) - never retried
//! - Temporary failures (4xx replies, network trouble, timeouts) - retried with backoff
//! - System errors (malformed messages, protocol bugs) - never retried

use mailme_smtp::client::ClientError;
use thiserror::Error;

/// SMTP reply codes that mean the credentials were refused.
const AUTH_REJECTED: [u16; 3] = [530, 534, 535];

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Permanent failure that should not be retried (e.g., 5xx SMTP codes).
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that can be retried with backoff (e.g., 4xx SMTP codes).
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// System-level error (malformed message, internal errors).
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Permanent errors that should not be retried.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// Recipient address is invalid or rejected by the server.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Message was rejected by the server (e.g., policy violation, spam).
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// SMTP authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Message size exceeds server limits.
    #[error("Message too large: {0}")]
    MessageTooLarge(String),

    /// TLS is required but not available or failed.
    #[error("TLS required: {0}")]
    TlsRequired(String),
}

/// Temporary errors that should be retried with exponential backoff.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// Failed to establish connection to the mail server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Server is temporarily busy or unavailable.
    #[error("Server busy: {0}")]
    ServerBusy(String),

    /// Connection timed out.
    #[error("Connection timed out: {0}")]
    Timeout(String),

    /// Server returned a temporary failure code.
    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// The outgoing message could not be assembled.
    #[error("Message build error: {0}")]
    MessageBuild(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Returns `true` if the server refused the credentials.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Permanent(PermanentError::AuthenticationFailed(_)))
    }

    /// Classifies a rejected reply to a step that has no more specific mapping.
    #[must_use]
    pub fn from_reply(code: u16, message: String) -> Self {
        match code {
            400..500 => TemporaryError::SmtpTemporary(message).into(),
            552 => PermanentError::MessageTooLarge(message).into(),
            500..600 => PermanentError::MessageRejected(message).into(),
            _ => SystemError::Internal(format!("Unexpected SMTP response: {message}")).into(),
        }
    }
}

/// Classifies SMTP client errors by reply code class and error kind:
///
/// - **530/534/535** → Permanent (authentication rejected)
/// - **4xx SMTP codes** → Temporary (should retry)
/// - **5xx SMTP codes** → Permanent (should not retry)
/// - **Connection/I/O errors** → Temporary (network issues are transient)
/// - **TLS errors** → Temporary (handshake may succeed on another attempt)
/// - **Parse/builder errors** → System (internal issues)
impl From<ClientError> for DeliveryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message } if AUTH_REJECTED.contains(&code) => Self::Permanent(
                PermanentError::AuthenticationFailed(format!("{code} {message}")),
            ),

            ClientError::SmtpError { code, message } if (400..600).contains(&code) => {
                Self::from_reply(code, format!("{code} {message}"))
            }

            ClientError::SmtpError { code, message }
            | ClientError::UnexpectedResponse { code, message } => Self::System(
                SystemError::Internal(format!("Unexpected SMTP response: {code} {message}")),
            ),

            ClientError::UnsupportedAuth(offered) => {
                Self::Permanent(PermanentError::AuthenticationFailed(format!(
                    "server offers no supported mechanism ({offered})"
                )))
            }

            ClientError::Io(e) => {
                Self::Temporary(TemporaryError::ConnectionFailed(format!("I/O error: {e}")))
            }

            ClientError::ConnectionClosed => Self::Temporary(TemporaryError::ConnectionFailed(
                "Connection closed unexpectedly".to_string(),
            )),

            ClientError::TlsError(msg) => Self::Temporary(TemporaryError::TlsHandshakeFailed(msg)),

            ClientError::ParseError(msg) => Self::System(SystemError::Internal(format!(
                "SMTP protocol parse error: {msg}"
            ))),

            ClientError::BuilderError(msg) => Self::System(SystemError::MessageBuild(msg)),

            ClientError::Utf8Error(e) => {
                Self::System(SystemError::Internal(format!("UTF-8 decoding error: {e}")))
            }
        }
    }
}
