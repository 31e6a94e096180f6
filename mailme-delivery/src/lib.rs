//! Delivery of notification messages.
//!
//! A [`Transport`] performs exactly one attempt; the [`DeliveryPolicy`]
//! wraps it with bounded, strictly sequential retries and produces a
//! [`DeliveryReport`] describing every attempt.

pub mod error;
pub mod policy;
mod smtp_transaction;
mod transport;
mod types;

pub use error::{DeliveryError, PermanentError, SystemError, TemporaryError};
pub use policy::{DeliveryPolicy, RetryPolicy};
pub use smtp_transaction::SmtpTransaction;
pub use transport::{SmtpTransport, Transport};
pub use types::{AttemptResult, DeliveryAttempt, DeliveryReport, OutgoingMessage};
