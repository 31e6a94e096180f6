use async_trait::async_trait;
use mailme_common::config::TransportConfig;

use crate::{error::DeliveryError, smtp_transaction::SmtpTransaction, types::OutgoingMessage};

/// Performs one delivery attempt of a fully formed message.
///
/// Implementations must not retry internally; retrying is the job of the
/// [`DeliveryPolicy`](crate::DeliveryPolicy).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), DeliveryError>;
}

/// Submits messages to an SMTP server, one connection per attempt.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: TransportConfig,
}

impl SmtpTransport {
    #[must_use]
    pub const fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        SmtpTransaction::new(&self.config, message).execute().await
    }
}
