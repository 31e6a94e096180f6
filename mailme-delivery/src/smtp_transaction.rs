//! SMTP transaction execution.
//!
//! One [`SmtpTransaction`] is one delivery attempt: connect, greet,
//! secure the session, authenticate, submit the envelope and the message,
//! and say goodbye. Every step runs under its own timeout. The connection
//! is owned by [`SmtpTransaction::execute`] and closed when it returns,
//! whether the attempt succeeded or not.

use std::{future::Future, time::Duration};

use mailme_common::{
    config::{TlsMode, TransportConfig},
    tracing,
};
use mailme_smtp::client::{ClientError, Response, SmtpClient};

use crate::{
    error::{DeliveryError, PermanentError, SystemError, TemporaryError},
    types::OutgoingMessage,
};

/// Runs `future`, mapping an elapsed `limit` to [`TemporaryError::Timeout`].
async fn timed<T>(
    step: &str,
    limit: Duration,
    future: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, DeliveryError> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| TemporaryError::Timeout(format!("{step} timed out after {limit:?}")))?
        .map_err(DeliveryError::from)
}

/// Represents a single SMTP submission of one message.
pub struct SmtpTransaction<'a> {
    config: &'a TransportConfig,
    message: &'a OutgoingMessage,
    server_address: String,
}

impl<'a> SmtpTransaction<'a> {
    #[must_use]
    pub fn new(config: &'a TransportConfig, message: &'a OutgoingMessage) -> Self {
        Self {
            config,
            message,
            server_address: config.address(),
        }
    }

    /// Execute the complete SMTP transaction.
    ///
    /// QUIT failures after the message was accepted are logged, not returned.
    #[tracing::instrument(level = "debug", skip(self), fields(server = %self.server_address))]
    pub async fn execute(self) -> Result<(), DeliveryError> {
        if self.message.recipients.is_empty() {
            return Err(SystemError::Configuration("message has no recipients".to_string()).into());
        }

        if self.config.accept_invalid_certs && self.config.tls_mode() != TlsMode::None {
            tracing::warn!(
                server = %self.server_address,
                "SECURITY WARNING: TLS certificate validation is disabled for this connection"
            );
        }

        let mut client = self.connect_and_greet().await?;
        let capabilities = self.negotiate_tls(&mut client).await?;

        self.authenticate(&mut client, &capabilities).await?;
        self.send_mail_from(&mut client).await?;
        self.send_rcpt_to(&mut client).await?;
        self.send_message_data(&mut client).await?;

        let quit_timeout = self.config.timeouts.quit();
        match tokio::time::timeout(quit_timeout, client.quit()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(
                server = %self.server_address,
                error = %e,
                "QUIT failed after successful delivery"
            ),
            Err(_) => tracing::warn!(
                server = %self.server_address,
                timeout = ?quit_timeout,
                "QUIT timed out after successful delivery"
            ),
        }

        Ok(())
    }

    /// Connect to the SMTP server and read the greeting.
    async fn connect_and_greet(&self) -> Result<SmtpClient, DeliveryError> {
        let connect_timeout = self.config.timeouts.connect();
        let connect = async {
            match self.config.tls_mode() {
                TlsMode::Implicit => {
                    SmtpClient::connect_tls(
                        &self.server_address,
                        self.config.host.as_str(),
                        self.config.accept_invalid_certs,
                    )
                    .await
                }
                TlsMode::StartTls | TlsMode::None => {
                    SmtpClient::connect(&self.server_address, self.config.host.as_str())
                        .await
                        .map(|client| client.accept_invalid_certs(self.config.accept_invalid_certs))
                }
            }
        };

        let mut client = tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| {
                TemporaryError::Timeout(format!(
                    "Connecting to {} timed out after {connect_timeout:?}",
                    self.server_address
                ))
            })?
            .map_err(|e| match e {
                ClientError::Io(e) => TemporaryError::ConnectionFailed(format!(
                    "Failed to connect to {}: {e}",
                    self.server_address
                ))
                .into(),
                other => DeliveryError::from(other),
            })?;

        let greeting = timed("Greeting", self.config.timeouts.ehlo(), client.read_greeting()).await?;
        if !greeting.is_success() {
            return Err(TemporaryError::ServerBusy(format!(
                "Server rejected connection: {} {}",
                greeting.code,
                greeting.message()
            ))
            .into());
        }

        Ok(client)
    }

    async fn ehlo(&self, client: &mut SmtpClient) -> Result<Response, DeliveryError> {
        let response = timed(
            "EHLO",
            self.config.timeouts.ehlo(),
            client.ehlo(&self.config.helo_name),
        )
        .await?;

        if response.is_success() {
            return Ok(response);
        }

        // Servers without ESMTP reject EHLO outright; greet them with HELO.
        // The reply advertises no extensions.
        if response.is_permanent_error() {
            tracing::debug!(
                code = response.code,
                "EHLO rejected by {}, falling back to HELO",
                self.server_address
            );
            let helo = timed(
                "HELO",
                self.config.timeouts.ehlo(),
                client.helo(&self.config.helo_name),
            )
            .await?;
            if helo.is_success() {
                return Ok(helo);
            }
            return Err(DeliveryError::from_reply(
                helo.code,
                format!("Server rejected HELO: {}", helo.message()),
            ));
        }

        Err(DeliveryError::from_reply(
            response.code,
            format!("Server rejected EHLO: {}", response.message()),
        ))
    }

    /// Sends EHLO and, for [`TlsMode::StartTls`], upgrades the session and
    /// sends EHLO again. Returns the capabilities of the final EHLO.
    ///
    /// A server that does not offer STARTTLS when it is required fails the
    /// delivery permanently rather than sending credentials in the clear.
    async fn negotiate_tls(&self, client: &mut SmtpClient) -> Result<Response, DeliveryError> {
        let ehlo_response = self.ehlo(client).await?;

        if self.config.tls_mode() != TlsMode::StartTls {
            return Ok(ehlo_response);
        }

        if !ehlo_response.supports("STARTTLS") {
            return Err(PermanentError::TlsRequired(format!(
                "{} does not advertise STARTTLS",
                self.server_address
            ))
            .into());
        }

        let response = timed("STARTTLS", self.config.timeouts.starttls(), client.starttls()).await?;
        if !response.is_success() {
            return Err(PermanentError::TlsRequired(format!(
                "Server rejected STARTTLS: {} {}",
                response.code,
                response.message()
            ))
            .into());
        }

        tracing::debug!(server = %self.server_address, "TLS negotiated via STARTTLS");

        // RFC 3207: capabilities must be discovered again over the secure channel
        self.ehlo(client).await
    }

    /// Authenticates with `AUTH PLAIN`, or `AUTH LOGIN` when PLAIN is not offered.
    async fn authenticate(
        &self,
        client: &mut SmtpClient,
        capabilities: &Response,
    ) -> Result<(), DeliveryError> {
        let credentials = &self.config.credentials;
        let mechanisms = capabilities.auth_mechanisms();
        let auth_timeout = self.config.timeouts.auth();

        let response = if mechanisms.iter().any(|m| m == "PLAIN") {
            timed(
                "AUTH PLAIN",
                auth_timeout,
                client.auth_plain(&credentials.username, &credentials.password),
            )
            .await?
        } else if mechanisms.iter().any(|m| m == "LOGIN") {
            timed(
                "AUTH LOGIN",
                auth_timeout,
                client.auth_login(&credentials.username, &credentials.password),
            )
            .await?
        } else {
            let offered = if mechanisms.is_empty() {
                "none".to_string()
            } else {
                mechanisms.join(" ")
            };
            return Err(ClientError::UnsupportedAuth(offered).into());
        };

        if response.is_success() {
            tracing::debug!(
                server = %self.server_address,
                username = %credentials.username,
                "Authenticated"
            );
            return Ok(());
        }

        let message = format!("{} {}", response.code, response.message());
        if response.is_temporary_error() {
            Err(TemporaryError::SmtpTemporary(format!("AUTH deferred: {message}")).into())
        } else {
            Err(PermanentError::AuthenticationFailed(message).into())
        }
    }

    async fn send_mail_from(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        let response = timed(
            "MAIL FROM",
            self.config.timeouts.envelope(),
            client.mail_from(&self.message.sender, None),
        )
        .await?;

        if !response.is_success() {
            return Err(DeliveryError::from_reply(
                response.code,
                format!("Server rejected MAIL FROM: {} {}", response.code, response.message()),
            ));
        }

        Ok(())
    }

    async fn send_rcpt_to(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        for recipient in &self.message.recipients {
            let response = timed(
                "RCPT TO",
                self.config.timeouts.envelope(),
                client.rcpt_to(recipient),
            )
            .await?;

            if !response.is_success() {
                let message = format!(
                    "Server rejected RCPT TO {recipient}: {} {}",
                    response.code,
                    response.message()
                );
                return Err(if response.is_permanent_error() {
                    PermanentError::InvalidRecipient(message).into()
                } else {
                    DeliveryError::from_reply(response.code, message)
                });
            }
        }

        Ok(())
    }

    async fn send_message_data(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        let data_timeout = self.config.timeouts.data();

        let response = timed("DATA", data_timeout, client.data()).await?;
        if !response.is_intermediate() {
            return Err(DeliveryError::from_reply(
                response.code,
                format!("Server rejected DATA: {} {}", response.code, response.message()),
            ));
        }

        let response = timed(
            "Sending message data",
            data_timeout,
            client.send_data(&self.message.data),
        )
        .await?;
        if !response.is_success() {
            return Err(DeliveryError::from_reply(
                response.code,
                format!(
                    "Server rejected message data: {} {}",
                    response.code,
                    response.message()
                ),
            ));
        }

        Ok(())
    }
}
