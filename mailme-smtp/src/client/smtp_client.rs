//! SMTP client implementation with support for implicit TLS, STARTTLS and AUTH.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use mailme_common::{incoming, outgoing, tracing};

use super::{
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// An SMTP client connection that can be either plain TCP or TLS-wrapped.
enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.flush().await?,
            Self::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    /// Upgrades a plain connection to TLS.
    async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        match self {
            Self::Plain(stream) => {
                let connector = tls_connector(accept_invalid_certs)?;
                let server_name = ServerName::try_from(domain.to_string())
                    .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| ClientError::TlsError(e.to_string()))?;

                Ok(Self::Tls(Box::new(tls_stream)))
            }
            Self::Tls(_) => Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            )),
        }
    }
}

fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        root_store
            .add(cert)
            .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
    }
    if !certs.errors.is_empty() {
        tracing::warn!(?certs.errors, "Some certificates could not be loaded");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

/// A certificate verifier that accepts all certificates (for testing only).
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

/// An SMTP client for sending commands and receiving responses.
///
/// The client owns its connection; dropping it closes the socket.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    /// Opens a plain TCP connection to `addr`.
    ///
    /// `server_domain` is the name the certificate is checked against if
    /// the session is later upgraded with [`SmtpClient::starttls`].
    pub async fn connect(addr: &str, server_domain: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Io)?;

        Ok(Self::from_connection(
            ClientConnection::Plain(stream),
            server_domain.into(),
        ))
    }

    /// Opens a connection to `addr` and performs the TLS handshake before
    /// any SMTP traffic (submissions on port 465).
    pub async fn connect_tls(
        addr: &str,
        server_domain: impl Into<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let server_domain = server_domain.into();
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Io)?;
        let connection = ClientConnection::Plain(stream)
            .upgrade_to_tls(&server_domain, accept_invalid_certs)
            .await?;

        Ok(Self::from_connection(connection, server_domain).accept_invalid_certs(accept_invalid_certs))
    }

    fn from_connection(connection: ClientConnection, server_domain: String) -> Self {
        Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain,
            accept_invalid_certs: false,
        }
    }

    /// Sets whether to accept invalid TLS certificates during STARTTLS.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Reads the initial server greeting (220 response).
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(line.as_bytes()).await?;
        connection.send(b"\r\n").await?;
        connection.flush().await
    }

    /// Sends a command to the server.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        outgoing!("{command}");
        self.write_line(command).await
    }

    /// Sends a raw command and reads the response.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        self.read_response().await
    }

    /// Sends a line carrying credentials. The line itself is never traced.
    async fn sensitive_command(&mut self, command: &str, label: &str) -> Result<Response> {
        outgoing!("{label} <redacted>");
        self.write_line(command).await?;
        self.read_response().await
    }

    /// Sends EHLO with the specified domain.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// Sends HELO with the specified domain.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// Sends `AUTH PLAIN` with an initial response (RFC 4616).
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = STANDARD.encode(format!("\0{username}\0{password}"));
        self.sensitive_command(&format!("AUTH PLAIN {token}"), "AUTH PLAIN")
            .await
    }

    /// Runs the `AUTH LOGIN` exchange.
    ///
    /// Returns the first reply that is not a `334` challenge.
    pub async fn auth_login(&mut self, username: &str, password: &str) -> Result<Response> {
        let response = self.command("AUTH LOGIN").await?;
        if response.code != 334 {
            return Ok(response);
        }

        let response = self
            .sensitive_command(&STANDARD.encode(username), "AUTH LOGIN username")
            .await?;
        if response.code != 334 {
            return Ok(response);
        }

        self.sensitive_command(&STANDARD.encode(password), "AUTH LOGIN password")
            .await
    }

    /// Sends MAIL FROM command.
    pub async fn mail_from(&mut self, from: &str, size: Option<usize>) -> Result<Response> {
        let cmd = if let Some(sz) = size {
            format!("MAIL FROM:<{from}> SIZE={sz}")
        } else {
            format!("MAIL FROM:<{from}>")
        };
        self.command(&cmd).await
    }

    /// Sends RCPT TO command.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// Sends DATA command.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends the message content followed by the end-of-data marker.
    ///
    /// Line endings are normalised to CRLF and lines starting with `.` are
    /// dot-stuffed (RFC 5321 section 4.5.2).
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let payload = dot_stuff(data);
        outgoing!("<{} bytes of message data>", payload.len());

        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(payload.as_bytes()).await?;
        connection.send(b".\r\n").await?;
        connection.flush().await?;

        self.read_response().await
    }

    /// Sends QUIT command.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Sends STARTTLS command and upgrades the connection to TLS.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;

        if response.is_success() {
            // Anything buffered before the handshake was sent in the clear.
            self.buffer_pos = 0;

            let old_connection = self
                .connection
                .take()
                .ok_or(ClientError::ConnectionClosed)?;
            self.connection = Some(
                old_connection
                    .upgrade_to_tls(&self.server_domain, self.accept_invalid_certs)
                    .await?,
            );
        }

        Ok(response)
    }

    /// Reads a complete SMTP response from the server.
    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{} {}", response.code, response.message());

                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

/// Normalises line endings to CRLF, escapes leading dots and guarantees a
/// trailing CRLF.
fn dot_stuff(data: &str) -> String {
    let mut out = String::with_capacity(data.len() + data.len() / 64 + 2);

    for line in data.split_inclusive('\n') {
        let line = line
            .strip_suffix('\n')
            .map_or(line, |l| l.strip_suffix('\r').unwrap_or(l));
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }

    out
}
