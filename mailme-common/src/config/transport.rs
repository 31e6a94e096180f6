//! Mail server connection settings.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{env, timeouts::ClientTimeouts};
use crate::error::ConfigError;

/// Port on which servers expect TLS from the first byte (RFC 8314).
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// How the transport secures the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain text for the whole session.
    None,
    /// Plain connect, then a mandatory STARTTLS upgrade.
    StartTls,
    /// TLS handshake immediately after connecting.
    Implicit,
}

/// SMTP account used to authenticate. The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Creates credentials, rejecting empty values.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, ConfigError> {
        let username = username.into();
        let password = password.into();

        if username.trim().is_empty() {
            return Err(ConfigError::MissingField("username"));
        }
        if password.is_empty() {
            return Err(ConfigError::MissingField("password"));
        }

        Ok(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fully resolved transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub use_tls: bool,
    /// Skip certificate verification. Only for test servers with self-signed certificates.
    pub accept_invalid_certs: bool,
    /// Name announced in EHLO.
    pub helo_name: String,
    pub timeouts: ClientTimeouts,
}

impl TransportConfig {
    #[must_use]
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub const fn tls_mode(&self) -> TlsMode {
        match (self.use_tls, self.port) {
            (false, _) => TlsMode::None,
            (true, IMPLICIT_TLS_PORT) => TlsMode::Implicit,
            (true, _) => TlsMode::StartTls,
        }
    }
}

/// Builder for [`TransportConfig`].
///
/// Unset host, port, username and password fall back to `EMAIL_HOST`,
/// `EMAIL_PORT`, `EMAIL_USER` and `EMAIL_PASSWORD`.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    accept_invalid_certs: Option<bool>,
    helo_name: Option<String>,
    timeouts: Option<ClientTimeouts>,
}

impl TransportConfigBuilder {
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub const fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = Some(use_tls);
        self
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = Some(accept);
        self
    }

    #[must_use]
    pub fn helo_name(mut self, name: impl Into<String>) -> Self {
        self.helo_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Fills every unset field from `other`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self {
            host: self.host.or(other.host),
            port: self.port.or(other.port),
            username: self.username.or(other.username),
            password: self.password.or(other.password),
            use_tls: self.use_tls.or(other.use_tls),
            accept_invalid_certs: self.accept_invalid_certs.or(other.accept_invalid_certs),
            helo_name: self.helo_name.or(other.helo_name),
            timeouts: self.timeouts.or(other.timeouts),
        }
    }

    /// Resolves the configuration against the process environment.
    pub fn build(self) -> Result<TransportConfig, ConfigError> {
        self.build_with(env::process)
    }

    /// Resolves the configuration against an arbitrary variable lookup.
    pub fn build_with<F>(self, lookup: F) -> Result<TransportConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fallback = |value: Option<String>, var: &str| {
            value.or_else(|| lookup(var)).filter(|v| !v.is_empty())
        };

        let host = fallback(self.host, env::HOST).unwrap_or_else(|| env::DEFAULT_HOST.to_string());
        let port = match self.port {
            Some(port) => port,
            None => lookup(env::PORT)
                .filter(|v| !v.is_empty())
                .map(|v| {
                    v.trim().parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                        field: "port",
                        reason: format!("{}={v}: {e}", env::PORT),
                    })
                })
                .transpose()?
                .unwrap_or(env::DEFAULT_PORT),
        };

        let username =
            fallback(self.username, env::USER).ok_or(ConfigError::MissingField("username"))?;
        let password =
            fallback(self.password, env::PASSWORD).ok_or(ConfigError::MissingField("password"))?;

        let helo_name = self.helo_name.unwrap_or_else(default_helo_name);
        if !is_valid_helo_name(&helo_name) {
            return Err(ConfigError::InvalidValue {
                field: "helo_name",
                reason: format!("{helo_name:?} is not a domain or address literal"),
            });
        }

        Ok(TransportConfig {
            host,
            port,
            credentials: Credentials::new(username, password)?,
            use_tls: self.use_tls.unwrap_or(true),
            accept_invalid_certs: self.accept_invalid_certs.unwrap_or(false),
            helo_name,
            timeouts: self.timeouts.unwrap_or_default(),
        })
    }
}

fn default_helo_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .into_iter()
        .find_map(|var| std::env::var(var).ok())
        .filter(|name| is_valid_helo_name(name))
        .unwrap_or_else(|| "localhost".to_string())
}

/// The name is sent verbatim on the EHLO line, so it is limited to the
/// characters of a domain or an address literal such as `[192.0.2.1]`.
fn is_valid_helo_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '[' | ']' | ':'))
}
