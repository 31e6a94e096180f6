//! Client-side SMTP timeouts.
//!
//! Notification delivery sits on the exit path of the monitored work, so
//! these are tighter than RFC 5321's server recommendations: a stuck mail
//! server must not hold the caller for minutes per attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-command timeouts used by the SMTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Timeout for establishing the TCP connection (and implicit TLS handshake).
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// Timeout for the greeting and EHLO/HELO.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::ehlo_secs")]
    pub ehlo_secs: u64,

    /// Timeout for STARTTLS and the TLS handshake that follows.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::starttls_secs")]
    pub starttls_secs: u64,

    /// Timeout for the whole AUTH exchange.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::auth_secs")]
    pub auth_secs: u64,

    /// Timeout for MAIL FROM and each RCPT TO.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::envelope_secs")]
    pub envelope_secs: u64,

    /// Timeout for DATA and the message transfer.
    ///
    /// Default: 120 seconds
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,

    /// Timeout for QUIT. Expiry is logged, never fatal.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::quit_secs")]
    pub quit_secs: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect_secs(),
            ehlo_secs: defaults::ehlo_secs(),
            starttls_secs: defaults::starttls_secs(),
            auth_secs: defaults::auth_secs(),
            envelope_secs: defaults::envelope_secs(),
            data_secs: defaults::data_secs(),
            quit_secs: defaults::quit_secs(),
        }
    }
}

impl ClientTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn ehlo(&self) -> Duration {
        Duration::from_secs(self.ehlo_secs)
    }

    #[must_use]
    pub const fn starttls(&self) -> Duration {
        Duration::from_secs(self.starttls_secs)
    }

    #[must_use]
    pub const fn auth(&self) -> Duration {
        Duration::from_secs(self.auth_secs)
    }

    #[must_use]
    pub const fn envelope(&self) -> Duration {
        Duration::from_secs(self.envelope_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

mod defaults {
    pub const fn connect_secs() -> u64 {
        30
    }

    pub const fn ehlo_secs() -> u64 {
        30
    }

    pub const fn starttls_secs() -> u64 {
        30
    }

    pub const fn auth_secs() -> u64 {
        30
    }

    pub const fn envelope_secs() -> u64 {
        30
    }

    pub const fn data_secs() -> u64 {
        120
    }

    pub const fn quit_secs() -> u64 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_timeouts_defaults() {
        let timeouts = ClientTimeouts::default();
        assert_eq!(timeouts.connect(), Duration::from_secs(30));
        assert_eq!(timeouts.data(), Duration::from_secs(120));
        assert_eq!(timeouts.quit(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let timeouts: ClientTimeouts = toml::from_str("data_secs = 5").unwrap();
        assert_eq!(timeouts.data_secs, 5);
        assert_eq!(timeouts.connect_secs, 30);
        assert_eq!(timeouts.auth_secs, 30);
    }
}
