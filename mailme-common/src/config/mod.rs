//! Configuration types for mailme.
//!
//! ## Modules
//!
//! - [`transport`]: mail server address, credentials and TLS policy
//! - [`timeouts`]: per-command SMTP client timeouts
//! - [`env`]: environment variable fallbacks

pub mod env;
pub mod timeouts;
pub mod transport;

pub use timeouts::ClientTimeouts;
pub use transport::{Credentials, TlsMode, TransportConfig, TransportConfigBuilder};

use crate::error::ConfigError;

/// Validates a single mailbox such as `ops@example.com` or `Ops <ops@example.com>`,
/// returning the bare address.
pub fn parse_mailbox(input: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidAddress {
        address: input.to_string(),
        reason,
    };

    let parsed = mailparse::addrparse(input).map_err(|e| invalid(e.to_string()))?;
    let mut mailboxes = parsed.iter().flat_map(|addr| match addr {
        mailparse::MailAddr::Single(info) => vec![info.addr.clone()],
        mailparse::MailAddr::Group(group) => {
            group.addrs.iter().map(|info| info.addr.clone()).collect()
        }
    });

    let address = mailboxes
        .next()
        .ok_or_else(|| invalid("no mailbox found".to_string()))?;
    if mailboxes.next().is_some() {
        return Err(invalid("expected a single mailbox".to_string()));
    }

    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(address),
        _ => Err(invalid("missing local part or domain".to_string())),
    }
}
