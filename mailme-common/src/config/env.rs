//! Environment variables consulted when a setting is not given explicitly.

/// Mail server host.
pub const HOST: &str = "EMAIL_HOST";
/// Mail server port.
pub const PORT: &str = "EMAIL_PORT";
/// Account used for AUTH and, unless overridden, as the sender address.
pub const USER: &str = "EMAIL_USER";
/// Account password.
pub const PASSWORD: &str = "EMAIL_PASSWORD";

pub const DEFAULT_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_PORT: u16 = 587;

/// Looks a variable up in the process environment, ignoring non-UTF-8 values.
#[must_use]
pub fn process(name: &str) -> Option<String> {
    std::env::var(name).ok()
}
