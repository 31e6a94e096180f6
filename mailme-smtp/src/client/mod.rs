//! SMTP submission client.
//!
//! Supports:
//!
//! - Plain TCP, implicit TLS (port 465) and STARTTLS upgrade
//! - `AUTH PLAIN` and `AUTH LOGIN`
//! - Multi-line reply parsing and EHLO capability inspection
//! - MIME assembly of text/HTML alternatives with attachments
//!
//! Every command and reply is traced with the `outgoing!`/`incoming!`
//! macros at `TRACE`; credential-bearing lines are redacted.
//!
//! ```no_run
//! use mailme_smtp::client::{MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("smtp.example.com:587", "smtp.example.com").await?;
//! client.read_greeting().await?;
//! client.ehlo("localhost").await?;
//! client.starttls().await?;
//! client.ehlo("localhost").await?;
//! client.auth_plain("robot@example.com", "secret").await?;
//! client.mail_from("robot@example.com", None).await?;
//! client.rcpt_to("ops@example.com").await?;
//! client.data().await?;
//!
//! let message = MessageBuilder::new()
//!     .from("robot@example.com")
//!     .to("ops@example.com")
//!     .subject("Done")
//!     .text("Task completed successfully!")
//!     .build()?;
//! client.send_data(&message).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod message;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use message::{Attachment, MessageBuilder};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
