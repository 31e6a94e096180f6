//! MIME assembly for notification messages.
//!
//! Every message has the same shape:
//!
//! ```text
//! multipart/mixed
//! ├── multipart/alternative
//! │   ├── text/plain  (base64)
//! │   └── text/html   (base64)
//! └── attachments     (base64, zero or more)
//! ```

use std::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Local};
use uuid::Uuid;

use super::error::{ClientError, Result};

/// Maximum length of an encoded body line (RFC 2045 section 6.8).
const LINE_LENGTH: usize = 76;

/// Bytes of subject text per RFC 2047 encoded word.
const ENCODED_WORD_CHUNK: usize = 45;

/// Recommended maximum header line length (RFC 5322 section 2.1.1).
const FOLD_WIDTH: usize = 78;

/// An email attachment with filename, content type, and data.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// The filename to use in the MIME header.
    pub filename: String,
    /// The MIME content type (e.g., "application/pdf").
    pub content_type: String,
    /// The attachment data.
    pub data: Vec<u8>,
}

/// Builder for constructing email messages with proper MIME formatting.
///
/// ```
/// use mailme_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("robot@example.com")
///     .to("ops@example.com")
///     .subject("Nightly import")
///     .text("Task completed successfully!")
///     .html("<p>Task completed successfully!</p>")
///     .build()
///     .unwrap();
///
/// assert!(message.contains("Subject: Nightly import\r\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
    date: Option<DateTime<Local>>,
    message_id: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From header.
    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    /// Adds multiple recipients to the To header.
    #[must_use]
    pub fn to_multiple(mut self, emails: &[impl AsRef<str>]) -> Self {
        self.to
            .extend(emails.iter().map(|email| email.as_ref().to_string()));
        self
    }

    /// Sets the Subject header. Non-ASCII subjects are RFC 2047 encoded.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the plain-text alternative.
    #[must_use]
    pub fn text(mut self, content: impl Into<String>) -> Self {
        self.text = Some(content.into());
        self
    }

    /// Sets the HTML alternative.
    #[must_use]
    pub fn html(mut self, content: impl Into<String>) -> Self {
        self.html = Some(content.into());
        self
    }

    /// Overrides the Date header (defaults to now).
    #[must_use]
    pub const fn date(mut self, date: DateTime<Local>) -> Self {
        self.date = Some(date);
        self
    }

    /// Overrides the Message-ID header, without angle brackets.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Adds a file attachment from raw data.
    #[must_use]
    pub fn attach(
        mut self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.attachments.push(Attachment {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        });
        self
    }

    /// Builds the final email message.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::BuilderError`] if the sender or every recipient
    /// is missing, or a header contains a line break.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .as_deref()
            .ok_or_else(|| ClientError::BuilderError("missing From address".to_string()))?;
        if self.to.is_empty() {
            return Err(ClientError::BuilderError("missing recipients".to_string()));
        }

        let mixed = boundary("mixed");
        let alternative = boundary("alt");
        let date = self.date.unwrap_or_else(Local::now);
        let message_id = self
            .message_id
            .clone()
            .unwrap_or_else(|| generate_message_id(from));

        let mut message = String::with_capacity(4096);

        header(&mut message, "From", from)?;
        header(&mut message, "To", &self.to.join(", "))?;
        if let Some(subject) = &self.subject {
            header(&mut message, "Subject", &encode_header_value(subject))?;
        }
        header(&mut message, "Date", &date.to_rfc2822())?;
        header(&mut message, "Message-ID", &format!("<{message_id}>"))?;
        for (name, value) in &self.headers {
            header(&mut message, name, value)?;
        }
        header(&mut message, "MIME-Version", "1.0")?;
        header(
            &mut message,
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{mixed}\""),
        )?;
        message.push_str("\r\n");

        let _ = write!(
            message,
            "--{mixed}\r\nContent-Type: multipart/alternative; boundary=\"{alternative}\"\r\n\r\n"
        );
        let text = self.text.as_deref().unwrap_or_default();
        let html = self.html.as_deref().unwrap_or_default();
        for (content_type, body) in [("text/plain", text), ("text/html", html)] {
            let _ = write!(
                message,
                "--{alternative}\r\n\
                 Content-Type: {content_type}; charset=utf-8\r\n\
                 Content-Transfer-Encoding: base64\r\n\r\n\
                 {}",
                wrap_base64(body.as_bytes())
            );
        }
        let _ = write!(message, "--{alternative}--\r\n");

        for attachment in &self.attachments {
            if attachment.filename.contains(['"', '\r', '\n']) {
                return Err(ClientError::BuilderError(format!(
                    "invalid attachment filename {:?}",
                    attachment.filename
                )));
            }
            let _ = write!(
                message,
                "--{mixed}\r\n\
                 Content-Type: {}; name=\"{}\"\r\n\
                 Content-Transfer-Encoding: base64\r\n\
                 Content-Disposition: attachment; filename=\"{}\"\r\n\r\n\
                 {}",
                attachment.content_type,
                attachment.filename,
                attachment.filename,
                wrap_base64(&attachment.data)
            );
        }

        let _ = write!(message, "--{mixed}--\r\n");

        Ok(message)
    }
}

fn header(message: &mut String, name: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) && name != "Subject" {
        return Err(ClientError::BuilderError(format!(
            "header {name} contains a line break"
        )));
    }
    let _ = write!(message, "{name}: {value}\r\n");
    Ok(())
}

fn boundary(kind: &str) -> String {
    format!("----=_{kind}_{}", Uuid::new_v4().simple())
}

fn generate_message_id(from: &str) -> String {
    let domain = from
        .rsplit_once('@')
        .map_or("localhost", |(_, domain)| domain.trim_end_matches('>'));
    format!("{}@{domain}", Uuid::new_v4())
}

/// Encodes a header value as RFC 2047 `B` encoded words when it is not
/// plain ASCII. Line breaks in the input are flattened to spaces.
fn encode_header_value(value: &str) -> String {
    let value = value.replace(['\r', '\n'], " ");
    if value.is_ascii() {
        return fold_at_whitespace(&value, "Subject: ".len());
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (index, c) in value.char_indices() {
        let next = index + c.len_utf8();
        if next - start > ENCODED_WORD_CHUNK {
            words.push(&value[start..end]);
            start = end;
        }
        end = next;
    }
    words.push(&value[start..end]);

    words
        .into_iter()
        .map(|word| format!("=?UTF-8?B?{}?=", STANDARD.encode(word)))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

/// Folds a plain ASCII header value at spaces so that no line exceeds
/// [`FOLD_WIDTH`]. `used` is the length of the `Name: ` prefix. A single
/// word longer than the width is left intact.
fn fold_at_whitespace(value: &str, used: usize) -> String {
    let mut folded = String::with_capacity(value.len() + 8);
    let mut line_length = used;

    for (index, word) in value.split(' ').enumerate() {
        if index > 0 {
            // Never leave a continuation line holding nothing but whitespace
            if line_length + 1 + word.len() > FOLD_WIDTH && line_length > 1 {
                folded.push_str("\r\n");
                line_length = 0;
            }
            folded.push(' ');
            line_length += 1;
        }
        folded.push_str(word);
        line_length += word.len();
    }

    folded
}

/// Encodes data as base64 wrapped at 76 characters, each line CRLF-terminated.
fn wrap_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / LINE_LENGTH * 2 + 2);

    // Base64 output is pure ASCII, so byte chunks are valid str slices.
    for chunk in encoded.as_bytes().chunks(LINE_LENGTH) {
        wrapped.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        wrapped.push_str("\r\n");
    }

    wrapped
}
