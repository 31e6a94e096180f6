//! SMTP reply parsing and representation.

use super::error::{ClientError, Result};

/// Represents a single line in an SMTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    /// The SMTP status code (e.g., 220, 250, 550).
    pub code: u16,
    /// Whether this is the last line in a multi-line response.
    pub is_last: bool,
    /// The message text following the status code.
    pub message: String,
}

/// Represents a complete SMTP response, which may be multi-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The SMTP status code.
    pub code: u16,
    /// All message lines in the response.
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Returns the complete message as a single string with lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// Returns `true` if this response indicates success (2xx code).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Returns `true` for an intermediate reply (3xx), e.g. after `DATA` or during AUTH.
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Returns `true` if this response indicates a temporary error (4xx code).
    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// Returns `true` if this response indicates a permanent error (5xx code).
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Returns `true` if this response indicates any error (4xx or 5xx code).
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.is_temporary_error() || self.is_permanent_error()
    }

    /// EHLO keywords advertised by the server, upper-cased, with their parameters.
    ///
    /// The first line of an EHLO reply is the server's greeting and is skipped.
    pub fn capabilities(&self) -> impl Iterator<Item = (String, Vec<&str>)> {
        self.lines.iter().skip(1).filter_map(|line| {
            let mut parts = line.split_whitespace();
            let keyword = parts.next()?.to_ascii_uppercase();
            Some((keyword, parts.collect()))
        })
    }

    /// Whether the EHLO reply advertises `extension`.
    #[must_use]
    pub fn supports(&self, extension: &str) -> bool {
        self.capabilities()
            .any(|(keyword, _)| keyword.eq_ignore_ascii_case(extension))
    }

    /// SASL mechanisms listed in the `AUTH` capability, upper-cased.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.capabilities()
            .find(|(keyword, _)| keyword == "AUTH" || keyword.starts_with("AUTH="))
            .map(|(keyword, params)| {
                // Some older servers advertise `AUTH=LOGIN PLAIN`
                keyword
                    .strip_prefix("AUTH=")
                    .into_iter()
                    .chain(params)
                    .map(str::to_ascii_uppercase)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parses a single response line.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the line doesn't match SMTP format.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code_str = line
            .get(..3)
            .ok_or_else(|| ClientError::ParseError(format!("Response line too short: '{line}'")))?;

        let code = code_str
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{code_str}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(&c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(c)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parses a complete multi-line SMTP response from a buffer.
    ///
    /// Returns the parsed `Response` and the number of bytes consumed, or
    /// `None` if the buffer does not yet hold a complete reply.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the response is malformed.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut lines = Vec::new();
        let mut consumed = 0;
        let mut first_code = None;

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let parsed = Self::parse_line(std::str::from_utf8(raw)?)?;

            match first_code {
                Some(code) if parsed.code != code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {code}, got {}",
                        parsed.code
                    )));
                }
                Some(_) => {}
                None => first_code = Some(parsed.code),
            }

            lines.push(parsed.message);

            if parsed.is_last {
                return Ok(Some((Self::new(parsed.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_line() {
        let line = ResponseLine {
            code: 220,
            is_last: true,
            message: "mail.example.com ESMTP".to_string(),
        };
        assert_eq!(
            Response::parse_line("220 mail.example.com ESMTP").unwrap(),
            line
        );
    }

    #[test]
    fn test_parse_bare_code() {
        let line = Response::parse_line("250").unwrap();
        assert_eq!(line.code, 250);
        assert!(line.is_last);
        assert!(line.message.is_empty());
    }

    #[test]
    fn test_parse_invalid_separator() {
        assert!(Response::parse_line("250_OK").is_err());
        assert!(Response::parse_line("2x0 OK").is_err());
        assert!(Response::parse_line("25").is_err());
    }

    #[test]
    fn test_parse_multi_line_response() {
        let data = b"250-mail.example.com\r\n250-SIZE 10000000\r\n250 HELP\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(
            response.lines,
            vec!["mail.example.com", "SIZE 10000000", "HELP"]
        );
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_parse_leaves_trailing_bytes() {
        let data = b"250 OK\r\n354 Go";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_parse_incomplete_response() {
        let data = b"250-mail.example.com\r\n250-SIZE";
        assert!(Response::parse_response(data).unwrap().is_none());
    }

    #[test]
    fn test_parse_code_mismatch() {
        let data = b"250-first\r\n251 second\r\n";
        assert!(Response::parse_response(data).is_err());
    }

    #[test]
    fn test_capabilities() {
        let response = Response::new(
            250,
            vec![
                "mail.example.com greets you".to_string(),
                "PIPELINING".to_string(),
                "starttls".to_string(),
                "AUTH LOGIN plain XOAUTH2".to_string(),
            ],
        );

        assert!(response.supports("STARTTLS"));
        assert!(response.supports("pipelining"));
        assert!(!response.supports("SMTPUTF8"));
        assert_eq!(response.auth_mechanisms(), vec!["LOGIN", "PLAIN", "XOAUTH2"]);
    }

    #[test]
    fn test_legacy_auth_capability() {
        let response = Response::new(
            250,
            vec!["mail.example.com".to_string(), "AUTH=LOGIN PLAIN".to_string()],
        );
        assert_eq!(response.auth_mechanisms(), vec!["LOGIN", "PLAIN"]);
    }

    #[test]
    fn test_reply_classes() {
        assert!(Response::new(250, vec![]).is_success());
        assert!(Response::new(354, vec![]).is_intermediate());
        assert!(Response::new(421, vec![]).is_temporary_error());
        assert!(Response::new(550, vec![]).is_permanent_error());
        assert!(Response::new(550, vec![]).is_error());
        assert!(!Response::new(334, vec![]).is_error());
    }
}
