#![allow(dead_code, clippy::unwrap_used)]

pub mod mock_server;

use std::{sync::Once, time::Duration};

use mailme::{CaptureLayer, NotificationConfig, NotificationConfigBuilder, RetryPolicy};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use parking_lot::{Mutex, const_mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mock_server::MockSmtpServer;

/// Log capture is process-wide; tests that attach logs take this first.
pub static CAPTURE_LOCK: Mutex<()> = const_mutex(());

/// How long to wait for a notification delivered in the background.
pub const DELIVERY_WAIT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(CaptureLayer)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Configuration pointing at `server` with plaintext SMTP and immediate retries.
pub fn config_for(server: &MockSmtpServer) -> NotificationConfigBuilder {
    init_tracing();
    NotificationConfig::builder()
        .email("ops@example.com")
        .subject("Nightly import")
        .host("127.0.0.1")
        .port(server.addr().port())
        .username("robot@example.com")
        .password("secret")
        .use_tls(false)
        .retry(RetryPolicy::immediate(3))
}

/// Configuration for tests that never reach a server.
pub fn offline_config() -> NotificationConfigBuilder {
    init_tracing();
    NotificationConfig::builder()
        .email("ops@example.com")
        .subject("Offline")
        .host("127.0.0.1")
        .port(2525)
        .username("robot@example.com")
        .password("secret")
        .use_tls(false)
        .retry(RetryPolicy::immediate(1))
}

/// The decoded parts of a notification email.
#[derive(Debug, Default)]
pub struct Email {
    pub subject: String,
    pub text: String,
    pub html: String,
    /// File name and contents of the attached log.
    pub attachment: Option<(String, String)>,
}

pub fn parse_email(raw: &str) -> Email {
    let parsed = mailparse::parse_mail(raw.as_bytes()).unwrap();
    let mut email = Email {
        subject: parsed.headers.get_first_value("Subject").unwrap_or_default(),
        ..Email::default()
    };
    collect(&parsed, &mut email);
    email
}

fn collect(part: &ParsedMail<'_>, email: &mut Email) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect(sub, email);
        }
        return;
    }

    let body = String::from_utf8(part.get_body_raw().unwrap()).unwrap();
    let disposition = part.get_content_disposition();
    if disposition.disposition == DispositionType::Attachment {
        let name = disposition.params.get("filename").cloned().unwrap_or_default();
        email.attachment = Some((name, body));
    } else if part.ctype.mimetype == "text/html" {
        email.html = body;
    } else if part.ctype.mimetype == "text/plain" {
        email.text = body;
    }
}
