//! End-to-end notification lifecycle against a mock SMTP server.
#![allow(clippy::unwrap_used)]

mod support;

use std::{
    convert::Infallible,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use mailme::{
    DeliveryError, NotificationConfig, Notifier, OutgoingMessage, Outcome, RenderContext,
    RenderError, RenderedMessage, RetryPolicy, Transport, notify, notify_async,
};
use parking_lot::Mutex;

use support::{
    CAPTURE_LOCK, DELIVERY_WAIT, config_for, mock_server::{MockSmtpServer, SmtpCommand},
    offline_config, parse_email,
};

#[derive(Debug)]
struct ValueError(&'static str);

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Records messages instead of sending them.
#[derive(Clone, Default)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<OutgoingMessage>>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

type SeenLogs = Arc<Mutex<Vec<Option<String>>>>;

/// Renders the fallback bodies while remembering the logs each render saw.
fn recording_renderer(
    seen: &SeenLogs,
) -> impl Fn(&RenderContext<'_>) -> Result<RenderedMessage, RenderError> + Send + Sync + 'static {
    let seen = Arc::clone(seen);
    move |context: &RenderContext<'_>| {
        seen.lock().push(context.logs.map(ToString::to_string));
        Ok(RenderedMessage::fallback(context))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_success_is_notified_and_value_returned() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let notifier = Notifier::new(config_for(&server).build().unwrap());

    let value = notify(&notifier, || Ok::<_, Infallible>(42));
    assert_eq!(value.unwrap(), 42);

    let messages = server.messages().await;
    assert_eq!(messages.len(), 1);
    let email = parse_email(&messages[0]);
    assert_eq!(email.subject, "Nightly import");
    assert!(email.text.contains("Task completed successfully!"));
    assert!(email.html.contains("Task completed successfully!"));
    assert!(email.attachment.is_none());

    let commands = server.commands().await;
    assert!(commands.contains(&SmtpCommand::Auth("PLAIN".to_string())));
    assert!(commands.contains(&SmtpCommand::RcptTo("TO:<ops@example.com>".to_string())));
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failure_is_notified_and_error_returned() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let notifier = Notifier::new(config_for(&server).build().unwrap());

    let result: Result<(), ValueError> = notify(&notifier, || Err(ValueError("bad input")));
    assert_eq!(result.unwrap_err().0, "bad input");

    let messages = server.messages().await;
    assert_eq!(messages.len(), 1);
    let email = parse_email(&messages[0]);
    assert!(email.text.contains("Task failed: bad input"));
    assert!(!email.text.contains("Task completed successfully!"));
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_attached_logs_cover_the_scope_only() {
    let _guard = CAPTURE_LOCK.lock();
    let server = MockSmtpServer::builder().build().await.unwrap();
    let seen = SeenLogs::default();
    let notifier = Notifier::new(
        config_for(&server)
            .attach_logs(true)
            .renderer(recording_renderer(&seen))
            .build()
            .unwrap(),
    );

    tracing::info!("before the scope");
    let scope = notifier.open().unwrap();
    let log_path = scope.log_path().unwrap().to_path_buf();
    assert!(log_path.exists());

    tracing::info!(rows = 12, "inside the scope");
    let report = scope.close(Outcome::Success);
    tracing::info!("after the scope");

    assert!(report.is_sent());
    assert!(!log_path.exists());

    let logs = seen.lock()[0].clone().unwrap();
    assert!(logs.contains("INFO - inside the scope rows=12"));
    assert!(!logs.contains("before the scope"));
    assert!(!logs.contains("after the scope"));

    let messages = server.messages().await;
    let email = parse_email(&messages[0]);
    let (name, contents) = email.attachment.unwrap();
    assert!(name.starts_with("task_log_"));
    assert!(name.ends_with(".txt"));
    assert!(contents.contains("inside the scope"));
    assert!(email.text.contains("inside the scope"));
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_log_file_removed_when_delivery_fails() {
    let _guard = CAPTURE_LOCK.lock();
    let server = MockSmtpServer::builder()
        .with_greeting(421, "Too busy")
        .build()
        .await
        .unwrap();
    let notifier = Notifier::new(
        config_for(&server)
            .attach_logs(true)
            .retry(RetryPolicy::immediate(2))
            .build()
            .unwrap(),
    );

    let scope = notifier.open().unwrap();
    let log_path = scope.log_path().unwrap().to_path_buf();
    tracing::info!("work happened");

    let report = scope.close(Outcome::Success);

    assert!(!report.is_sent());
    assert_eq!(report.attempt_count(), 2);
    assert!(!log_path.exists());
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_temporary_failures_retried_up_to_the_bound() {
    let server = MockSmtpServer::builder()
        .with_greeting(421, "Too busy")
        .build()
        .await
        .unwrap();
    let notifier = Notifier::new(config_for(&server).build().unwrap());

    let report = notifier.open().unwrap().close(Outcome::Success);

    assert_eq!(report.attempt_count(), 3);
    assert_eq!(server.connections(), 3);
    assert!(report.into_result().unwrap_err().is_temporary());
    assert!(server.messages().await.is_empty());
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_temporary_failure_then_success() {
    let server = MockSmtpServer::builder()
        .with_busy_connections(2)
        .build()
        .await
        .unwrap();
    let notifier = Notifier::new(config_for(&server).build().unwrap());

    let report = notifier.open().unwrap().close(Outcome::Success);

    assert!(report.is_sent());
    assert_eq!(report.attempt_count(), 3);
    assert_eq!(server.connections(), 3);
    assert_eq!(server.messages().await.len(), 1);
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_credentials_are_not_retried() {
    let server = MockSmtpServer::builder()
        .with_auth_response(535, "5.7.8 Authentication credentials invalid")
        .build()
        .await
        .unwrap();
    let notifier = Notifier::new(
        config_for(&server)
            .retry(RetryPolicy::immediate(5))
            .build()
            .unwrap(),
    );

    let result = notify(&notifier, || Ok::<_, Infallible>("done"));

    assert_eq!(result.unwrap(), "done");
    assert_eq!(server.connections(), 1);
    assert!(server.messages().await.is_empty());
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auth_login_used_when_plain_not_offered() {
    let server = MockSmtpServer::builder()
        .with_capabilities(&["mock.test", "AUTH LOGIN"])
        .build()
        .await
        .unwrap();
    let notifier = Notifier::new(config_for(&server).build().unwrap());

    let report = notifier.open().unwrap().close(Outcome::Success);

    assert!(report.is_sent());
    assert!(
        server
            .commands()
            .await
            .contains(&SmtpCommand::Auth("LOGIN".to_string()))
    );
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_helo_used_when_ehlo_rejected() {
    let server = MockSmtpServer::builder()
        .with_ehlo_rejected()
        .build()
        .await
        .unwrap();
    let notifier = Notifier::new(config_for(&server).build().unwrap());

    let report = notifier.open().unwrap().close(Outcome::Success);

    // HELO advertises no AUTH mechanism, so the credentials cannot be used
    assert!(report.result.as_ref().unwrap_err().is_auth_failure());
    assert_eq!(server.connections(), 1);
    let commands = server.commands().await;
    assert!(matches!(commands.first(), Some(SmtpCommand::Ehlo(_))));
    assert!(matches!(commands.get(1), Some(SmtpCommand::Helo(name)) if !name.is_empty()));
    assert!(!commands.iter().any(|c| matches!(c, SmtpCommand::Auth(_))));
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panic_is_notified_then_resumed() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let notifier = Notifier::new(config_for(&server).build().unwrap());

    let caught = panic::catch_unwind(AssertUnwindSafe(|| {
        notify(&notifier, || -> Result<(), Infallible> { panic!("boom") })
    }));

    let payload = caught.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));

    let messages = server.messages().await;
    assert_eq!(messages.len(), 1);
    assert!(parse_email(&messages[0]).text.contains("Task failed: boom"));
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_notify_async_reports_outcome() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let notifier = Notifier::new(config_for(&server).build().unwrap());

    let result: Result<u8, ValueError> = notify_async(&notifier, async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Err(ValueError("async failure"))
    })
    .await;

    assert_eq!(result.unwrap_err().0, "async failure");
    let messages = server.messages().await;
    assert_eq!(messages.len(), 1);
    assert!(
        parse_email(&messages[0])
            .text
            .contains("Task failed: async failure")
    );
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_future_reports_cancellation() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let notifier = Notifier::new(config_for(&server).build().unwrap());

    let work = notify_async(&notifier, std::future::pending::<Result<(), Infallible>>());
    let timed_out = tokio::time::timeout(Duration::from_millis(50), work).await;
    assert!(timed_out.is_err());

    let messages = server.wait_for_messages(1, DELIVERY_WAIT).await;
    assert_eq!(messages.len(), 1);
    assert!(parse_email(&messages[0]).text.contains("cancelled"));
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_async_waits_unless_async_mode() {
    let server = MockSmtpServer::builder()
        .with_response_delay(Duration::from_millis(20))
        .build()
        .await
        .unwrap();

    let waiting = Notifier::new(config_for(&server).build().unwrap());
    let handle = waiting.open().unwrap().close_async(Outcome::Success).await;
    assert!(handle.is_finished());
    assert!(handle.await.is_sent());

    let detached = Notifier::new(config_for(&server).async_mode(true).build().unwrap());
    let handle = detached.open().unwrap().close_async(Outcome::Success).await;
    assert!(handle.await.is_sent());

    assert_eq!(server.messages().await.len(), 2);
    server.shutdown();
}

#[test]
fn test_custom_transport_receives_envelope() {
    let transport = RecordingTransport::default();
    let config = offline_config()
        .email("dev@example.com")
        .from("Robot <robot@example.com>")
        .build()
        .unwrap();
    let notifier = Notifier::with_transport(config, transport.clone());

    let report = notifier.open().unwrap().close(Outcome::Success);
    assert!(report.is_sent());

    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].sender, "robot@example.com");
    assert_eq!(sent[0].recipients, ["ops@example.com", "dev@example.com"]);
    assert_eq!(parse_email(&sent[0].data).subject, "Offline");
}

#[test]
fn test_drop_without_runtime_reports_cancellation() {
    let transport = RecordingTransport::default();
    let notifier = Notifier::with_transport(offline_config().build().unwrap(), transport.clone());

    drop(notifier.open().unwrap());

    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 1);
    assert!(parse_email(&sent[0].data).text.contains("cancelled"));
}

#[test]
fn test_cancellation_survives_runtime_shutdown() {
    let transport = RecordingTransport::default();
    let notifier = Notifier::with_transport(offline_config().build().unwrap(), transport.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    runtime.spawn(async move {
        notify_async(&notifier, std::future::pending::<Result<(), Infallible>>()).await
    });
    std::thread::sleep(Duration::from_millis(20));
    drop(runtime);

    let deadline = std::time::Instant::now() + DELIVERY_WAIT;
    while transport.sent.lock().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 1);
    assert!(parse_email(&sent[0].data).text.contains("cancelled"));
}

#[test]
fn test_renderer_failure_falls_back() {
    let transport = RecordingTransport::default();
    let config = offline_config()
        .renderer(|_: &RenderContext<'_>| -> Result<RenderedMessage, RenderError> {
            Err(RenderError::Custom("template engine unavailable".to_string()))
        })
        .build()
        .unwrap();
    let notifier = Notifier::with_transport(config, transport.clone());

    let result = notify(&notifier, || Err::<(), _>(ValueError("disk full")));
    assert!(result.is_err());

    let sent = transport.sent.lock();
    let email = parse_email(&sent[0].data);
    assert!(email.text.contains("Task failed: disk full"));
    assert!(email.html.contains("<h1>Offline</h1>"));
}

#[test]
fn test_config_requires_recipients() {
    let err = NotificationConfig::builder()
        .username("robot@example.com")
        .password("secret")
        .build()
        .unwrap_err();
    assert!(matches!(err, mailme::ConfigError::NoRecipients));
}
