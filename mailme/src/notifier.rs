//! Notification lifecycle.
//!
//! A [`Notifier`] opens one [`NotificationScope`] per monitored unit of work.
//! Closing the scope (explicitly or by dropping it) runs the exit sequence
//! exactly once:
//!
//! 1. stop log capture and read what was captured,
//! 2. render the message,
//! 3. deliver it through the [`DeliveryPolicy`],
//! 4. delete the temporary log file.
//!
//! A failure in steps 1 to 3 is logged and never prevents step 4. The
//! monitored outcome is only observed, never changed.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use chrono::Local;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use mailme_common::{
    CaptureError, Outcome,
    capture::{CapturedLog, LogCapture},
    render::{RenderContext, RenderedMessage},
    tracing,
};
use mailme_delivery::{
    DeliveryError, DeliveryPolicy, DeliveryReport, OutgoingMessage, SmtpTransport, SystemError,
    Transport,
};
use mailme_smtp::client::MessageBuilder;

use crate::config::NotificationConfig;

struct Inner {
    config: NotificationConfig,
    transport: Arc<dyn Transport>,
    policy: DeliveryPolicy,
}

/// Sends one notification per opened scope. Cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    /// Creates a notifier delivering over SMTP with the configured transport.
    #[must_use]
    pub fn new(config: NotificationConfig) -> Self {
        let transport = SmtpTransport::new(config.transport().clone());
        Self::with_transport(config, transport)
    }

    /// Creates a notifier delivering through `transport`.
    #[must_use]
    pub fn with_transport(config: NotificationConfig, transport: impl Transport + 'static) -> Self {
        let policy = DeliveryPolicy::new(config.retry().clone());
        Self {
            inner: Arc::new(Inner {
                config,
                transport: Arc::new(transport),
                policy,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &NotificationConfig {
        &self.inner.config
    }

    /// Opens a scope around one unit of work, starting log capture if enabled.
    ///
    /// Fails with [`CaptureError::AlreadyActive`] when another scope in this
    /// process is capturing logs.
    pub fn open(&self) -> Result<NotificationScope, CaptureError> {
        let capture = if self.inner.config.attach_logs() {
            Some(LogCapture::start(CapturedLog::create()?)?)
        } else {
            None
        };

        Ok(self.scope(capture))
    }

    /// Opens a scope that never captures logs, whatever the configuration says.
    #[must_use]
    pub fn open_without_capture(&self) -> NotificationScope {
        self.scope(None)
    }

    fn scope(&self, capture: Option<LogCapture>) -> NotificationScope {
        NotificationScope {
            inner: Arc::clone(&self.inner),
            capture,
            closed: false,
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// An open notification. Consumed by [`close`](Self::close) or
/// [`close_async`](Self::close_async); dropping it unclosed sends a
/// `Cancelled` failure notification.
#[must_use = "dropping a scope immediately sends a `Cancelled` notification"]
pub struct NotificationScope {
    inner: Arc<Inner>,
    capture: Option<LogCapture>,
    closed: bool,
}

/// A message ready for delivery, plus the log file to release afterwards.
struct Prepared {
    inner: Arc<Inner>,
    message: Result<OutgoingMessage, DeliveryError>,
    log: Option<CapturedLog>,
}

impl Prepared {
    /// Delivers on a dedicated thread with its own runtime, so the delivery
    /// outlives the caller's runtime being shut down.
    fn deliver_detached(self) -> DeliveryHandle {
        let slot = Arc::new(Mutex::new(Some(self)));
        let (sender, receiver) = oneshot::channel();

        let thread_slot = Arc::clone(&slot);
        let spawned = std::thread::Builder::new()
            .name("mailme-delivery".to_string())
            .spawn(move || {
                let prepared = thread_slot.lock().take();
                if let Some(prepared) = prepared {
                    let _ = sender.send(prepared.deliver_blocking());
                }
            });

        match spawned {
            Ok(thread) => DeliveryHandle::pending(receiver, thread),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to spawn delivery thread, delivering inline");
                let prepared = slot.lock().take();
                DeliveryHandle::ready(prepared.map_or_else(
                    || {
                        DeliveryReport::not_attempted(
                            SystemError::Internal("delivery already taken".to_string()).into(),
                        )
                    },
                    Self::deliver_blocking,
                ))
            }
        }
    }

    fn deliver_blocking(self) -> DeliveryReport {
        let Self { inner, message, log } = self;
        let report = match message {
            Ok(message) => inner
                .policy
                .deliver_blocking(inner.transport.as_ref(), &message),
            Err(error) => not_attempted(error),
        };
        release(log);
        report
    }
}

fn not_attempted(error: DeliveryError) -> DeliveryReport {
    tracing::error!(error = %error, "Notification message could not be built");
    DeliveryReport::not_attempted(error)
}

fn release(log: Option<CapturedLog>) {
    if let Some(log) = log
        && let Err(e) = log.release()
    {
        tracing::warn!(error = %e, "Failed to remove captured log file");
    }
}

impl NotificationScope {
    /// Path of the temporary file receiving captured logs, if capturing.
    #[must_use]
    pub fn log_path(&self) -> Option<&std::path::Path> {
        self.capture.as_ref().and_then(LogCapture::path)
    }

    /// Closes the scope and delivers the notification before returning.
    ///
    /// Safe to call from inside an async runtime: delivery then runs on a
    /// helper thread while the caller blocks.
    pub fn close(mut self, outcome: Outcome) -> DeliveryReport {
        self.prepare(&outcome).deliver_blocking()
    }

    /// Closes the scope and delivers the notification on a dedicated thread.
    ///
    /// With `async_mode` the returned handle is still pending; otherwise
    /// delivery has finished by the time this returns. Either way, dropping
    /// the future or the handle does not cancel the delivery, and neither
    /// does shutting down the runtime.
    pub async fn close_async(mut self, outcome: Outcome) -> DeliveryHandle {
        let handle = self.prepare(&outcome).deliver_detached();
        if self.inner.config.async_mode() {
            return handle;
        }
        DeliveryHandle::ready(handle.await)
    }

    /// Steps 1 and 2 of the exit sequence. Marks the scope closed.
    fn prepare(&mut self, outcome: &Outcome) -> Prepared {
        self.closed = true;
        let config = &self.inner.config;

        let log = self.capture.take().and_then(|capture| {
            capture
                .stop()
                .inspect_err(|e| tracing::warn!(error = %e, "Failed to finalize captured logs"))
                .ok()
        });
        let logs = log.as_ref().and_then(|log| {
            log.contents()
                .inspect_err(|e| tracing::warn!(error = %e, "Failed to read captured logs"))
                .ok()
        });

        let timestamp = Local::now();
        let context = RenderContext {
            title: config.subject(),
            outcome,
            logs: logs.as_deref(),
            timestamp,
        };
        let rendered = config.renderer().render(&context).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to render notification, sending a minimal message");
            RenderedMessage::fallback(&context)
        });

        let mut builder = MessageBuilder::new()
            .from(config.sender())
            .to_multiple(config.recipients())
            .subject(config.subject())
            .date(timestamp)
            .text(rendered.text)
            .html(rendered.html);

        if let Some(logs) = logs {
            let filename = format!("task_log_{}.txt", timestamp.format("%Y%m%d_%H%M%S"));
            builder = builder.attach(filename, "application/octet-stream", logs.into_bytes());
        }

        let message = builder
            .build()
            .map(|data| OutgoingMessage {
                sender: config.sender().to_string(),
                recipients: config.recipients().to_vec(),
                data,
            })
            .map_err(DeliveryError::from);

        Prepared {
            inner: Arc::clone(&self.inner),
            message,
            log,
        }
    }
}

impl Drop for NotificationScope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        tracing::warn!("Notification scope dropped without being closed, reporting cancellation");
        let prepared = self.prepare(&Outcome::cancelled());

        // Blocking a runtime worker in drop could stall other tasks.
        if tokio::runtime::Handle::try_current().is_ok() {
            drop(prepared.deliver_detached());
        } else {
            prepared.deliver_blocking();
        }
    }
}

/// Completion of a notification delivered by [`NotificationScope::close_async`].
///
/// Awaiting it yields the [`DeliveryReport`]. Dropping it detaches the
/// delivery thread, which still runs to completion.
#[must_use = "await the handle to observe the delivery report"]
pub struct DeliveryHandle {
    state: HandleState,
}

enum HandleState {
    Ready(Option<DeliveryReport>),
    Pending {
        receiver: oneshot::Receiver<DeliveryReport>,
        thread: std::thread::JoinHandle<()>,
    },
}

impl DeliveryHandle {
    const fn ready(report: DeliveryReport) -> Self {
        Self {
            state: HandleState::Ready(Some(report)),
        }
    }

    const fn pending(
        receiver: oneshot::Receiver<DeliveryReport>,
        thread: std::thread::JoinHandle<()>,
    ) -> Self {
        Self {
            state: HandleState::Pending { receiver, thread },
        }
    }

    /// Whether the delivery has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Ready(_) => true,
            HandleState::Pending { thread, .. } => thread.is_finished(),
        }
    }
}

impl Future for DeliveryHandle {
    type Output = DeliveryReport;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            HandleState::Ready(report) => Poll::Ready(report.take().unwrap_or_else(|| {
                DeliveryReport::not_attempted(
                    SystemError::Internal("delivery handle polled after completion".to_string())
                        .into(),
                )
            })),
            HandleState::Pending { receiver, .. } => Pin::new(receiver).poll(cx).map(|received| {
                received.unwrap_or_else(|_| {
                    DeliveryReport::not_attempted(
                        SystemError::Internal(
                            "delivery thread stopped before reporting".to_string(),
                        )
                        .into(),
                    )
                })
            }),
        }
    }
}

impl std::fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}
