//! Bounded retry around a [`Transport`].

mod retry;

use std::{
    panic::{self, AssertUnwindSafe},
    time::Instant,
};

use mailme_common::tracing;

pub use retry::{RetryPolicy, backoff_delay};

use crate::{
    error::{DeliveryError, SystemError},
    transport::Transport,
    types::{AttemptResult, DeliveryAttempt, DeliveryReport, OutgoingMessage},
};

/// Drives a [`Transport`] until the message is sent, a non-temporary error
/// occurs, or the attempts allowed by the [`RetryPolicy`] are used up.
#[derive(Debug, Clone, Default)]
pub struct DeliveryPolicy {
    retry: RetryPolicy,
}

impl DeliveryPolicy {
    #[must_use]
    pub const fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    #[must_use]
    pub const fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Delivers `message`, never making more than `max_attempts` attempts
    /// (at least one).
    ///
    /// The outcome is reported, not raised: after exhaustion the last error
    /// is the report's result.
    pub async fn deliver(&self, transport: &dyn Transport, message: &OutgoingMessage) -> DeliveryReport {
        let mut attempts = Vec::new();
        let mut index = 1;

        loop {
            let started = Instant::now();
            let result = transport.send(message).await;
            let elapsed = started.elapsed();

            let error = match result {
                Ok(()) => {
                    attempts.push(DeliveryAttempt {
                        index,
                        result: AttemptResult::Sent,
                        elapsed,
                    });
                    tracing::info!(
                        attempt = index,
                        recipients = ?message.recipients,
                        "Notification delivered"
                    );
                    return DeliveryReport {
                        attempts,
                        result: Ok(()),
                    };
                }
                Err(error) => error,
            };

            attempts.push(DeliveryAttempt {
                index,
                result: AttemptResult::from_error(&error),
                elapsed,
            });

            if !error.is_temporary() {
                tracing::error!(attempt = index, error = %error, "Notification delivery failed permanently");
                return DeliveryReport {
                    attempts,
                    result: Err(error),
                };
            }

            if self.retry.is_final_attempt(index) {
                tracing::error!(
                    attempts = index,
                    error = %error,
                    "Notification delivery failed, retries exhausted"
                );
                return DeliveryReport {
                    attempts,
                    result: Err(error),
                };
            }

            let delay = self.retry.delay_after(index);
            tracing::warn!(
                attempt = index,
                remaining = self.retry.remaining_attempts(index),
                delay = ?delay,
                error = %error,
                "Notification delivery attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            index += 1;
        }
    }

    /// Blocking form of [`DeliveryPolicy::deliver`].
    ///
    /// Runs on a fresh current-thread runtime. When called from inside a
    /// runtime, that runtime cannot be blocked on, so the work moves to a
    /// scoped helper thread and the caller waits for it.
    pub fn deliver_blocking(&self, transport: &dyn Transport, message: &OutgoingMessage) -> DeliveryReport {
        if tokio::runtime::Handle::try_current().is_ok() {
            return std::thread::scope(|scope| {
                scope
                    .spawn(|| self.deliver_on_new_runtime(transport, message))
                    .join()
                    .unwrap_or_else(|_| {
                        DeliveryReport::not_attempted(
                            SystemError::Internal("delivery thread panicked".to_string()).into(),
                        )
                    })
            });
        }

        self.deliver_on_new_runtime(transport, message)
    }

    fn deliver_on_new_runtime(&self, transport: &dyn Transport, message: &OutgoingMessage) -> DeliveryReport {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => panic::catch_unwind(AssertUnwindSafe(|| {
                runtime.block_on(self.deliver(transport, message))
            }))
            .unwrap_or_else(|_| {
                DeliveryReport::not_attempted(
                    SystemError::Internal("delivery panicked".to_string()).into(),
                )
            }),
            Err(e) => DeliveryReport::not_attempted(DeliveryError::System(SystemError::Internal(
                format!("failed to start delivery runtime: {e}"),
            ))),
        }
    }
}
