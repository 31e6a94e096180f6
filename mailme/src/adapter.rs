//! Wrappers that run a closure or future inside a notification scope.
//!
//! The wrapped work's result is returned unchanged, after the notification
//! for it was handled. Panics are reported as failures and then resumed.
//! Delivery problems never reach the caller; they are logged by the
//! delivery policy.

use std::{
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
};

use futures_util::FutureExt;
use mailme_common::{CaptureError, Outcome, tracing};

use crate::notifier::{NotificationScope, Notifier};

/// Opens a scope, falling back to one without log capture when the capture
/// is owned by another scope. The work always runs and is always reported.
fn open_scope(notifier: &Notifier) -> NotificationScope {
    notifier.open().unwrap_or_else(|e| {
        match e {
            CaptureError::AlreadyActive => tracing::warn!(
                "Log capture already active in this process, notifying without logs"
            ),
            e => tracing::warn!(error = %e, "Failed to start log capture, notifying without logs"),
        }
        notifier.open_without_capture()
    })
}

/// Runs `work` and sends one notification describing how it ended.
///
/// ```no_run
/// use std::convert::Infallible;
///
/// use mailme::{NotificationConfig, Notifier, notify};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let notifier = Notifier::new(
///     NotificationConfig::builder()
///         .email("ops@example.com")
///         .subject("Job")
///         .build()?,
/// );
///
/// let answer = notify(&notifier, || Ok::<_, Infallible>(42))?;
/// assert_eq!(answer, 42);
/// # Ok(())
/// # }
/// ```
pub fn notify<T, E, F>(notifier: &Notifier, work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: fmt::Display,
{
    let scope = open_scope(notifier);

    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => {
            let _report = scope.close(Outcome::from_result(&result));
            result
        }
        Err(payload) => {
            let _report = scope.close(Outcome::from_panic(&*payload));
            panic::resume_unwind(payload)
        }
    }
}

/// Async form of [`notify`].
///
/// If the returned future is dropped before `work` completes, a `Cancelled`
/// failure notification is sent on a background task.
pub async fn notify_async<T, E, Fut>(notifier: &Notifier, work: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let scope = open_scope(notifier);

    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => {
            // In async mode the handle is still pending; dropping it detaches the delivery.
            drop(scope.close_async(Outcome::from_result(&result)).await);
            result
        }
        Err(payload) => {
            drop(scope.close_async(Outcome::from_panic(&*payload)).await);
            panic::resume_unwind(payload)
        }
    }
}
