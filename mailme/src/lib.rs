//! Email notifications for monitored work.
//!
//! Open a scope around a unit of work; when the scope closes, one email
//! reports whether the work succeeded, optionally with every log line
//! emitted while it ran. Delivery problems are logged and never change the
//! outcome of the work itself.
//!
//! ```no_run
//! use mailme::{NotificationConfig, Notifier, Outcome};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! mailme::logging::init();
//!
//! let notifier = Notifier::new(
//!     NotificationConfig::builder()
//!         .email("ops@example.com")
//!         .subject("Nightly import")
//!         .attach_logs(true)
//!         .build()?,
//! );
//!
//! let scope = notifier.open()?;
//! tracing::info!("importing");
//! let report = scope.close(Outcome::Success);
//! println!("{report}");
//! # Ok(())
//! # }
//! ```
//!
//! [`notify`] and [`notify_async`] wrap a closure or a future and do the
//! opening and closing for you.

mod adapter;
pub mod config;
mod notifier;

pub use adapter::{notify, notify_async};
pub use config::{FileConfig, NotificationConfig, NotificationConfigBuilder, TemplateFiles};
pub use mailme_common::{
    CaptureError, ConfigError, Outcome, RenderError,
    capture::CaptureLayer,
    logging,
    render::{Render, RenderContext, RenderedMessage, Template},
};
pub use mailme_delivery::{DeliveryError, DeliveryReport, OutgoingMessage, RetryPolicy, Transport};
pub use notifier::{DeliveryHandle, NotificationScope, Notifier};
