use std::fmt::{self, Write};

use tracing::{
    Event, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context};

/// `tracing_subscriber` layer that feeds the active [`LogCapture`](super::LogCapture).
///
/// Each event becomes one line:
/// `2024-05-01 12:00:00.123 - my_app::jobs - INFO - message key=value`.
/// The layer is inert while no capture is active.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureLayer;

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !super::is_active() {
            return;
        }

        let metadata = event.metadata();
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let mut line = String::with_capacity(128);
        let _ = writeln!(
            line,
            "{} - {} - {} - {}{}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            metadata.target(),
            metadata.level(),
            visitor.message,
            visitor.fields,
        );

        super::append(&line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}
