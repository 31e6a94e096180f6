use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{Layer, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt};

use crate::capture::CaptureLayer;

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Traces a line sent to the mail server.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// Traces a line received from the mail server.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

fn level_from_env(var: &str, default: LevelFilter) -> LevelFilter {
    std::env::var(var).map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

/// Installs the global subscriber: a compact console layer filtered by
/// `LOG_LEVEL`, plus the [`CaptureLayer`] filtered by `CAPTURE_LEVEL`
/// (default `INFO`).
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the caller is responsible for composing [`CaptureLayer`] into it.
pub fn init() -> bool {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let level = level_from_env("LOG_LEVEL", default);
    let capture_level = level_from_env("CAPTURE_LEVEL", LevelFilter::INFO);

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_writer(std::io::stderr)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level),
        )
        .with(CaptureLayer.with_filter(capture_level))
        .try_init()
        .is_ok()
}
