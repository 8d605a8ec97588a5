//! Tracing and diagnostics bootstrap for the CLI.
//!
//! Library users bring their own subscriber; only the binary calls
//! [`init`]. Filtering defaults to `info` for this crate and `error` for
//! everything else, overridable through `RUST_LOG`.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber and the miette panic hook.
///
/// `debug` widens the default filter to `debug` for this crate. Calling
/// twice is harmless; the second attempt is ignored.
pub fn init(debug: bool) {
    let default = if debug {
        "error,reportweave=debug"
    } else {
        "error,reportweave=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new("error"));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();

    miette::set_panic_hook();
}
