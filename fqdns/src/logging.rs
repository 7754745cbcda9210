//! Sets up the global `tracing` subscriber: always logs to stdout, and
//! additionally to a rotating file when `--log-file` is given. Mirrors
//! the shape of the teacher's `firezone_bin_shared::setup_global_subscriber`
//! (a caller-supplied "additional layer" composed with the stdout layer),
//! adapted here to build that additional layer from a file path instead of
//! an IPC-forwarding layer.

use std::path::Path;

use tracing_log::LogTracer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt as _, EnvFilter, Layer as _, Registry};

/// Must be kept alive for the lifetime of the process — dropping it stops
/// the non-blocking file writer from flushing.
pub struct LoggingGuard(#[allow(dead_code)] Option<tracing_appender::non_blocking::WorkerGuard>);

pub fn init(level: tracing::Level, log_file: Option<&Path>) -> LoggingGuard {
    let filter = || {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(level).into())
            .from_env_lossy()
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("fqdns.log"));
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter())
                .boxed();

            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = Registry::default()
        .with(fmt::layer().with_filter(filter()))
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber).expect("global subscriber is only set once");
    LogTracer::init().expect("log -> tracing bridge is only installed once");

    LoggingGuard(guard)
}
