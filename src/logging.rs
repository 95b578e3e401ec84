//! Structured logging setup (SPEC_FULL.md §1, §6.2), built the same way
//! the teacher crate wires `tracing-subscriber`: a `registry()` with an
//! `EnvFilter` plus an ANSI `fmt` layer on stdout, and an optional
//! non-ANSI file layer behind a leaked `tracing-appender` guard.

use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;

use crate::config::LoggingConfig;

/// Initializes the global `tracing` subscriber from a resolved
/// [`LoggingConfig`]. Safe to call once at process start; later calls are
/// silently ignored (`try_init` swallows the "already set" error so tests
/// that build several [`crate::server::Listener`]s in one process don't
/// panic).
pub fn init(cfg: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_new(&cfg.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stdout),
    );

    if let Some(file_layer) = cfg.file.as_deref().and_then(build_file_layer) {
        let _ = registry.with(file_layer).try_init();
    } else {
        let _ = registry.try_init();
    }
}

fn build_file_layer(
    path: &std::path::Path,
) -> Option<impl tracing_subscriber::Layer<tracing_subscriber::Registry>> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path.file_name()?;

    if std::fs::create_dir_all(dir).is_err() {
        eprintln!(
            "failed to create log directory '{}', continuing with stdout logging only",
            dir.display()
        );
        return None;
    }

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    // Kept alive for the process lifetime; there is exactly one logging
    // init per process so this is not an unbounded leak.
    let _leaked: &'static _ = Box::leak(Box::new(guard));

    Some(
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(non_blocking),
    )
}
