//! Tracing initialization for applications embedding the client.
//!
//! The library itself only emits `tracing` events; applications opt into a
//! subscriber with [`init_tracing`].

use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable overriding the configured filter.
pub const LOG_ENV: &str = "YTCLIENT_LOG";

/// Install a global fmt subscriber.
///
/// `YTCLIENT_LOG` takes precedence over `config.level`. When `config.file` is
/// set, events go through a non-blocking file writer; keep the returned guard
/// alive for as long as logs should be flushed. Returns `None` when writing to
/// stderr or when a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = env::var(LOG_ENV)
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| EnvFilter::try_new(&config.level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let json = config.format == "json";

    let Some(path) = &config.file else {
        let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
        let _ = if json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        return None;
    };

    let file = match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("ERROR: Unable to open log file '{}': {e}", path.display());
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.ok().map(|()| guard)
}
