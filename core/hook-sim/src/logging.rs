//! Logging setup: stderr plus a daily rolling file.
//!
//! `OVERLAY_HOOK_DEBUG_LOG=1` forces debug level; otherwise `RUST_LOG` applies
//! with an `info` fallback. Stdout stays clean for the JSON summary.

use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "hook-sim.log";

fn debug_enabled() -> bool {
    env::var("OVERLAY_HOOK_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("overlay-hook").join("logs"))
}

/// Initializes the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init() -> Option<WorkerGuard> {
    let filter = if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let file = log_dir().and_then(|dir| {
        fs_err::create_dir_all(&dir).ok()?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        Some(tracing_appender::non_blocking(appender))
    });

    match file {
        Some((writer, guard)) => {
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .try_init();
            None
        }
    }
}
