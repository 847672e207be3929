//! Tracing configuration for clipbridge.
//!
//! - Console output goes to stderr; stdout is reserved for `paste` output.
//! - A non-blocking `clipbridge.log` file is added when a log directory can
//!   be resolved. Failing to open it only disables the file layer.
//! - Records emitted through the `log` facade are bridged into tracing.
//! - `RUST_LOG` overrides the built-in directives.

use std::{fs, io, path::PathBuf, sync::OnceLock};

use anyhow::Context;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, fmt::writer::BoxMakeWriter, prelude::*, registry};

const LOG_FILE_NAME: &str = "clipbridge.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn is_development() -> bool {
    cfg!(debug_assertions)
}

/// Default filter directives.
///
/// - **Development**: debug for the workspace crates
/// - **Production**: info everywhere
fn build_filter_directives(is_dev: bool) -> Vec<String> {
    let level = if is_dev { "debug" } else { "info" };
    let mut directives = vec![level.to_string()];
    directives.extend(
        ["cb_platform", "cb_infra", "cb_server", "clipbridge", "clipbridge_lib"]
            .iter()
            .map(|target| format!("{target}={level}")),
    );
    // clipboard-rs backends log every poll at debug
    directives.push("clipboard_rs=warn".to_string());
    directives
}

/// Directory that receives `clipbridge.log`.
fn log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("clipbridge").join("logs"))
}

/// Initialize the global subscriber. Call once, before any logging.
///
/// ## Errors
///
/// Returns `Err` if a subscriber or `log` logger is already registered.
pub fn init_tracing_subscriber() -> anyhow::Result<()> {
    let filter_directives = build_filter_directives(is_development());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter_directives.join(",")));

    let stderr_writer: BoxMakeWriter = BoxMakeWriter::new(io::stderr);
    let file_writer = match build_file_writer() {
        Ok(writer) => Some(writer),
        Err(err) => {
            eprintln!("Failed to initialize file logging, logging to stderr only: {err:#}");
            None
        }
    };

    // "2025-01-15 10:30:45.123  INFO src/server.rs:42 cb_server::server: message"
    let stderr_layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::new(
            "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        ))
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_ansi(cfg!(not(test)))
        .with_writer(stderr_writer);

    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .with_timer(fmt::time::ChronoUtc::new(
                "%Y-%m-%d %H:%M:%S%.3f".to_string(),
            ))
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_ansi(false)
            .with_writer(writer)
    });

    tracing_log::LogTracer::init_with_filter(log::LevelFilter::Trace)
        .context("Failed to bridge log records into tracing")?;

    let subscriber = registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer);
    ::tracing::subscriber::set_global_default(subscriber)
        .context("Tracing subscriber already registered")?;

    Ok(())
}

fn build_file_writer() -> anyhow::Result<NonBlocking> {
    let logs_dir = log_dir().context("No local data directory on this platform")?;
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create log directory: {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(&logs_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    LOG_GUARD
        .set(guard)
        .map_err(|_| anyhow::anyhow!("Tracing log guard already initialized"))?;

    Ok(non_blocking)
}
