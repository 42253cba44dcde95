//! Logger configuration and output formatting.

use chrono::Local;
use env_logger::{Builder, Env};
use std::env;
use std::io::Write;

/// Configure and initialize the application's logging system.
///
/// Emits single-line records shaped as
/// `timestamp | LEVEL | file:line | message`, colored per level unless
/// `NO_COLOR` is set. The filter comes from `RUST_LOG` (default `info`).
/// Call once at startup.
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();

    Builder::from_env(Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            let level = record.level();
            let level_display = if no_color {
                format!("{:<5}", level)
            } else {
                let color = match level {
                    log::Level::Error => "\x1b[31m",
                    log::Level::Warn => "\x1b[33m",
                    log::Level::Info => "\x1b[32m",
                    log::Level::Debug => "\x1b[34m",
                    log::Level::Trace => "\x1b[35m",
                };
                format!("{}{:<5}\x1b[0m", color, level)
            };

            writeln!(
                buf,
                "{} | {} | {}:{} | {}",
                Local::now().format("%b %d %y %I:%M:%S %p"),
                level_display,
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args(),
            )
        })
        .init();
}
