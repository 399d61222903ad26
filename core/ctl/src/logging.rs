//! File logging for the CLI.
//!
//! Stdout carries command output, so logs go to a daily-rolling file under
//! `~/.taskwatch/logs`. The returned guard must live until `main` returns or
//! buffered lines are lost.

use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "taskwatch-ctl.log";

pub fn init() -> Option<WorkerGuard> {
    let dir = log_dir()?;
    if fs_err::create_dir_all(&dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .is_ok();

    installed.then_some(guard)
}

fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".taskwatch").join("logs"))
}

fn debug_enabled() -> bool {
    env::var("TASKWATCH_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}
