// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::logger::LocalTimer;
use crate::modules::settings::cli::SETTINGS;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

pub static LOG_WORKER_GUARD: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

pub fn setup_file_logger(level: Level) -> Result<(), tracing::dispatcher::SetGlobalDefaultError> {
    let with_ansi = SETTINGS.keykeeper_ansi_logs;

    let (writer, guard) = match tool_log_writer() {
        Some(pair) => pair,
        None => {
            eprintln!(
                "Cannot write logs under '{}', falling back to stderr",
                SETTINGS.keykeeper_log_dir
            );
            tracing_appender::non_blocking(std::io::stderr())
        }
    };
    let _ = LOG_WORKER_GUARD.set(vec![guard]);

    let layer = fmt::layer()
        .with_timer(LocalTimer)
        .with_ansi(with_ansi)
        .with_level(true)
        .with_writer(writer)
        .with_target(true);

    let subscriber = tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(layer);

    tracing::subscriber::set_global_default(subscriber)
}

fn tool_log_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let rolling = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("keykeeper-mail")
        .max_log_files(SETTINGS.keykeeper_max_log_files)
        .build(&SETTINGS.keykeeper_log_dir)
        .ok()?;
    Some(tracing_appender::non_blocking(rolling))
}
