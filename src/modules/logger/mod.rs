// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::logger::file::setup_file_logger;
use crate::modules::settings::cli::SETTINGS;
use crate::raise_error;
use chrono::Local;
use tracing::Level;
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

mod file;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

pub fn initialize_logging() -> KeyKeeperResult<()> {
    let level = parse_log_level(&SETTINGS.keykeeper_log_level)?;
    if SETTINGS.keykeeper_log_to_file {
        setup_file_logger(level)
    } else {
        setup_stderr_logger(level)
    }
    .map_err(|e| {
        raise_error!(
            format!("Failed to install log subscriber: {}", e),
            ErrorCode::InternalError
        )
    })
}

// Reports go to stdout, so diagnostics logging stays on stderr.
fn setup_stderr_logger(level: Level) -> Result<(), tracing::dispatcher::SetGlobalDefaultError> {
    let with_ansi = SETTINGS.keykeeper_ansi_logs;

    let format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_target(true)
        .with_timer(LocalTimer);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(with_ansi)
        .with_writer(std::io::stderr)
        .event_format(format)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

fn parse_log_level(value: &str) -> KeyKeeperResult<Level> {
    value.parse::<Level>().map_err(|_| {
        raise_error!(
            format!(
                "Invalid log level specified. Use one of: error, warn, info, debug, trace. \
                 The log level you currently specified is 'keykeeper_log_level'='{}'",
                value
            ),
            ErrorCode::MissingConfiguration
        )
    })
}
