// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use mimalloc::MiMalloc;
use modules::{logger, settings::cli::SETTINGS};
use std::process::ExitCode;
use tracing::debug;

mod modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    // Values from .env must be in the environment before clap reads it.
    dotenvy::dotenv().ok();

    if let Err(error) = logger::initialize_logging() {
        eprintln!("{}", error.report());
        return ExitCode::FAILURE;
    }
    debug!(
        "keykeeper-mail {} [{}] running `{}`",
        keykeeper_version!(),
        env!("GIT_HASH"),
        SETTINGS.command.name()
    );

    match SETTINGS.command.execute(&SETTINGS).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!("HTTP-equivalent status {}", err.code().status());
            eprintln!("{}", err.report());
            ExitCode::FAILURE
        }
    }
}
