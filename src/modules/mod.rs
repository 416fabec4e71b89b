// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod commands;
pub mod context;
pub mod credential;
pub mod database;
pub mod diagnostics;
pub mod directory;
pub mod error;
pub mod exec;
pub mod imap;
pub mod logger;
pub mod message;
pub mod provision;
pub mod reconcile;
pub mod settings;
pub mod smtp;
pub mod utils;
