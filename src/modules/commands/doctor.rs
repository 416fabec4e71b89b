// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::print_json;
use crate::modules::context::{account_manager, app_secret, resolver};
use crate::modules::database::DatabaseHandle;
use crate::modules::diagnostics::env::{apply_env_edits, propose};
use crate::modules::diagnostics::{
    check_tables, diagnose_account, ConfigSummary, DiagnosticReport, Severity, APP_USER_COLUMNS,
    DOMAIN_COLUMNS, MAIL_USER_COLUMNS,
};
use crate::modules::directory::mysql::{MysqlMailDirectory, MysqlUserDirectory, USERS_TABLE};
use crate::modules::error::KeyKeeperResult;
use crate::modules::provision::maps;
use crate::modules::settings::cli::Settings;
use crate::raise_error;
use std::path::Path;
use tracing::{info, warn};

/// Gathers everything the report covers. Each failed step becomes a finding and the
/// remaining steps still run where they can.
pub async fn collect_report(settings: &Settings, user_id: &str) -> DiagnosticReport {
    let mut report = DiagnosticReport::new(user_id, ConfigSummary::from_settings(settings));

    let resolver = match resolver(settings) {
        Ok(resolver) => resolver,
        Err(e) => {
            report.record(Severity::Error, "database_url", e.to_string());
            return report;
        }
    };
    let primary = resolver.primary().cloned();

    let mail_handle = match resolver.resolve().await {
        Ok((handle, source)) => {
            let database = handle.current_database().await.unwrap_or_else(|e| {
                warn!("Could not read the current database name: {}", e);
                None
            });
            let dedicated = handle.is_dedicated();
            report.set_resolution(Ok((source, database, dedicated)));
            Some(handle)
        }
        Err(e) => {
            report.set_resolution(Err(e));
            None
        }
    };

    let mail_tables: [(&str, &[&str]); 2] = [
        (settings.mail_users_table.as_str(), &MAIL_USER_COLUMNS),
        (settings.mail_domains_table.as_str(), &DOMAIN_COLUMNS),
    ];
    if let Some(handle) = &mail_handle {
        match check_tables(handle, &mail_tables).await {
            Ok(tables) => report.add_tables(tables),
            Err(e) => report.record(
                Severity::Error,
                "schema",
                format!("mail schema check failed: {}", e),
            ),
        }
    }

    let Some(pool) = primary else {
        report.record(
            Severity::Error,
            "user",
            "application users cannot be read without DATABASE_URL",
        );
        if let Some(handle) = mail_handle {
            handle.close().await;
        }
        return report;
    };

    let app_handle = DatabaseHandle::Primary(pool.clone());
    let app_tables: [(&str, &[&str]); 1] = [(USERS_TABLE, &APP_USER_COLUMNS)];
    match check_tables(&app_handle, &app_tables).await {
        Ok(tables) => report.add_tables(tables),
        Err(e) => report.record(
            Severity::Error,
            "schema",
            format!("application schema check failed: {}", e),
        ),
    }
    let users = MysqlUserDirectory::new(app_handle);

    if let Some(handle) = mail_handle {
        let mail = MysqlMailDirectory::new(
            handle,
            &settings.mail_users_table,
            &settings.mail_domains_table,
        );
        let secret = app_secret(settings).ok();
        let manager = account_manager(settings);
        diagnose_account(&mut report, &users, &mail, &manager, secret.as_ref()).await;
        mail.close().await;
    }

    if let Err(e) = pool.disconnect().await {
        warn!("Failed to close primary database pool: {}", e);
    }
    report
}

pub async fn cmd_diagnose(settings: &Settings, user_id: &str, json: bool) -> KeyKeeperResult<()> {
    let report = collect_report(settings, user_id).await;
    if json {
        print_json(&report)?;
    } else {
        print!("{}", report.render_text());
    }
    match report.error_code() {
        Some(code) => Err(raise_error!(
            format!(
                "{} problem(s) found for user {}",
                report
                    .findings
                    .iter()
                    .filter(|f| f.severity == Severity::Error)
                    .count(),
                user_id
            ),
            code
        )),
        None => Ok(()),
    }
}

pub async fn cmd_fix(
    settings: &Settings,
    user_id: &str,
    env_file: &Path,
    apply: bool,
) -> KeyKeeperResult<()> {
    let report = collect_report(settings, user_id).await;
    let proposal = propose(&report);
    print!("{}", proposal.render_text());
    if proposal.edits.is_empty() {
        return Ok(());
    }
    if !apply {
        println!(
            "\nRe-run with --apply to write these changes to {}",
            env_file.display()
        );
        return Ok(());
    }
    let current = maps::read_or_empty(env_file).await?;
    let updated = apply_env_edits(&current, &proposal.edits);
    maps::write_atomic(env_file, &updated)
        .await
        .map_err(|e| e.context(format!("update {}", env_file.display())))?;
    info!(
        "Wrote {} setting(s) to {}",
        proposal.edits.len(),
        env_file.display()
    );
    println!(
        "\nWrote {} setting(s) to {}",
        proposal.edits.len(),
        env_file.display()
    );
    Ok(())
}
