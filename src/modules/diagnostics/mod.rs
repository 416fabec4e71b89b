// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Read-only inspection of one user's mail linkage, consolidated into a single report.

use crate::modules::credential::crypt::CryptUtility;
use crate::modules::credential::dovecot::{
    is_valid_dovecot_hash, split_scheme, verify_dovecot_hash, HashScheme,
};
use crate::modules::credential::envelope::{decrypt_password, AppSecret, DEVELOPMENT_SECRET};
use crate::modules::database::resolver::ResolutionSource;
use crate::modules::database::url::DatabaseUrl;
use crate::modules::database::DatabaseHandle;
use crate::modules::directory::{MailDirectory, UserDirectory};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::exec::CommandRunner;
use crate::modules::provision::MailAccountManager;
use crate::modules::reconcile::{IdentityReconciler, ReconciliationResult};
use crate::modules::settings::cli::{CryptUtilityKind, Environment, Settings};
use crate::utc_now;
use serde::Serialize;
use std::fmt::Write;

pub mod env;
#[cfg(test)]
mod tests;

pub const MAIL_USER_COLUMNS: [&str; 6] = ["id", "domain_id", "username", "email", "password", "user_id"];
pub const DOMAIN_COLUMNS: [&str; 2] = ["id", "name"];
pub const APP_USER_COLUMNS: [&str; 3] = ["id", "email", "mail_password"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub check: &'static str,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretState {
    Missing,
    DevelopmentDefault,
    Configured,
}

/// The settings that decide where mail data lives and how it is provisioned.
/// Credentials never appear here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfigSummary {
    pub environment: String,
    pub database_url: Option<String>,
    pub database_url_valid: bool,
    pub use_main_db_for_mail: bool,
    pub mail_db_host: Option<String>,
    pub mail_db_user_set: bool,
    pub mail_db_name: String,
    pub mail_users_table: String,
    pub mail_domains_table: String,
    pub backend: String,
    pub mail_dir: String,
    pub postfix_config_dir: String,
    pub crypt_utility: String,
    pub app_secret: SecretState,
    pub use_real_mail_server: bool,
}

impl ConfigSummary {
    pub fn from_settings(settings: &Settings) -> Self {
        let parsed_url = settings.database_url.as_deref().map(DatabaseUrl::parse);
        let app_secret = match settings
            .app_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            None => SecretState::Missing,
            Some(DEVELOPMENT_SECRET) => SecretState::DevelopmentDefault,
            Some(_) => SecretState::Configured,
        };
        Self {
            environment: settings.keykeeper_env.to_string(),
            database_url: match &parsed_url {
                Some(Ok(url)) => Some(url.redacted()),
                Some(Err(_)) => Some("<unparseable>".into()),
                None => None,
            },
            database_url_valid: matches!(parsed_url, Some(Ok(_))),
            use_main_db_for_mail: settings.use_main_db_for_mail,
            mail_db_host: settings.mail_db_host().map(String::from),
            mail_db_user_set: settings
                .mail_db_user
                .as_deref()
                .is_some_and(|u| !u.trim().is_empty()),
            mail_db_name: settings.mail_db_name.clone(),
            mail_users_table: settings.mail_users_table.clone(),
            mail_domains_table: settings.mail_domains_table.clone(),
            backend: settings.backend_label(),
            mail_dir: settings.mail_dir.clone(),
            postfix_config_dir: settings.postfix_config_dir.clone(),
            crypt_utility: match settings.mail_crypt_utility {
                CryptUtilityKind::Openssl => "openssl".into(),
                CryptUtilityKind::Native => "native".into(),
            },
            app_secret,
            use_real_mail_server: settings.use_real_mail_server,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production.to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolutionInfo {
    pub source: ResolutionSource,
    pub database: Option<String>,
    pub dedicated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableCheck {
    pub table: String,
    pub exists: bool,
    pub missing_columns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub status: String,
    pub has_mail_password: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HashCheck {
    pub scheme: Option<HashScheme>,
    pub valid: bool,
    pub degraded: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordCheck {
    /// No linked mail account to compare against.
    Skipped,
    NotStored,
    /// The stored copy does not decrypt with the current `APP_SECRET`.
    Undecryptable,
    Matches,
    Mismatch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccountDiagnosis {
    pub user: Option<UserSummary>,
    pub reconciliation: Option<ReconciliationResult>,
    pub hash: Option<HashCheck>,
    pub password: PasswordCheck,
    pub backend_exists: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    pub user_id: String,
    pub generated_at: i64,
    pub config: ConfigSummary,
    pub resolution: Option<ResolutionInfo>,
    pub tables: Vec<TableCheck>,
    pub account: Option<AccountDiagnosis>,
    pub findings: Vec<Finding>,
}

impl DiagnosticReport {
    pub fn new(user_id: &str, config: ConfigSummary) -> Self {
        let mut report = Self {
            user_id: user_id.to_string(),
            generated_at: utc_now!(),
            config,
            resolution: None,
            tables: Vec::new(),
            account: None,
            findings: Vec::new(),
        };
        report.check_config();
        report
    }

    pub fn record(&mut self, severity: Severity, check: &'static str, message: impl Into<String>) {
        self.findings.push(Finding {
            severity,
            check,
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    /// The error family of the first failed check, if any check failed.
    pub fn error_code(&self) -> Option<ErrorCode> {
        let finding = self.findings.iter().find(|f| f.severity == Severity::Error)?;
        Some(match finding.check {
            "app_secret" | "database_url" | "resolution" => ErrorCode::MissingConfiguration,
            "reconciliation" => ErrorCode::LinkConflict,
            "password" => ErrorCode::DecodeFailed,
            "hash" | "backend" => ErrorCode::ProvisioningFailed,
            "schema" => ErrorCode::DatabaseError,
            _ => ErrorCode::ResourceNotFound,
        })
    }

    fn check_config(&mut self) {
        match self.config.app_secret {
            SecretState::Missing if self.config.is_production() => {
                self.record(Severity::Error, "app_secret", "APP_SECRET is not set")
            }
            SecretState::Missing => self.record(
                Severity::Warning,
                "app_secret",
                "APP_SECRET is not set; the development default secret is in use",
            ),
            SecretState::DevelopmentDefault => self.record(
                if self.config.is_production() {
                    Severity::Error
                } else {
                    Severity::Warning
                },
                "app_secret",
                "APP_SECRET is the public development default",
            ),
            SecretState::Configured => {}
        }
        if self.config.database_url.is_none() {
            self.record(Severity::Error, "database_url", "DATABASE_URL is not set");
        } else if !self.config.database_url_valid {
            self.record(
                Severity::Error,
                "database_url",
                "DATABASE_URL is not a mysql:// URL",
            );
        }
        if !self.config.use_real_mail_server {
            self.record(
                Severity::Info,
                "use_real_mail_server",
                "USE_REAL_MAIL_SERVER is off; provisioning commands only run as a dry run",
            );
        }
    }

    /// Records the outcome of database resolution; a failure is kept as a finding.
    pub fn set_resolution(
        &mut self,
        outcome: KeyKeeperResult<(ResolutionSource, Option<String>, bool)>,
    ) {
        match outcome {
            Ok((source, database, dedicated)) => {
                self.resolution = Some(ResolutionInfo {
                    source,
                    database,
                    dedicated,
                })
            }
            Err(e) => self.record(
                Severity::Error,
                "resolution",
                format!("mail database could not be resolved: {}", e),
            ),
        }
    }

    pub fn add_tables(&mut self, tables: Vec<TableCheck>) {
        for table in &tables {
            if !table.exists {
                self.record(
                    Severity::Error,
                    "schema",
                    format!("table `{}` does not exist", table.table),
                );
            } else if !table.missing_columns.is_empty() {
                self.record(
                    Severity::Error,
                    "schema",
                    format!(
                        "table `{}` is missing columns: {}",
                        table.table,
                        table.missing_columns.join(", ")
                    ),
                );
            }
        }
        self.tables.extend(tables);
    }

    pub fn table(&self, name: &str) -> Option<&TableCheck> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Plain-text rendering for terminals.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Mail linkage report for user {}", self.user_id);
        let _ = writeln!(out, "\nConfiguration");
        let _ = writeln!(out, "  environment:          {}", self.config.environment);
        let _ = writeln!(
            out,
            "  DATABASE_URL:         {}",
            self.config.database_url.as_deref().unwrap_or("<unset>")
        );
        let _ = writeln!(
            out,
            "  USE_MAIN_DB_FOR_MAIL: {}",
            self.config.use_main_db_for_mail
        );
        let _ = writeln!(
            out,
            "  MAIL_DB_HOST:         {}",
            self.config.mail_db_host.as_deref().unwrap_or("<unset>")
        );
        let _ = writeln!(
            out,
            "  mail tables:          {} / {}",
            self.config.mail_users_table, self.config.mail_domains_table
        );
        let _ = writeln!(out, "  backend:              {}", self.config.backend);
        let _ = writeln!(out, "  crypt utility:        {}", self.config.crypt_utility);

        let _ = writeln!(out, "\nResolution");
        match &self.resolution {
            Some(info) => {
                let _ = writeln!(
                    out,
                    "  {} ({}{})",
                    info.source,
                    info.database.as_deref().unwrap_or("unknown database"),
                    if info.dedicated { ", dedicated" } else { "" }
                );
            }
            None => {
                let _ = writeln!(out, "  unresolved");
            }
        }

        if !self.tables.is_empty() {
            let _ = writeln!(out, "\nSchema");
            for table in &self.tables {
                let state = if !table.exists {
                    "missing".to_string()
                } else if table.missing_columns.is_empty() {
                    "ok".to_string()
                } else {
                    format!("missing columns {}", table.missing_columns.join(", "))
                };
                let _ = writeln!(out, "  {:<24} {}", table.table, state);
            }
        }

        if let Some(account) = &self.account {
            let _ = writeln!(out, "\nAccount");
            match &account.user {
                Some(user) => {
                    let _ = writeln!(
                        out,
                        "  user:           {} <{}> ({}, mail password {})",
                        user.id,
                        user.email,
                        user.status,
                        if user.has_mail_password {
                            "stored"
                        } else {
                            "not stored"
                        }
                    );
                }
                None => {
                    let _ = writeln!(out, "  user:           not found");
                }
            }
            if let Some(result) = &account.reconciliation {
                let _ = writeln!(out, "  reconciliation: {}", result.label());
                match result {
                    ReconciliationResult::Linked { account }
                    | ReconciliationResult::UnlinkedMatch { account } => {
                        let _ = writeln!(
                            out,
                            "                  virtual user {} ({})",
                            account.id, account.email
                        );
                    }
                    ReconciliationResult::ConflictingLink {
                        account,
                        other_user_id,
                    } => {
                        let _ = writeln!(
                            out,
                            "                  virtual user {} ({}) belongs to {}",
                            account.id, account.email, other_user_id
                        );
                    }
                    ReconciliationResult::FormatMismatch { candidates } => {
                        for candidate in candidates {
                            let _ = writeln!(
                                out,
                                "                  candidate {} ({}) user_id={}",
                                candidate.id,
                                candidate.email,
                                candidate.user_id.as_deref().unwrap_or("NULL")
                            );
                        }
                    }
                    ReconciliationResult::NotFound => {}
                }
            }
            if let Some(hash) = &account.hash {
                let _ = writeln!(
                    out,
                    "  stored hash:    {} ({}{})",
                    hash.scheme
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "unknown scheme".into()),
                    if hash.valid { "valid" } else { "malformed" },
                    if hash.degraded { ", degraded" } else { "" }
                );
            }
            let _ = writeln!(out, "  password check: {:?}", account.password);
            if let Some(exists) = account.backend_exists {
                let _ = writeln!(
                    out,
                    "  mailbox:        {}",
                    if exists { "present" } else { "absent" }
                );
            }
        }

        let _ = writeln!(out, "\nFindings");
        if self.findings.is_empty() {
            let _ = writeln!(out, "  none");
        }
        for finding in &self.findings {
            let _ = writeln!(
                out,
                "  [{:?}] {}: {}",
                finding.severity, finding.check, finding.message
            );
        }
        out
    }
}

/// Existence of each expected table and which of its expected columns are absent.
pub async fn check_tables(
    handle: &DatabaseHandle,
    expected: &[(&str, &[&str])],
) -> KeyKeeperResult<Vec<TableCheck>> {
    let mut checks = Vec::with_capacity(expected.len());
    for (table, columns) in expected {
        let exists = handle.table_exists(table).await?;
        let mut missing_columns = Vec::new();
        if exists {
            for column in columns.iter() {
                if !handle.column_exists(table, column).await? {
                    missing_columns.push(column.to_string());
                }
            }
        }
        checks.push(TableCheck {
            table: table.to_string(),
            exists,
            missing_columns,
        });
    }
    Ok(checks)
}

/// User, reconciliation, stored hash, password round trip and backend presence.
/// Lookup failures become findings so the rest of the report still renders.
pub async fn diagnose_account<U, M, R, C>(
    report: &mut DiagnosticReport,
    users: &U,
    mail: &M,
    manager: &MailAccountManager<R, C>,
    secret: Option<&AppSecret>,
) where
    U: UserDirectory,
    M: MailDirectory,
    R: CommandRunner,
    C: CryptUtility,
{
    let user_id = report.user_id.clone();
    let mut diagnosis = AccountDiagnosis {
        user: None,
        reconciliation: None,
        hash: None,
        password: PasswordCheck::Skipped,
        backend_exists: None,
    };

    let user = match users.find_user(&user_id).await {
        Ok(user) => user,
        Err(e) => {
            report.record(
                Severity::Error,
                "user",
                format!("user lookup failed: {}", e),
            );
            None
        }
    };
    match &user {
        Some(user) => {
            diagnosis.user = Some(UserSummary {
                id: user.id.clone(),
                email: user.email.clone(),
                status: user.status.clone(),
                has_mail_password: user.mail_password.is_some(),
            })
        }
        None => report.record(
            Severity::Error,
            "user",
            format!("no application user with id {}", user_id),
        ),
    }

    match IdentityReconciler::new(users, mail)
        .find_or_explain_mismatch(&user_id)
        .await
    {
        Ok(result) => {
            explain_reconciliation(report, &result);
            diagnosis.reconciliation = Some(result);
        }
        Err(e) => report.record(
            Severity::Error,
            "reconciliation",
            format!("reconciliation failed: {}", e),
        ),
    }

    let account = diagnosis
        .reconciliation
        .as_ref()
        .and_then(|result| match result {
            ReconciliationResult::Linked { account }
            | ReconciliationResult::UnlinkedMatch { account } => Some(account.clone()),
            _ => None,
        });

    if let Some(account) = &account {
        let valid = is_valid_dovecot_hash(&account.password);
        let scheme = split_scheme(&account.password).map(|(scheme, _)| scheme);
        let degraded = scheme == Some(HashScheme::Plain);
        if !valid {
            report.record(
                Severity::Error,
                "hash",
                format!(
                    "stored password for {} is not a valid Dovecot hash",
                    account.email
                ),
            );
        } else if degraded {
            report.record(
                Severity::Warning,
                "hash",
                format!("{} is stored with a PLAIN password", account.email),
            );
        }
        diagnosis.hash = Some(HashCheck {
            scheme,
            valid,
            degraded,
        });

        diagnosis.password = match (user.as_ref().and_then(|u| u.mail_password.as_deref()), secret)
        {
            (None, _) => {
                report.record(
                    Severity::Warning,
                    "password",
                    "the user has no stored mail password",
                );
                PasswordCheck::NotStored
            }
            (Some(_), None) => {
                report.record(
                    Severity::Warning,
                    "password",
                    "APP_SECRET unavailable; stored mail password not checked",
                );
                PasswordCheck::Skipped
            }
            (Some(envelope), Some(secret)) => match decrypt_password(envelope, secret) {
                Err(e) => {
                    report.record(
                        Severity::Error,
                        "password",
                        format!("stored mail password does not decrypt: {}", e),
                    );
                    PasswordCheck::Undecryptable
                }
                Ok(plaintext) if verify_dovecot_hash(&plaintext, &account.password) => {
                    PasswordCheck::Matches
                }
                Ok(_) => {
                    report.record(
                        Severity::Error,
                        "password",
                        "stored mail password does not match the mailbox hash",
                    );
                    PasswordCheck::Mismatch
                }
            },
        };

        match manager.exists(&account.email).await {
            Ok(exists) => {
                if !exists {
                    report.record(
                        Severity::Error,
                        "backend",
                        format!(
                            "{} has a database row but no mailbox on the mail server",
                            account.email
                        ),
                    );
                }
                diagnosis.backend_exists = Some(exists);
            }
            Err(e) => report.record(
                Severity::Warning,
                "backend",
                format!("mailbox existence check failed: {}", e),
            ),
        }
    }

    report.account = Some(diagnosis);
}

fn explain_reconciliation(report: &mut DiagnosticReport, result: &ReconciliationResult) {
    match result {
        ReconciliationResult::Linked { .. } => {}
        ReconciliationResult::UnlinkedMatch { account } => report.record(
            Severity::Warning,
            "reconciliation",
            format!(
                "virtual user {} ({}) matches by email but is not linked",
                account.id, account.email
            ),
        ),
        ReconciliationResult::ConflictingLink {
            account,
            other_user_id,
        } => report.record(
            Severity::Error,
            "reconciliation",
            format!(
                "virtual user {} ({}) is linked to a different user {}",
                account.id, account.email, other_user_id
            ),
        ),
        ReconciliationResult::FormatMismatch { candidates } => report.record(
            Severity::Warning,
            "reconciliation",
            format!(
                "{} virtual user(s) reference this user with a differently formatted id",
                candidates.len()
            ),
        ),
        ReconciliationResult::NotFound => report.record(
            Severity::Error,
            "reconciliation",
            "no virtual mail user for this user",
        ),
    }
}
