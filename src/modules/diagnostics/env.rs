// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::{
    DiagnosticReport, PasswordCheck, SecretState, APP_USER_COLUMNS, DOMAIN_COLUMNS,
    MAIL_USER_COLUMNS,
};
use crate::generate_token;
use crate::modules::database::resolver::ResolutionSource;
use crate::modules::reconcile::ReconciliationResult;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EnvEdit {
    pub key: String,
    pub value: String,
    pub reason: String,
}

/// Configuration edits plus the operator commands that would settle the rest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Proposal {
    pub edits: Vec<EnvEdit>,
    pub actions: Vec<String>,
}

impl Proposal {
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty() && self.actions.is_empty()
    }

    fn edit(&mut self, key: &str, value: impl Into<String>, reason: &str) {
        self.edits.push(EnvEdit {
            key: key.to_string(),
            value: value.into(),
            reason: reason.to_string(),
        });
    }

    pub fn render_text(&self) -> String {
        if self.is_empty() {
            return "Nothing to repair.\n".to_string();
        }
        let mut out = String::new();
        if !self.edits.is_empty() {
            out.push_str("Environment changes\n");
            for edit in &self.edits {
                let shown = if edit.key == "APP_SECRET" {
                    "<generated>"
                } else {
                    edit.value.as_str()
                };
                out.push_str(&format!("  {}={}  # {}\n", edit.key, shown, edit.reason));
            }
        }
        if !self.actions.is_empty() {
            out.push_str("Follow-up\n");
            for action in &self.actions {
                out.push_str(&format!("  {}\n", action));
            }
        }
        out
    }
}

/// Turns a report into concrete repairs. Nothing here touches the database or the
/// mail server; data problems become follow-up commands.
pub fn propose(report: &DiagnosticReport) -> Proposal {
    let mut proposal = Proposal::default();
    let config = &report.config;

    if config.app_secret != SecretState::Configured {
        proposal.edit(
            "APP_SECRET",
            generate_token!(64),
            "missing or development default secret",
        );
        if report
            .account
            .as_ref()
            .and_then(|a| a.user.as_ref())
            .is_some_and(|u| u.has_mail_password)
        {
            proposal.actions.push(format!(
                "keykeeper-mail create-account {}  # re-encrypt the stored mail password under the new APP_SECRET",
                report.user_id
            ));
        }
    }

    if report.resolution.is_none()
        && config.database_url_valid
        && !config.use_main_db_for_mail
        && config.mail_db_host.is_some()
    {
        proposal.edit(
            "USE_MAIN_DB_FOR_MAIL",
            "true",
            "the mail database could not be resolved; keep mail data in the primary database",
        );
    }

    if report
        .account
        .as_ref()
        .and_then(|a| a.hash.as_ref())
        .is_some_and(|h| h.degraded)
        && config.crypt_utility == "openssl"
    {
        proposal.edit(
            "MAIL_CRYPT_UTILITY",
            "native",
            "openssl produced no SHA512-CRYPT hash; hash in-process instead",
        );
    }

    if report
        .resolution
        .as_ref()
        .is_some_and(|r| r.source == ResolutionSource::LegacyDefault)
        && !config.use_main_db_for_mail
    {
        proposal.edit(
            "USE_MAIN_DB_FOR_MAIL",
            "true",
            "mail data already lives in the primary database; make it explicit",
        );
    }

    if !config.use_real_mail_server {
        proposal.edit(
            "USE_REAL_MAIL_SERVER",
            "true",
            "provisioning commands are only simulated",
        );
    }

    if report
        .table(&config.mail_users_table)
        .is_some_and(|t| t.exists && t.missing_columns.iter().any(|c| c == "user_id"))
    {
        proposal.actions.push(format!(
            "ALTER TABLE `{}` ADD COLUMN user_id VARCHAR(36) NULL;",
            config.mail_users_table
        ));
    }
    for table in &report.tables {
        if table.exists && table.table != config.mail_users_table && !table.missing_columns.is_empty()
        {
            let expected: &[&str] = if table.table == config.mail_domains_table {
                &DOMAIN_COLUMNS
            } else if table.missing_columns.iter().all(|c| APP_USER_COLUMNS.contains(&c.as_str())) {
                &APP_USER_COLUMNS
            } else {
                &MAIL_USER_COLUMNS
            };
            proposal.actions.push(format!(
                "review schema of `{}`; expected columns: {}",
                table.table,
                expected.join(", ")
            ));
        }
    }

    let Some(account) = &report.account else {
        return proposal;
    };
    if account.user.is_none() {
        return proposal;
    }
    match &account.reconciliation {
        Some(ReconciliationResult::NotFound) => proposal.actions.push(format!(
            "keykeeper-mail create-account {}",
            report.user_id
        )),
        Some(ReconciliationResult::UnlinkedMatch { account }) => proposal.actions.push(format!(
            "keykeeper-mail link {} {}",
            report.user_id, account.id
        )),
        Some(ReconciliationResult::ConflictingLink {
            account,
            other_user_id,
        }) => proposal.actions.push(format!(
            "manual review: virtual user {} ({}) is linked to {}",
            account.id, account.email, other_user_id
        )),
        Some(ReconciliationResult::FormatMismatch { candidates }) => {
            for candidate in candidates {
                proposal.actions.push(format!(
                    "manual review: virtual user {} ({}) has user_id {:?}; relink with `keykeeper-mail link {} {}` if it is the same person",
                    candidate.id,
                    candidate.email,
                    candidate.user_id.as_deref().unwrap_or_default(),
                    report.user_id,
                    candidate.id
                ));
            }
        }
        Some(ReconciliationResult::Linked { .. }) | None => {}
    }

    let bad_hash = account.hash.as_ref().is_some_and(|h| !h.valid);
    let bad_password = matches!(
        account.password,
        PasswordCheck::NotStored | PasswordCheck::Undecryptable | PasswordCheck::Mismatch
    );
    let missing_mailbox = account.backend_exists == Some(false);
    let already_recreating = proposal
        .actions
        .iter()
        .any(|a| a.starts_with(&format!("keykeeper-mail create-account {}", report.user_id)));
    if (bad_hash || bad_password || missing_mailbox) && !already_recreating {
        proposal.actions.push(format!(
            "keykeeper-mail create-account {}  # reissue the mail password and mailbox",
            report.user_id
        ));
    }

    proposal
}

/// Rewrites `KEY=value` lines in place and appends keys that are not present.
/// Comments, blank lines and unrelated keys are kept as they are.
pub fn apply_env_edits(content: &str, edits: &[EnvEdit]) -> String {
    let mut applied = vec![false; edits.len()];
    let mut lines: Vec<String> = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        let key = trimmed
            .strip_prefix("export ")
            .unwrap_or(trimmed)
            .split_once('=')
            .map(|(key, _)| key.trim());
        match key.and_then(|key| edits.iter().position(|e| e.key == key)) {
            Some(index) if !trimmed.starts_with('#') => {
                if !applied[index] {
                    lines.push(format!("{}={}", edits[index].key, edits[index].value));
                    applied[index] = true;
                }
            }
            _ => lines.push(line.to_string()),
        }
    }
    for (edit, done) in edits.iter().zip(applied) {
        if !done {
            lines.push(format!("{}={}", edit.key, edit.value));
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
