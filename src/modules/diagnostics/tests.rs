// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::env::{apply_env_edits, propose, EnvEdit};
use super::*;
use crate::modules::credential::crypt::NativeCrypt;
use crate::modules::credential::envelope::encrypt_password;
use crate::modules::directory::memory::{InMemoryMailDirectory, InMemoryUserDirectory};
use crate::modules::exec::fake::RecordingRunner;
use crate::modules::provision::postfix::PostfixFiles;
use crate::modules::provision::{Backend, CreateAccount};
use tempfile::TempDir;

const U1: &str = "2f1c7a52-3b7e-4d6e-9a61-0a5c2b7c9d10";
const U2: &str = "9b0e4c11-7d2a-4f55-8c3e-51d2a6e0f7b4";

fn manager(root: &TempDir) -> MailAccountManager<RecordingRunner, NativeCrypt> {
    std::fs::create_dir_all(root.path().join("postfix")).unwrap();
    let files = PostfixFiles::new(
        root.path().join("vhosts"),
        root.path().join("postfix"),
        "vmail",
        "vmail",
    );
    MailAccountManager::new(
        Backend::PostfixFiles(files),
        RecordingRunner::new(),
        NativeCrypt,
    )
}

fn report() -> DiagnosticReport {
    let mut settings = Settings::new_for_test();
    settings.database_url = Some("mysql://app:s3cret@db:3306/keykeeper".into());
    settings.use_real_mail_server = true;
    DiagnosticReport::new(U1, ConfigSummary::from_settings(&settings))
}

fn checks(report: &DiagnosticReport, check: &str) -> Vec<Severity> {
    report
        .findings
        .iter()
        .filter(|f| f.check == check)
        .map(|f| f.severity)
        .collect()
}

#[test]
fn config_summary_never_leaks_credentials() {
    let mut settings = Settings::new_for_test();
    settings.database_url = Some("mysql://app:s3cret@db:3306/keykeeper".into());
    settings.mail_db_password = Some("mailpass".into());
    settings.app_secret = Some("super-private-secret".into());
    let summary = ConfigSummary::from_settings(&settings);
    let rendered = serde_json::to_string(&summary).unwrap();
    assert!(!rendered.contains("s3cret"));
    assert!(!rendered.contains("mailpass"));
    assert!(!rendered.contains("super-private-secret"));
    assert_eq!(summary.app_secret, SecretState::Configured);
    assert!(summary.database_url_valid);
}

#[test]
fn default_secret_is_an_error_only_in_production() {
    let mut settings = Settings::new_for_test();
    settings.app_secret = Some(DEVELOPMENT_SECRET.into());
    let report = DiagnosticReport::new(U1, ConfigSummary::from_settings(&settings));
    assert_eq!(checks(&report, "app_secret"), vec![Severity::Warning]);
    assert_eq!(checks(&report, "database_url"), vec![Severity::Error]);

    settings.keykeeper_env = Environment::Production;
    settings.app_secret = None;
    let report = DiagnosticReport::new(U1, ConfigSummary::from_settings(&settings));
    assert_eq!(checks(&report, "app_secret"), vec![Severity::Error]);
}

#[tokio::test]
async fn healthy_account_has_no_findings() {
    let root = tempfile::tempdir().unwrap();
    let manager = manager(&root);
    let users = InMemoryUserDirectory::default().with_user(U1, "alice@keykeeper.world");
    let mail = InMemoryMailDirectory::default();
    let secret = AppSecret::new("test-secret");
    manager
        .create_with_directory(
            &CreateAccount {
                email: "alice@keykeeper.world".into(),
                password: "correct horse".into(),
                display_name: None,
                quota_mb: 1024,
                linked_user_id: Some(U1.into()),
            },
            &mail,
            &users,
            &secret,
        )
        .await
        .unwrap();

    let mut report = report();
    report.set_resolution(Ok((
        ResolutionSource::MainDatabaseFlag,
        Some("keykeeper".into()),
        false,
    )));
    diagnose_account(&mut report, &users, &mail, &manager, Some(&secret)).await;

    assert!(report.findings.is_empty(), "{:?}", report.findings);
    let account = report.account.as_ref().unwrap();
    assert_eq!(account.password, PasswordCheck::Matches);
    assert_eq!(account.backend_exists, Some(true));
    assert!(account.hash.as_ref().unwrap().valid);
    assert!(propose(&report).is_empty());
    assert!(report.render_text().contains("reconciliation: linked"));
}

#[tokio::test]
async fn password_drift_and_missing_mailbox_are_reported() {
    let root = tempfile::tempdir().unwrap();
    let manager = manager(&root);
    let secret = AppSecret::new("test-secret");
    let users = InMemoryUserDirectory::default().with_user(U1, "alice@keykeeper.world");
    users
        .set_mail_password(U1, &encrypt_password("not-seed", &secret).unwrap())
        .await
        .unwrap();
    let mail = InMemoryMailDirectory::default().with_row(7, "alice@keykeeper.world", Some(U1));

    let mut report = report();
    diagnose_account(&mut report, &users, &mail, &manager, Some(&secret)).await;

    let account = report.account.as_ref().unwrap();
    assert_eq!(account.password, PasswordCheck::Mismatch);
    assert_eq!(account.backend_exists, Some(false));
    assert!(account.hash.as_ref().unwrap().degraded);
    assert_eq!(checks(&report, "backend"), vec![Severity::Error]);
    assert_eq!(checks(&report, "hash"), vec![Severity::Warning]);

    let proposal = propose(&report);
    let recreate: Vec<_> = proposal
        .actions
        .iter()
        .filter(|a| a.starts_with("keykeeper-mail create-account"))
        .collect();
    assert_eq!(recreate.len(), 1);
}

#[tokio::test]
async fn wrong_secret_is_undecryptable() {
    let root = tempfile::tempdir().unwrap();
    let manager = manager(&root);
    let users = InMemoryUserDirectory::default().with_user(U1, "alice@keykeeper.world");
    users
        .set_mail_password(
            U1,
            &encrypt_password("seed", &AppSecret::new("old-secret")).unwrap(),
        )
        .await
        .unwrap();
    let mail = InMemoryMailDirectory::default().with_row(7, "alice@keykeeper.world", Some(U1));

    let mut report = report();
    diagnose_account(
        &mut report,
        &users,
        &mail,
        &manager,
        Some(&AppSecret::new("new-secret")),
    )
    .await;
    assert_eq!(
        report.account.as_ref().unwrap().password,
        PasswordCheck::Undecryptable
    );
    assert!(report.has_errors());
}

#[tokio::test]
async fn unlinked_match_proposes_link() {
    let root = tempfile::tempdir().unwrap();
    let manager = manager(&root);
    let users = InMemoryUserDirectory::default().with_user(U1, "Alice@KeyKeeper.world");
    let mail = InMemoryMailDirectory::default().with_row(42, "alice@keykeeper.world", None);

    let mut report = report();
    diagnose_account(&mut report, &users, &mail, &manager, None).await;
    assert_eq!(
        report
            .account
            .as_ref()
            .and_then(|a| a.reconciliation.as_ref())
            .map(|r| r.label()),
        Some("unlinked_match")
    );
    let proposal = propose(&report);
    assert!(proposal
        .actions
        .contains(&format!("keykeeper-mail link {} 42", U1)));
    assert!(mail.rows()[0].user_id.is_none());
}

#[tokio::test]
async fn conflicting_link_is_left_for_review() {
    let root = tempfile::tempdir().unwrap();
    let manager = manager(&root);
    let users = InMemoryUserDirectory::default().with_user(U1, "alice@keykeeper.world");
    let mail = InMemoryMailDirectory::default().with_row(42, "alice@keykeeper.world", Some(U2));

    let mut report = report();
    diagnose_account(&mut report, &users, &mail, &manager, None).await;
    assert_eq!(checks(&report, "reconciliation"), vec![Severity::Error]);
    let proposal = propose(&report);
    assert!(proposal.actions.iter().any(|a| a.starts_with("manual review")));
    assert!(!proposal.actions.iter().any(|a| a.contains(" link ")));
}

#[tokio::test]
async fn missing_user_stops_account_repairs() {
    let root = tempfile::tempdir().unwrap();
    let manager = manager(&root);
    let users = InMemoryUserDirectory::default();
    let mail = InMemoryMailDirectory::default();

    let mut report = report();
    diagnose_account(&mut report, &users, &mail, &manager, None).await;
    assert_eq!(checks(&report, "user"), vec![Severity::Error]);
    assert!(propose(&report).actions.is_empty());
}

#[test]
fn resolution_failure_proposes_main_database() {
    let mut settings = Settings::new_for_test();
    settings.database_url = Some("mysql://app:pw@db/keykeeper".into());
    settings.mail_db_host = Some("mail-db".into());
    settings.app_secret = None;
    let mut report = DiagnosticReport::new(U1, ConfigSummary::from_settings(&settings));
    report.set_resolution(Err(crate::raise_error!(
        "MAIL_DB_USER is not set".into(),
        crate::modules::error::code::ErrorCode::MissingConfiguration
    )));
    report.add_tables(vec![TableCheck {
        table: "virtual_users".into(),
        exists: true,
        missing_columns: vec!["user_id".into()],
    }]);

    let proposal = propose(&report);
    let keys: Vec<&str> = proposal.edits.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(
        keys,
        vec!["APP_SECRET", "USE_MAIN_DB_FOR_MAIL", "USE_REAL_MAIL_SERVER"]
    );
    assert_eq!(proposal.edits[0].value.len(), 64);
    assert!(proposal.actions[0].starts_with("ALTER TABLE `virtual_users`"));
    assert!(!proposal.render_text().contains(&proposal.edits[0].value));
}

#[test]
fn env_edits_replace_in_place_and_append() {
    let content = "# KeyKeeper\nDATABASE_URL=mysql://a@b/c\nexport USE_REAL_MAIL_SERVER=false\n#APP_SECRET=old\n\nAPP_SECRET=\n";
    let edits = vec![
        EnvEdit {
            key: "APP_SECRET".into(),
            value: "fresh".into(),
            reason: String::new(),
        },
        EnvEdit {
            key: "USE_REAL_MAIL_SERVER".into(),
            value: "true".into(),
            reason: String::new(),
        },
        EnvEdit {
            key: "USE_MAIN_DB_FOR_MAIL".into(),
            value: "true".into(),
            reason: String::new(),
        },
    ];
    assert_eq!(
        apply_env_edits(content, &edits),
        "# KeyKeeper\nDATABASE_URL=mysql://a@b/c\nUSE_REAL_MAIL_SERVER=true\n#APP_SECRET=old\n\nAPP_SECRET=fresh\nUSE_MAIN_DB_FOR_MAIL=true\n"
    );
}
