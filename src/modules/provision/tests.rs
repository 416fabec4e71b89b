// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::*;
use crate::modules::credential::crypt::NativeCrypt;
use crate::modules::credential::dovecot::{is_valid_dovecot_hash, verify_dovecot_hash};
use crate::modules::credential::envelope::decrypt_password;
use crate::modules::directory::memory::{InMemoryMailDirectory, InMemoryUserDirectory};
use crate::modules::exec::fake::RecordingRunner;
use crate::modules::reconcile::ReconciliationResult;
use std::path::Path;
use tempfile::TempDir;

const U1: &str = "2f1c7a52-3b7e-4d6e-9a61-0a5c2b7c9d10";

struct Fixture {
    root: TempDir,
    manager: MailAccountManager<RecordingRunner, NativeCrypt>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_runner(RecordingRunner::new())
    }

    fn with_runner(runner: RecordingRunner) -> Self {
        let root = tempfile::tempdir().unwrap();
        let files = PostfixFiles::new(
            root.path().join("vhosts"),
            root.path().join("postfix"),
            "vmail",
            "vmail",
        );
        std::fs::create_dir_all(root.path().join("postfix")).unwrap();
        Self {
            root,
            manager: MailAccountManager::new(Backend::PostfixFiles(files), runner, NativeCrypt),
        }
    }

    fn path(&self, relative: &str) -> std::path::PathBuf {
        self.root.path().join(relative)
    }

    fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path(relative)).unwrap_or_default()
    }

    fn runner(&self) -> &RecordingRunner {
        &self.manager.runner
    }
}

fn request(email: &str, password: &str) -> CreateAccount {
    CreateAccount {
        email: email.into(),
        password: password.into(),
        display_name: None,
        quota_mb: 1024,
        linked_user_id: None,
    }
}

fn map_lines_for(content: &str, email: &str) -> Vec<String> {
    content
        .lines()
        .filter(|l| l.split_whitespace().next() == Some(email))
        .map(String::from)
        .collect()
}

#[test]
fn address_must_split_once() {
    let address = MailAddress::parse(" alice@keykeeper.world ").unwrap();
    assert_eq!(address.username, "alice");
    assert_eq!(address.domain, "keykeeper.world");
    for bad in [
        "alice",
        "@keykeeper.world",
        "alice@",
        "a@b@c",
        "alice@../etc",
        "al ice@keykeeper.world",
    ] {
        assert_eq!(
            MailAddress::parse(bad).unwrap_err().code(),
            ErrorCode::InvalidParameter,
            "{}",
            bad
        );
    }
}

#[tokio::test]
async fn create_builds_maildir_map_and_domain() {
    let fixture = Fixture::new();
    let account = fixture
        .manager
        .create(&request("alice@keykeeper.world", "pw-one"))
        .await
        .unwrap();
    assert_eq!(account.username, "alice");
    assert_eq!(account.domain, "keykeeper.world");
    assert!(!account.degraded);

    for sub in ["cur", "new", "tmp"] {
        assert!(fixture
            .path(&format!("vhosts/keykeeper.world/alice/{}", sub))
            .is_dir());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(fixture.path("vhosts/keykeeper.world/alice"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    let map = fixture.read("postfix/virtual_mailbox_passwd");
    let lines = map_lines_for(&map, "alice@keykeeper.world");
    assert_eq!(lines.len(), 1);
    let stored = lines[0].split_once(' ').unwrap().1;
    assert!(is_valid_dovecot_hash(stored));
    assert!(verify_dovecot_hash("pw-one", stored));

    assert_eq!(
        fixture.read("postfix/virtual_mailbox_domains"),
        "keykeeper.world\n"
    );
    assert_eq!(fixture.runner().count("chown -R vmail:vmail"), 1);
    assert_eq!(fixture.runner().count("postmap"), 1);
}

#[tokio::test]
async fn create_twice_is_idempotent() {
    let fixture = Fixture::new();
    fixture
        .manager
        .create(&request("alice@keykeeper.world", "first"))
        .await
        .unwrap();
    fixture
        .manager
        .create(&request("alice@keykeeper.world", "second"))
        .await
        .unwrap();

    let map = fixture.read("postfix/virtual_mailbox_passwd");
    let lines = map_lines_for(&map, "alice@keykeeper.world");
    assert_eq!(lines.len(), 1);
    let stored = lines[0].split_once(' ').unwrap().1;
    assert!(verify_dovecot_hash("second", stored));
    assert!(!verify_dovecot_hash("first", stored));

    let mailboxes: Vec<_> = std::fs::read_dir(fixture.path("vhosts/keykeeper.world"))
        .unwrap()
        .collect();
    assert_eq!(mailboxes.len(), 1);
    assert_eq!(fixture.read("postfix/virtual_mailbox_domains"), "keykeeper.world\n");
    // the index is rebuilt after every map mutation
    assert_eq!(fixture.runner().count("postmap"), 2);
}

#[tokio::test]
async fn domain_registration_needs_an_exact_line() {
    let fixture = Fixture::new();
    std::fs::write(
        fixture.path("postfix/virtual_mailbox_domains"),
        "# keykeeper.world\nmail.keykeeper.world\n",
    )
    .unwrap();
    fixture
        .manager
        .create(&request("alice@keykeeper.world", "pw"))
        .await
        .unwrap();
    fixture
        .manager
        .create(&request("bob@KeyKeeper.World", "pw"))
        .await
        .unwrap();
    assert_eq!(
        fixture.read("postfix/virtual_mailbox_domains"),
        "# keykeeper.world\nmail.keykeeper.world\nkeykeeper.world\n"
    );
}

#[tokio::test]
async fn delete_removes_only_the_exact_key() {
    let fixture = Fixture::new();
    std::fs::write(
        fixture.path("postfix/virtual_mailbox_passwd"),
        "xalice@keykeeper.world {PLAIN}x\nalice@keykeeper.world.evil {PLAIN}y\n",
    )
    .unwrap();
    fixture
        .manager
        .create(&request("alice@keykeeper.world", "pw"))
        .await
        .unwrap();
    assert!(fixture.manager.exists("alice@keykeeper.world").await.unwrap());

    fixture.manager.delete("alice@keykeeper.world").await.unwrap();

    let map = fixture.read("postfix/virtual_mailbox_passwd");
    assert!(map_lines_for(&map, "alice@keykeeper.world").is_empty());
    assert_eq!(
        map,
        "xalice@keykeeper.world {PLAIN}x\nalice@keykeeper.world.evil {PLAIN}y\n"
    );
    assert!(!fixture.path("vhosts/keykeeper.world/alice").exists());
    assert!(!fixture.manager.exists("alice@keykeeper.world").await.unwrap());
    assert_eq!(fixture.runner().count("postmap"), 2);
}

#[tokio::test]
async fn exists_falls_back_to_the_map() {
    let fixture = Fixture::new();
    fixture
        .manager
        .create(&request("alice@keykeeper.world", "pw"))
        .await
        .unwrap();
    std::fs::remove_dir_all(fixture.path("vhosts/keykeeper.world/alice")).unwrap();
    assert!(fixture.manager.exists("alice@keykeeper.world").await.unwrap());
    assert!(!fixture.manager.exists("bob@keykeeper.world").await.unwrap());
}

#[tokio::test]
async fn failed_postmap_is_a_provisioning_error_and_rerun_completes() {
    let fixture = Fixture::with_runner(RecordingRunner::new().fail(
        "postmap",
        1,
        "postmap: fatal: unsupported dictionary type: hash",
    ));
    let error = fixture
        .manager
        .create(&request("alice@keykeeper.world", "pw"))
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::ProvisioningFailed);
    assert!(error.message().contains("unsupported dictionary type"));
    assert!(error.message().contains("postmap"));
    // the steps before the failure stay in place
    assert!(fixture.path("vhosts/keykeeper.world/alice/new").is_dir());

    let retry = Fixture {
        root: fixture.root,
        manager: MailAccountManager::new(
            fixture.manager.backend.clone(),
            RecordingRunner::new(),
            NativeCrypt,
        ),
    };
    retry
        .manager
        .create(&request("alice@keykeeper.world", "pw"))
        .await
        .unwrap();
    assert_eq!(retry.read("postfix/virtual_mailbox_domains"), "keykeeper.world\n");
    let map = retry.read("postfix/virtual_mailbox_passwd");
    assert_eq!(map_lines_for(&map, "alice@keykeeper.world").len(), 1);
}

#[tokio::test]
async fn dry_run_leaves_the_filesystem_alone() {
    let root = tempfile::tempdir().unwrap();
    let manager = MailAccountManager::new(
        Backend::PostfixFiles(PostfixFiles::new(
            root.path().join("vhosts"),
            root.path().join("postfix"),
            "vmail",
            "vmail",
        )),
        crate::modules::exec::SystemRunner::new(true),
        NativeCrypt,
    );
    let account = manager
        .create(&request("alice@keykeeper.world", "pw"))
        .await
        .unwrap();
    assert!(account.output.starts_with("dry-run"));
    assert!(!Path::new(&root.path().join("vhosts")).exists());
}

#[tokio::test]
async fn postfixadmin_docker_adds_then_updates() {
    let runner = RecordingRunner::new()
        .fail("mailbox view", 1, "mailbox does not exist")
        .fail("domain view", 1, "domain does not exist");
    let manager = MailAccountManager::new(
        Backend::PostfixAdmin(PostfixAdminCli::docker("mailserver", "postfixadmin-cli")),
        runner,
        NativeCrypt,
    );
    let mut create = request("alice@keykeeper.world", "s3cret-pass");
    create.display_name = Some("Alice Liddell".into());
    manager.create(&create).await.unwrap();

    let lines = manager.runner.lines();
    assert_eq!(
        lines,
        vec![
            "docker exec mailserver postfixadmin-cli domain view keykeeper.world",
            "docker exec mailserver postfixadmin-cli domain add keykeeper.world",
            "docker exec mailserver postfixadmin-cli mailbox view alice@keykeeper.world",
            "docker exec mailserver postfixadmin-cli mailbox add alice@keykeeper.world --password *** --password2 *** --name 'Alice Liddell' --quota 1024 --active 1",
        ]
    );
    assert!(!lines.iter().any(|l| l.contains("s3cret-pass")));
    let calls = manager.runner.calls();
    assert!(calls[3].args.iter().any(|a| a == "s3cret-pass"));

    let existing = MailAccountManager::new(
        Backend::PostfixAdmin(PostfixAdminCli::direct("postfixadmin-cli")),
        RecordingRunner::new(),
        NativeCrypt,
    );
    existing.create(&create).await.unwrap();
    assert_eq!(existing.runner.count("postfixadmin-cli mailbox update"), 1);
    assert_eq!(existing.runner.count("docker"), 0);
}

#[tokio::test]
async fn postfixadmin_failure_carries_output() {
    let manager = MailAccountManager::new(
        Backend::PostfixAdmin(PostfixAdminCli::direct("postfixadmin-cli")),
        RecordingRunner::new().fail("mailbox delete", 2, "no such mailbox"),
        NativeCrypt,
    );
    let error = manager.delete("ghost@keykeeper.world").await.unwrap_err();
    assert_eq!(error.code(), ErrorCode::ProvisioningFailed);
    assert!(error.message().contains("no such mailbox"));
    assert!(error.message().contains("delete mailbox ghost@keykeeper.world"));

    let unspawnable = MailAccountManager::new(
        Backend::PostfixAdmin(PostfixAdminCli::direct("postfixadmin-cli")),
        RecordingRunner::new().unspawnable("postfixadmin-cli"),
        NativeCrypt,
    );
    let error = unspawnable
        .exists("ghost@keykeeper.world")
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::CommandFailed);
}

#[tokio::test]
async fn not_found_then_create_yields_linked() {
    let fixture = Fixture::new();
    let users = InMemoryUserDirectory::default().with_user(U1, "alice@keykeeper.world");
    let mail = InMemoryMailDirectory::default();
    let secret = AppSecret::new("test-secret");

    let before = IdentityReconciler::new(&users, &mail)
        .find_or_explain_mismatch(U1)
        .await
        .unwrap();
    assert_eq!(before, ReconciliationResult::NotFound);

    let mut create = request("alice@keykeeper.world", "generated-pw");
    create.linked_user_id = Some(U1.into());
    let account = fixture
        .manager
        .create_with_directory(&create, &mail, &users, &secret)
        .await
        .unwrap();

    let after = IdentityReconciler::new(&users, &mail)
        .find_or_explain_mismatch(U1)
        .await
        .unwrap();
    let linked = after.linked_account().unwrap();
    assert_eq!(Some(linked.id), account.virtual_user_id);
    assert!(verify_dovecot_hash("generated-pw", &linked.password));

    let envelope = users.user(U1).unwrap().mail_password.unwrap();
    assert_eq!(decrypt_password(&envelope, &secret).unwrap(), "generated-pw");

    let kinds: Vec<_> = users.activity().iter().map(|a| a.activity_type).collect();
    assert_eq!(
        kinds,
        vec![ActivityType::MailAccountLinked, ActivityType::MailAccountCreated]
    );

    // a second run keeps one row and one link
    fixture
        .manager
        .create_with_directory(&create, &mail, &users, &secret)
        .await
        .unwrap();
    assert_eq!(mail.rows().len(), 1);
    assert_eq!(mail.domains.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn create_for_address_owned_by_someone_else_conflicts() {
    let fixture = Fixture::new();
    let users = InMemoryUserDirectory::default()
        .with_user(U1, "alice@keykeeper.world")
        .with_user("other-user", "mallory@keykeeper.world");
    let mail = InMemoryMailDirectory::default().with_row(1, "alice@keykeeper.world", Some("other-user"));
    let mut create = request("alice@keykeeper.world", "pw");
    create.linked_user_id = Some(U1.into());
    let error = fixture
        .manager
        .create_with_directory(&create, &mail, &users, &AppSecret::new("s"))
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::LinkConflict);
    assert!(users.user(U1).unwrap().mail_password.is_none());
    // nothing was provisioned over the other user's mailbox
    assert!(fixture.read("postfix/virtual_mailbox_passwd").is_empty());
    assert_eq!(mail.rows()[0].password, "{PLAIN}seed");
}

#[tokio::test]
async fn user_linked_elsewhere_is_refused_before_provisioning() {
    let fixture = Fixture::new();
    let users = InMemoryUserDirectory::default().with_user(U1, "alice@keykeeper.world");
    let mail = InMemoryMailDirectory::default().with_row(1, "alice@keykeeper.world", Some(U1));
    let mut create = request("alice2@keykeeper.world", "pw");
    create.linked_user_id = Some(U1.into());
    let error = fixture
        .manager
        .create_with_directory(&create, &mail, &users, &AppSecret::new("s"))
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::LinkConflict);

    assert!(!fixture.path("vhosts/keykeeper.world/alice2").exists());
    assert!(fixture.read("postfix/virtual_mailbox_passwd").is_empty());
    assert!(fixture.runner().calls().is_empty());
    assert_eq!(mail.rows().len(), 1);
    assert!(users.user(U1).unwrap().mail_password.is_none());

    // the mailbox the user already holds can still be reprovisioned
    let mut again = request("alice@keykeeper.world", "pw");
    again.linked_user_id = Some(U1.into());
    fixture
        .manager
        .create_with_directory(&again, &mail, &users, &AppSecret::new("s"))
        .await
        .unwrap();
    assert_eq!(mail.rows().len(), 1);
}

#[tokio::test]
async fn dry_run_leaves_directory_records_alone() {
    let root = tempfile::tempdir().unwrap();
    let manager = MailAccountManager::new(
        Backend::PostfixFiles(PostfixFiles::new(
            root.path().join("vhosts"),
            root.path().join("postfix"),
            "vmail",
            "vmail",
        )),
        crate::modules::exec::SystemRunner::new(true),
        NativeCrypt,
    );
    let users = InMemoryUserDirectory::default().with_user(U1, "alice@keykeeper.world");
    let mail = InMemoryMailDirectory::default();
    let mut create = request("alice@keykeeper.world", "pw");
    create.linked_user_id = Some(U1.into());

    let account = manager
        .create_with_directory(&create, &mail, &users, &AppSecret::new("s"))
        .await
        .unwrap();
    assert_eq!(account.virtual_user_id, None);
    assert!(account.output.contains("directory records left unchanged"));
    assert!(mail.rows().is_empty());
    assert!(mail.domains.lock().unwrap().is_empty());
    assert!(users.user(U1).unwrap().mail_password.is_none());
    assert!(users.activity().is_empty());
}

#[tokio::test]
async fn delete_with_directory_drops_row() {
    let fixture = Fixture::new();
    let users = InMemoryUserDirectory::default().with_user(U1, "alice@keykeeper.world");
    let mail = InMemoryMailDirectory::default();
    let mut create = request("alice@keykeeper.world", "pw");
    create.linked_user_id = Some(U1.into());
    fixture
        .manager
        .create_with_directory(&create, &mail, &users, &AppSecret::new("s"))
        .await
        .unwrap();

    fixture
        .manager
        .delete_with_directory("alice@keykeeper.world", &mail, &users)
        .await
        .unwrap();
    assert!(mail.rows().is_empty());
    assert_eq!(
        users.activity().last().map(|a| a.activity_type),
        Some(ActivityType::MailAccountDeleted)
    );
}
