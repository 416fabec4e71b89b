// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::maps;
use super::MailAddress;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::exec::{CommandRunner, CommandSpec};
use crate::raise_error;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PASSWD_MAP: &str = "virtual_mailbox_passwd";
pub const DOMAINS_FILE: &str = "virtual_mailbox_domains";
const MAILDIR_SUBDIRS: [&str; 3] = ["cur", "new", "tmp"];

/// Direct management of Postfix/Dovecot virtual-user files and Maildirs.
#[derive(Clone, Debug)]
pub struct PostfixFiles {
    mail_dir: PathBuf,
    config_dir: PathBuf,
    mail_user: String,
    mail_group: String,
}

impl PostfixFiles {
    pub fn new(
        mail_dir: impl Into<PathBuf>,
        config_dir: impl Into<PathBuf>,
        mail_user: &str,
        mail_group: &str,
    ) -> Self {
        Self {
            mail_dir: mail_dir.into(),
            config_dir: config_dir.into(),
            mail_user: mail_user.to_string(),
            mail_group: mail_group.to_string(),
        }
    }

    pub fn passwd_map(&self) -> PathBuf {
        self.config_dir.join(PASSWD_MAP)
    }

    pub fn domains_file(&self) -> PathBuf {
        self.config_dir.join(DOMAINS_FILE)
    }

    pub fn maildir(&self, address: &MailAddress) -> PathBuf {
        self.mail_dir.join(&address.domain).join(&address.username)
    }

    /// Every step checks current state first, so a failed run can simply be repeated.
    pub async fn create<R: CommandRunner>(
        &self,
        runner: &R,
        address: &MailAddress,
        stored_hash: &str,
        quota_mb: u32,
    ) -> KeyKeeperResult<String> {
        debug!(
            "Quota of {}MB for {} is not enforced by the file backend",
            quota_mb, address
        );
        if runner.is_dry_run() {
            info!(
                "dry-run: would provision {} at {} and register it in {}",
                address,
                self.maildir(address).display(),
                self.passwd_map().display()
            );
            return Ok(format!("dry-run: {} not provisioned", address));
        }

        let mut output = Vec::new();
        let domain_dir = self.mail_dir.join(&address.domain);
        create_dir_all(&domain_dir).await?;

        let maildir = self.maildir(address);
        for sub in MAILDIR_SUBDIRS {
            create_dir_all(&maildir.join(sub)).await?;
        }
        restrict_permissions(&maildir).await?;
        let chown = CommandSpec::new("chown")
            .arg("-R")
            .arg(format!("{}:{}", self.mail_user, self.mail_group))
            .arg(maildir.to_string_lossy());
        runner.run(&chown).await?.ensure_success(&chown)?;
        output.push(format!("maildir ready: {}", maildir.display()));

        let map_path = self.passwd_map();
        let content = maps::read_or_empty(&map_path).await?;
        let (updated, replaced) = maps::upsert_entry(&content, &address.email, stored_hash);
        maps::write_atomic(&map_path, &updated).await?;
        output.push(format!(
            "{} password entry for {}",
            if replaced { "replaced" } else { "added" },
            address
        ));
        output.push(self.postmap(runner).await?);

        let domains_path = self.domains_file();
        let domains = maps::read_or_empty(&domains_path).await?;
        if maps::contains_domain(&domains, &address.domain) {
            output.push(format!("domain {} already registered", address.domain));
        } else {
            maps::write_atomic(&domains_path, &maps::append_line(&domains, &address.domain))
                .await?;
            output.push(format!("registered domain {}", address.domain));
        }

        info!("Provisioned mailbox {} (postfix files)", address);
        Ok(output.join("\n"))
    }

    pub async fn delete<R: CommandRunner>(
        &self,
        runner: &R,
        address: &MailAddress,
    ) -> KeyKeeperResult<String> {
        if runner.is_dry_run() {
            info!("dry-run: would delete mailbox {}", address);
            return Ok(format!("dry-run: {} not deleted", address));
        }

        let mut output = Vec::new();
        let maildir = self.maildir(address);
        match tokio::fs::remove_dir_all(&maildir).await {
            Ok(()) => output.push(format!("removed {}", maildir.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                output.push(format!("{} already absent", maildir.display()))
            }
            Err(e) => {
                return Err(raise_error!(
                    format!("Failed to remove {}: {}", maildir.display(), e),
                    ErrorCode::ProvisioningFailed
                ))
            }
        }

        let map_path = self.passwd_map();
        let content = maps::read_or_empty(&map_path).await?;
        let (updated, removed) = maps::remove_entries(&content, &address.email);
        if removed > 0 {
            maps::write_atomic(&map_path, &updated).await?;
        }
        output.push(format!("removed {} password entries for {}", removed, address));
        output.push(self.postmap(runner).await?);

        info!("Deleted mailbox {} (postfix files)", address);
        Ok(output.join("\n"))
    }

    /// The Maildir is checked first; a map entry alone still counts, covering pruned
    /// directories.
    pub async fn exists(&self, address: &MailAddress) -> KeyKeeperResult<bool> {
        if tokio::fs::metadata(self.maildir(address))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Ok(true);
        }
        let content = maps::read_or_empty(&self.passwd_map()).await?;
        Ok(maps::contains_key(&content, &address.email))
    }

    async fn postmap<R: CommandRunner>(&self, runner: &R) -> KeyKeeperResult<String> {
        let spec = CommandSpec::new("postmap").arg(self.passwd_map().to_string_lossy());
        runner.run(&spec).await?.ensure_success(&spec)?;
        Ok(format!("rebuilt index {}.db", self.passwd_map().display()))
    }
}

async fn create_dir_all(path: &Path) -> KeyKeeperResult<()> {
    tokio::fs::create_dir_all(path).await.map_err(|e| {
        raise_error!(
            format!("Failed to create {}: {}", path.display(), e),
            ErrorCode::ProvisioningFailed
        )
    })
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> KeyKeeperResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .await
        .map_err(|e| {
            raise_error!(
                format!("Failed to chmod 0700 {}: {}", path.display(), e),
                ErrorCode::ProvisioningFailed
            )
        })
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> KeyKeeperResult<()> {
    Ok(())
}
