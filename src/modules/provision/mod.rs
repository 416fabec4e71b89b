// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::credential::crypt::CryptUtility;
use crate::modules::credential::dovecot::{DovecotHash, DovecotHasher, HashScheme};
use crate::modules::credential::envelope::{encrypt_password, AppSecret};
use crate::modules::directory::entity::{ActivityEntry, ActivityType, NewVirtualUser};
use crate::modules::directory::{MailDirectory, UserDirectory};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::exec::CommandRunner;
use crate::modules::reconcile::IdentityReconciler;
use crate::modules::settings::cli::{MailServerType, Settings};
use crate::raise_error;
use postfix::PostfixFiles;
use postfixadmin::PostfixAdminCli;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use tracing::warn;

pub mod maps;
pub mod postfix;
pub mod postfixadmin;
#[cfg(test)]
mod tests;

/// `username@domain`, split once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailAddress {
    pub email: String,
    pub username: String,
    pub domain: String,
}

impl MailAddress {
    pub fn parse(email: &str) -> KeyKeeperResult<Self> {
        let email = email.trim();
        let mut parts = email.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(username), Some(domain), None)
                if !username.is_empty()
                    && !domain.is_empty()
                    && !username.starts_with('.')
                    && !domain.starts_with('.')
                    && !email.contains(|c: char| c.is_whitespace() || c == '/') =>
            {
                Ok(Self {
                    email: email.to_string(),
                    username: username.to_string(),
                    domain: domain.to_string(),
                })
            }
            _ => Err(raise_error!(
                format!(
                    "Invalid mail address '{}': expected exactly one '@' between a username and a domain",
                    email
                ),
                ErrorCode::InvalidParameter
            )),
        }
    }
}

impl fmt::Display for MailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.email)
    }
}

#[derive(Clone, Debug)]
pub struct CreateAccount {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub quota_mb: u32,
    pub linked_user_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProvisionedAccount {
    pub email: String,
    pub username: String,
    pub domain: String,
    pub output: String,
    pub scheme: HashScheme,
    /// The hash fell back to PLAIN.
    pub degraded: bool,
    pub virtual_user_id: Option<u64>,
    #[serde(skip)]
    pub hash: DovecotHash,
}

#[derive(Clone, Debug)]
pub enum Backend {
    PostfixFiles(PostfixFiles),
    PostfixAdmin(PostfixAdminCli),
}

impl Backend {
    pub fn from_settings(settings: &Settings) -> Self {
        match settings.mail_server_type {
            Some(MailServerType::PostfixadminDocker) => Backend::PostfixAdmin(
                PostfixAdminCli::docker(&settings.mail_container_name, &settings.postfixadmin_cli),
            ),
            Some(MailServerType::PostfixadminDirect) => {
                Backend::PostfixAdmin(PostfixAdminCli::direct(&settings.postfixadmin_cli))
            }
            None => Backend::PostfixFiles(PostfixFiles::new(
                &settings.mail_dir,
                &settings.postfix_config_dir,
                &settings.mail_user,
                &settings.mail_group,
            )),
        }
    }
}

/// Creates, deletes and checks virtual mailboxes on the configured backend.
pub struct MailAccountManager<R, C> {
    backend: Backend,
    runner: R,
    hasher: DovecotHasher<C>,
}

impl<R: CommandRunner, C: CryptUtility> MailAccountManager<R, C> {
    pub fn new(backend: Backend, runner: R, crypt: C) -> Self {
        Self {
            backend,
            runner,
            hasher: DovecotHasher::new(crypt),
        }
    }

    pub async fn create(&self, request: &CreateAccount) -> KeyKeeperResult<ProvisionedAccount> {
        let address = MailAddress::parse(&request.email)?;
        let hash = self.hasher.hash_for_dovecot(&request.password).await;
        if hash.is_degraded() {
            warn!(
                target: "security",
                "WeakCredentialWarning: mailbox {} will be stored with a PLAIN password",
                address
            );
        }

        let output = match &self.backend {
            Backend::PostfixFiles(files) => {
                files
                    .create(&self.runner, &address, &hash.to_stored(), request.quota_mb)
                    .await
            }
            Backend::PostfixAdmin(cli) => cli.create(&self.runner, &address, request).await,
        }
        .map_err(|e| e.context(format!("create mailbox {}", address)))?;

        Ok(ProvisionedAccount {
            email: address.email,
            username: address.username,
            domain: address.domain,
            output,
            scheme: hash.scheme(),
            degraded: hash.is_degraded(),
            virtual_user_id: None,
            hash,
        })
    }

    pub async fn delete(&self, email: &str) -> KeyKeeperResult<String> {
        let address = MailAddress::parse(email)?;
        match &self.backend {
            Backend::PostfixFiles(files) => files.delete(&self.runner, &address).await,
            Backend::PostfixAdmin(cli) => cli.delete(&self.runner, &address).await,
        }
        .map_err(|e| e.context(format!("delete mailbox {}", address)))
    }

    pub async fn exists(&self, email: &str) -> KeyKeeperResult<bool> {
        let address = MailAddress::parse(email)?;
        match &self.backend {
            Backend::PostfixFiles(files) => files.exists(&address).await,
            Backend::PostfixAdmin(cli) => cli.exists(&self.runner, &address).await,
        }
    }

    /// `create`, then the virtual-user row, the link to the application user, and the
    /// user's encrypted copy of the password. Nothing is rolled back on failure; running
    /// it again finishes the remaining steps.
    pub async fn create_with_directory<U, M>(
        &self,
        request: &CreateAccount,
        mail: &M,
        users: &U,
        secret: &AppSecret,
    ) -> KeyKeeperResult<ProvisionedAccount>
    where
        U: UserDirectory,
        M: MailDirectory,
    {
        if let Some(user_id) = request.linked_user_id.as_deref() {
            if let Some(owner) = mail
                .find_by_email(&request.email)
                .await?
                .and_then(|row| row.user_id)
                .filter(|owner| owner != user_id)
            {
                return Err(raise_error!(
                    format!(
                        "Mailbox {} is already linked to {}; refusing to reprovision it for {}",
                        request.email.trim(),
                        owner,
                        user_id
                    ),
                    ErrorCode::LinkConflict
                ));
            }
            if let Some(held) = mail
                .find_by_user_id(user_id)
                .await?
                .into_iter()
                .find(|row| !row.email.eq_ignore_ascii_case(request.email.trim()))
            {
                return Err(raise_error!(
                    format!(
                        "User {} is already linked to mailbox {}; refusing to provision {}",
                        user_id,
                        held.email,
                        request.email.trim()
                    ),
                    ErrorCode::LinkConflict
                ));
            }
        }
        let mut account = self.create(request).await?;
        if self.runner.is_dry_run() {
            warn!(
                "dry-run: virtual user row, link and stored password for {} left unchanged",
                account.email
            );
            account
                .output
                .push_str("\ndry-run: directory records left unchanged");
            return Ok(account);
        }

        let domain_id = mail.ensure_domain(&account.domain).await?;
        let row = mail
            .upsert_account(&NewVirtualUser {
                domain_id,
                username: account.username.clone(),
                email: account.email.clone(),
                password: account.hash.to_stored(),
            })
            .await?;
        account.virtual_user_id = Some(row.id);

        if let Some(user_id) = request.linked_user_id.as_deref() {
            IdentityReconciler::new(users, mail)
                .link(user_id, row.id)
                .await?;
            let envelope = encrypt_password(&request.password, secret)?;
            users.set_mail_password(user_id, &envelope).await?;
            users
                .append_activity(&ActivityEntry::new(
                    user_id,
                    ActivityType::MailAccountCreated,
                    json!({
                        "email": account.email,
                        "virtual_user_id": row.id,
                        "scheme": account.scheme,
                        "degraded": account.degraded,
                    }),
                ))
                .await?;
        }
        Ok(account)
    }

    pub async fn delete_with_directory<U, M>(
        &self,
        email: &str,
        mail: &M,
        users: &U,
    ) -> KeyKeeperResult<String>
    where
        U: UserDirectory,
        M: MailDirectory,
    {
        let row = mail.find_by_email(email).await?;
        let mut output = self.delete(email).await?;
        if self.runner.is_dry_run() {
            output.push_str("\ndry-run: directory records left unchanged");
            return Ok(output);
        }
        if mail.delete_by_email(email).await? {
            output.push_str(&format!("\nremoved virtual user row for {}", email));
        }
        if let Some(user_id) = row.and_then(|r| r.user_id) {
            users
                .append_activity(&ActivityEntry::new(
                    user_id,
                    ActivityType::MailAccountDeleted,
                    json!({ "email": email }),
                ))
                .await?;
        }
        Ok(output)
    }
}
