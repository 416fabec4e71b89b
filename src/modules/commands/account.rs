// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::generate_token;
use crate::modules::context::{app_secret, AppContext};
use crate::modules::directory::UserDirectory;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::provision::{CreateAccount, ProvisionedAccount};
use crate::modules::reconcile::{IdentityReconciler, LinkOutcome};
use crate::modules::settings::cli::Settings;
use crate::raise_error;

const GENERATED_PASSWORD_LEN: usize = 16;

pub async fn cmd_create_account(
    settings: &Settings,
    user_id: &str,
    email: Option<&str>,
    password: Option<&str>,
) -> KeyKeeperResult<()> {
    let secret = app_secret(settings)?;
    let context = AppContext::connect(settings).await?;
    let result = async {
        let user = context.users.find_user(user_id).await?.ok_or_else(|| {
            raise_error!(
                format!("Application user {} not found", user_id),
                ErrorCode::ResourceNotFound
            )
        })?;
        let request = CreateAccount {
            email: email.unwrap_or(user.email.as_str()).to_string(),
            password: password
                .map(String::from)
                .unwrap_or_else(|| generate_token!(GENERATED_PASSWORD_LEN)),
            display_name: user.name.clone(),
            quota_mb: settings.default_mail_quota,
            linked_user_id: Some(user.id.clone()),
        };
        context
            .manager
            .create_with_directory(&request, &context.mail, &context.users, &secret)
            .await
    }
    .await;
    context.close().await;
    print_provisioned(&result?);
    Ok(())
}

fn print_provisioned(account: &ProvisionedAccount) {
    println!("Mailbox {} provisioned", account.email);
    if let Some(id) = account.virtual_user_id {
        println!("  virtual user id: {}", id);
    }
    println!("  password scheme: {}", account.scheme);
    if account.degraded {
        println!("  WARNING: stored as PLAIN; check MAIL_CRYPT_UTILITY");
    }
    for line in account.output.lines().filter(|l| !l.trim().is_empty()) {
        println!("  {}", line);
    }
}

pub async fn cmd_link(settings: &Settings, user_id: &str, virtual_user_id: u64) -> KeyKeeperResult<()> {
    let context = AppContext::connect(settings).await?;
    let result = IdentityReconciler::new(&context.users, &context.mail)
        .link(user_id, virtual_user_id)
        .await;
    context.close().await;
    match result? {
        LinkOutcome::Linked(account) => {
            println!("Linked {} (virtual user {}) to {}", account.email, account.id, user_id)
        }
        LinkOutcome::AlreadyLinked(account) => println!(
            "{} (virtual user {}) was already linked to {}",
            account.email, account.id, user_id
        ),
    }
    Ok(())
}

pub async fn cmd_delete_account(settings: &Settings, email: &str) -> KeyKeeperResult<()> {
    let context = AppContext::connect(settings).await?;
    let result = context
        .manager
        .delete_with_directory(email, &context.mail, &context.users)
        .await;
    context.close().await;
    let output = result?;
    println!("Mailbox {} removed", email);
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        println!("  {}", line);
    }
    Ok(())
}
