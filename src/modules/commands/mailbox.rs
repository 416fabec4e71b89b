// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::print_json;
use crate::modules::context::{app_secret, AppContext};
use crate::modules::credential::envelope::decrypt_password;
use crate::modules::directory::UserDirectory;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::imap::executor::{FetchOptions, MailboxClient, OperationResult};
use crate::modules::imap::flags::FlagUpdate;
use crate::modules::message::AddressInput;
use crate::modules::reconcile::IdentityReconciler;
use crate::modules::settings::cli::Settings;
use crate::modules::smtp::manager::SmtpTransportConfig;
use crate::modules::smtp::request::OutgoingMessage;
use crate::modules::smtp::send_email;
use crate::raise_error;

/// Mailbox address and plaintext password of the user's linked account.
struct MailCredentials {
    email: String,
    password: String,
}

async fn credentials(settings: &Settings, user_id: &str) -> KeyKeeperResult<MailCredentials> {
    if !settings.use_real_mail_server {
        return Err(raise_error!(
            "USE_REAL_MAIL_SERVER is off; refusing to contact the mail server".into(),
            ErrorCode::MissingConfiguration
        ));
    }
    let secret = app_secret(settings)?;
    let context = AppContext::connect(settings).await?;
    let result: KeyKeeperResult<MailCredentials> = async {
        let reconciliation = IdentityReconciler::new(&context.users, &context.mail)
            .find_or_explain_mismatch(user_id)
            .await?;
        let account = reconciliation.linked_account().ok_or_else(|| {
            raise_error!(
                format!(
                    "User {} has no linked mail account ({}); run `diagnose` for details",
                    user_id,
                    reconciliation.label()
                ),
                ErrorCode::ResourceNotFound
            )
        })?;
        let envelope = context
            .users
            .find_user(user_id)
            .await?
            .and_then(|user| user.mail_password)
            .ok_or_else(|| {
                raise_error!(
                    format!(
                        "User {} has no stored mail password; run `create-account` again",
                        user_id
                    ),
                    ErrorCode::ResourceNotFound
                )
            })?;
        Ok(MailCredentials {
            email: account.email.clone(),
            password: decrypt_password(&envelope, &secret)?,
        })
    }
    .await;
    context.close().await;
    result
}

async fn mailbox_client(settings: &Settings, user_id: &str) -> KeyKeeperResult<MailboxClient> {
    let credentials = credentials(settings, user_id).await?;
    Ok(MailboxClient::from_settings(
        settings,
        &credentials.email,
        &credentials.password,
    ))
}

pub async fn cmd_inbox(
    settings: &Settings,
    user_id: &str,
    folder: &str,
    limit: u32,
    offset: u32,
    body: bool,
) -> KeyKeeperResult<()> {
    let client = mailbox_client(settings, user_id).await?;
    let options = FetchOptions {
        limit,
        offset,
        fetch_body: body,
    };
    let emails = client.fetch_emails(folder, &options).await?;
    print_json(&emails)
}

pub async fn cmd_read(
    settings: &Settings,
    user_id: &str,
    uid: u32,
    folder: &str,
    mark_read: bool,
) -> KeyKeeperResult<()> {
    let client = mailbox_client(settings, user_id).await?;
    match client.fetch_email(uid, folder, mark_read).await? {
        Some(email) => print_json(&email),
        None => Err(raise_error!(
            format!("No message with uid {} in {}", uid, folder),
            ErrorCode::ResourceNotFound
        )),
    }
}

pub fn flag_update(seen: Option<bool>, flagged: Option<bool>, answered: Option<bool>) -> FlagUpdate {
    FlagUpdate {
        seen,
        flagged,
        answered,
    }
}

fn finish(result: OperationResult) -> KeyKeeperResult<()> {
    print_json(&result)?;
    match result.error {
        Some(error) if !result.success => {
            Err(raise_error!(error, ErrorCode::ImapCommandFailed))
        }
        _ => Ok(()),
    }
}

pub async fn cmd_flag(
    settings: &Settings,
    user_id: &str,
    uid: u32,
    folder: &str,
    update: FlagUpdate,
) -> KeyKeeperResult<()> {
    if update.is_empty() {
        return Err(raise_error!(
            "Nothing to change; pass --seen, --flagged or --answered".into(),
            ErrorCode::InvalidParameter
        ));
    }
    let client = mailbox_client(settings, user_id).await?;
    finish(client.update_email(uid, folder, &update).await)
}

pub async fn cmd_remove(
    settings: &Settings,
    user_id: &str,
    uid: u32,
    folder: &str,
    permanent: bool,
) -> KeyKeeperResult<()> {
    let client = mailbox_client(settings, user_id).await?;
    finish(client.delete_email(uid, folder, permanent).await)
}

pub fn outgoing_message(
    to: &[String],
    cc: &[String],
    bcc: &[String],
    subject: &str,
    text: Option<String>,
    html: Option<String>,
    encrypted: bool,
) -> OutgoingMessage {
    let inputs = |list: &[String]| -> Vec<AddressInput> {
        list.iter().map(|a| AddressInput::from(a.as_str())).collect()
    };
    OutgoingMessage {
        to: inputs(to),
        cc: inputs(cc),
        bcc: inputs(bcc),
        subject: Some(subject.to_string()),
        text,
        html,
        encrypted,
        ..Default::default()
    }
}

pub async fn cmd_send(
    settings: &Settings,
    user_id: &str,
    message: &OutgoingMessage,
) -> KeyKeeperResult<()> {
    let credentials = credentials(settings, user_id).await?;
    let config = SmtpTransportConfig::from_settings(
        settings,
        &credentials.email,
        &credentials.password,
    );
    let report = send_email(message, &config).await?;
    print_json(&report)
}
