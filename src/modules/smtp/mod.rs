// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::raise_error;
use client::SmtpTransaction;
use manager::{SmtpClientManager, SmtpTransportConfig};
use request::{OutgoingMessage, PreparedMessage};
use serde::Serialize;
use tracing::{info, warn};

pub mod client;
pub mod manager;
pub mod request;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RejectedRecipient {
    pub address: String,
    pub reply: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SendReport {
    pub message_id: String,
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedRecipient>,
}

/// Submits the message as the configured mailbox. Succeeds as long as one recipient
/// is accepted; the others are listed in `rejected`.
pub async fn send_email(
    message: &OutgoingMessage,
    config: &SmtpTransportConfig,
) -> KeyKeeperResult<SendReport> {
    let prepared = message.prepare(&config.username)?;
    let mut client = SmtpClientManager::new(config.clone()).build().await?;
    let result = deliver(&mut client, &prepared).await;
    client.quit().await;
    let report = result.map_err(|e| e.context(format!("send as {}", config.username)))?;
    info!(
        "Sent {} as {}: {} accepted, {} rejected",
        report.message_id,
        config.username,
        report.accepted.len(),
        report.rejected.len()
    );
    Ok(report)
}

pub(crate) async fn deliver<T: SmtpTransaction>(
    transaction: &mut T,
    message: &PreparedMessage,
) -> KeyKeeperResult<SendReport> {
    transaction.mail_from(&message.mail_from).await?;

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for recipient in &message.recipients {
        match transaction.rcpt_to(recipient).await? {
            None => accepted.push(recipient.clone()),
            Some(reply) => {
                warn!("Recipient {} rejected: {}", recipient, reply);
                rejected.push(RejectedRecipient {
                    address: recipient.clone(),
                    reply,
                });
            }
        }
    }

    if accepted.is_empty() {
        if let Err(e) = transaction.reset().await {
            warn!("RSET after rejected recipients failed: {}", e);
        }
        let detail = rejected
            .iter()
            .map(|r| format!("{} ({})", r.address, r.reply))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(raise_error!(
            format!("Every recipient was rejected: {}", detail),
            ErrorCode::SmtpCommandFailed
        ));
    }

    transaction.data(&message.body).await?;
    Ok(SendReport {
        message_id: message.message_id.clone(),
        accepted,
        rejected,
    })
}
