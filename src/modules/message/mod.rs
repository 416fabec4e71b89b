// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::imap::flags::EmailFlag;
use crate::raise_error;
use mail_parser::{Addr as MimeAddr, Address as MimeAddress, Message, MessageParser, MimeHeaders};
use mail_send::mail_builder::headers::address::Address as SmtpAddress;
use mail_send::mail_builder::headers::address::EmailAddress as SmtpEmailAddress;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Marker header set on messages whose body is PGP-encrypted by the client.
pub const ENCRYPTED_HEADER: &str = "X-KeyKeeper-Encrypted";

#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct Addr {
    pub name: Option<String>,
    pub address: Option<String>,
}

impl Addr {
    /// Accepts `Name <user@host>`, `<user@host>` or a bare `user@host`.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if let (Some(open), true) = (trimmed.rfind('<'), trimmed.ends_with('>')) {
            let address = trimmed[open + 1..trimmed.len() - 1].trim();
            let name = trimmed[..open].trim().trim_matches('"').trim();
            return Addr {
                name: (!name.is_empty()).then(|| name.to_string()),
                address: (!address.is_empty()).then(|| address.to_string()),
            };
        }
        Addr {
            name: None,
            address: (!trimmed.is_empty()).then(|| trimmed.to_string()),
        }
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.name, &self.address) {
            (Some(name), Some(address)) => write!(f, "{} <{}>", name, address),
            (None, Some(address)) => write!(f, "<{}>", address),
            (Some(name), None) => write!(f, "{}", name),
            (None, None) => write!(f, ""),
        }
    }
}

impl<'x> From<&MimeAddr<'x>> for Addr {
    fn from(original: &MimeAddr<'x>) -> Self {
        Addr {
            name: original.name.as_ref().map(|s| s.to_string()),
            address: original.address.as_ref().map(|s| s.to_string()),
        }
    }
}

impl<'x> From<Addr> for SmtpAddress<'x> {
    fn from(addr: Addr) -> Self {
        SmtpAddress::Address(SmtpEmailAddress {
            name: addr.name.map(Cow::Owned),
            email: Cow::Owned(addr.address.unwrap_or_default()),
        })
    }
}

/// Flattens groups so callers only ever see individual mailboxes.
pub fn addresses(address: Option<&MimeAddress<'_>>) -> Vec<Addr> {
    match address {
        Some(MimeAddress::List(addrs)) => addrs.iter().map(Addr::from).collect(),
        Some(MimeAddress::Group(groups)) => groups
            .iter()
            .flat_map(|group| group.addresses.iter().map(Addr::from))
            .collect(),
        None => Vec::new(),
    }
}

/// A recipient or sender as callers supply it: structured, or a single string.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressInput {
    Structured(Addr),
    Text(String),
}

impl AddressInput {
    pub fn to_addr(&self) -> Addr {
        match self {
            AddressInput::Structured(addr) => addr.clone(),
            AddressInput::Text(text) => Addr::parse(text),
        }
    }
}

impl From<&str> for AddressInput {
    fn from(value: &str) -> Self {
        AddressInput::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAttachment {
    pub filename: Option<String>,
    pub content_type: String,
    pub size: usize,
    /// Standard base64 of the decoded part body.
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub uid: u32,
    pub folder: String,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Addr>,
    pub to: Vec<Addr>,
    pub cc: Vec<Addr>,
    /// Milliseconds since the epoch; the Date header, else the server's INTERNALDATE.
    pub date: Option<i64>,
    pub flags: Vec<EmailFlag>,
    pub seen: bool,
    pub flagged: bool,
    pub answered: bool,
    pub size: Option<u32>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<EmailAttachment>,
    pub encrypted: bool,
}

impl Email {
    pub fn new(uid: u32, folder: &str, flags: Vec<EmailFlag>) -> Self {
        Self {
            uid,
            folder: folder.to_string(),
            seen: flags.contains(&EmailFlag::Seen),
            flagged: flags.contains(&EmailFlag::Flagged),
            answered: flags.contains(&EmailFlag::Answered),
            flags,
            ..Default::default()
        }
    }

    /// Fills envelope fields from a header block or a full message. Bodies and
    /// attachments are only taken when `with_body` is set.
    pub fn apply_mime(&mut self, raw: &[u8], with_body: bool) -> KeyKeeperResult<()> {
        let message = parse(raw)?;
        self.message_id = message.message_id().map(String::from);
        self.subject = message.subject().map(String::from);
        self.from = addresses(message.from());
        self.to = addresses(message.to());
        self.cc = addresses(message.cc());
        if let Some(date) = message.date() {
            self.date = Some(date.to_timestamp() * 1000);
        }
        self.encrypted = is_encrypted(&message);
        if with_body {
            self.text = message.body_text(0).map(String::from);
            self.html = message.body_html(0).map(String::from);
            self.attachments = extract_attachments(&message);
        }
        Ok(())
    }
}

pub fn parse(raw: &[u8]) -> KeyKeeperResult<Message<'_>> {
    MessageParser::new().parse(raw).ok_or_else(|| {
        raise_error!(
            "Failed to parse message: not a valid RFC 5322 document".into(),
            ErrorCode::DecodeFailed
        )
    })
}

fn is_encrypted(message: &Message<'_>) -> bool {
    message
        .headers()
        .iter()
        .find(|header| header.name().eq_ignore_ascii_case(ENCRYPTED_HEADER))
        .and_then(|header| header.value().as_text())
        .is_some_and(|value| {
            let value = value.trim();
            value.eq_ignore_ascii_case("true") || value == "1" || value.eq_ignore_ascii_case("yes")
        })
}

fn extract_attachments(message: &Message<'_>) -> Vec<EmailAttachment> {
    use base64::Engine;
    message
        .attachments()
        .map(|part| {
            let content_type = part
                .content_type()
                .map(|c| match c.subtype() {
                    Some(subtype) => format!("{}/{}", c.ctype(), subtype),
                    None => c.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".into());
            let contents = part.contents();
            EmailAttachment {
                filename: part.attachment_name().map(String::from),
                content_type,
                size: contents.len(),
                content: base64::engine::general_purpose::STANDARD.encode(contents),
            }
        })
        .collect()
}
