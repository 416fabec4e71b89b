// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::message::{Addr, AddressInput, ENCRYPTED_HEADER};
use crate::{raise_error, utc_now, validate_email};
use base64::Engine;
use mail_send::mail_builder::headers::address::Address;
use mail_send::mail_builder::headers::text::Text as XText;
use mail_send::mail_builder::MessageBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content: String,
    /// Guessed from the file name when absent.
    pub content_type: Option<String>,
    /// `content` is base64 rather than the raw body.
    #[serde(default)]
    pub base64: bool,
}

impl OutgoingAttachment {
    fn decoded(&self) -> KeyKeeperResult<Vec<u8>> {
        if !self.base64 {
            return Ok(self.content.as_bytes().to_vec());
        }
        let compact: String = self
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| {
                raise_error!(
                    format!("Attachment '{}' is not valid base64: {}", self.filename, e),
                    ErrorCode::InvalidParameter
                )
            })
    }

    fn mime_type(&self) -> String {
        self.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.filename)
                .first_or_octet_stream()
                .to_string()
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub from: Option<AddressInput>,
    #[serde(default)]
    pub to: Vec<AddressInput>,
    #[serde(default)]
    pub cc: Vec<AddressInput>,
    #[serde(default)]
    pub bcc: Vec<AddressInput>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<OutgoingAttachment>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Adds `X-KeyKeeper-Encrypted: true`.
    #[serde(default)]
    pub encrypted: bool,
}

/// A rendered message together with its SMTP envelope.
#[derive(Debug)]
pub struct PreparedMessage {
    pub message_id: String,
    pub mail_from: String,
    pub recipients: Vec<String>,
    pub body: Vec<u8>,
}

impl OutgoingMessage {
    fn resolve(list: &[AddressInput], field: &str) -> KeyKeeperResult<Vec<Addr>> {
        list.iter()
            .map(|input| {
                let addr = input.to_addr();
                let address = addr.address.as_deref().unwrap_or_default();
                validate_email!(address)
                    .map_err(|e| e.context(format!("`{}` address '{}'", field, addr)))?;
                Ok(addr)
            })
            .collect()
    }

    fn to_address(addrs: Vec<Addr>) -> Address<'static> {
        let mut list: Vec<Address<'static>> = addrs.into_iter().map(Into::into).collect();
        if list.len() == 1 {
            list.remove(0)
        } else {
            Address::new_list(list)
        }
    }

    /// Validates addresses and renders the RFC 5322 message. `default_from` is the
    /// authenticated mailbox and is used when no sender is given.
    pub fn prepare(&self, default_from: &str) -> KeyKeeperResult<PreparedMessage> {
        let from_input = self
            .from
            .clone()
            .unwrap_or_else(|| AddressInput::Text(default_from.to_string()));
        let from = Self::resolve(std::slice::from_ref(&from_input), "from")?.remove(0);
        let to = Self::resolve(&self.to, "to")?;
        let cc = Self::resolve(&self.cc, "cc")?;
        let bcc = Self::resolve(&self.bcc, "bcc")?;
        if to.is_empty() && cc.is_empty() && bcc.is_empty() {
            return Err(raise_error!(
                "Message has no recipients".into(),
                ErrorCode::InvalidParameter
            ));
        }
        if self.text.is_none() && self.html.is_none() && self.attachments.is_empty() {
            return Err(raise_error!(
                "Message needs a text body, an HTML body or an attachment".into(),
                ErrorCode::InvalidParameter
            ));
        }

        let mail_from = from.address.clone().unwrap_or_default();
        let message_id = generate_message_id(&mail_from);
        let mut recipients: Vec<String> = Vec::new();
        for addr in to.iter().chain(cc.iter()).chain(bcc.iter()) {
            let address = addr.address.clone().unwrap_or_default();
            if !recipients
                .iter()
                .any(|known| known.eq_ignore_ascii_case(&address))
            {
                recipients.push(address);
            }
        }

        let mut builder = MessageBuilder::new()
            .from(Address::from(from))
            .message_id(message_id.clone())
            .subject(self.subject.clone().unwrap_or_default());
        if !to.is_empty() {
            builder = builder.to(Self::to_address(to));
        }
        if !cc.is_empty() {
            builder = builder.cc(Self::to_address(cc));
        }
        if let Some(text) = &self.text {
            builder = builder.text_body(text.clone());
        }
        if let Some(html) = &self.html {
            builder = builder.html_body(html.clone());
        }
        for attachment in &self.attachments {
            builder = builder.attachment(
                attachment.mime_type(),
                attachment.filename.clone(),
                attachment.decoded()?,
            );
        }
        if self.encrypted {
            builder = builder.header(ENCRYPTED_HEADER, XText::new("true"));
        }
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("bcc") {
                continue;
            }
            builder = builder.header(name.clone(), XText::new(value.clone()));
        }

        let body = builder.write_to_vec().map_err(|e| {
            raise_error!(
                format!("Failed to build message: {}", e),
                ErrorCode::InternalError
            )
        })?;
        Ok(PreparedMessage {
            message_id,
            mail_from,
            recipients,
            body,
        })
    }
}

fn generate_message_id(from: &str) -> String {
    let random_bytes: [u8; 16] = rand::random();
    let domain = from
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
        .unwrap_or("keykeeper");
    format!("{}.{}@{}", utc_now!(), hex::encode(random_bytes), domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::message::Email;

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            to: vec!["Bob <bob@keykeeper.world>".into()],
            cc: vec![AddressInput::Structured(Addr {
                name: Some("Carol".into()),
                address: Some("carol@keykeeper.world".into()),
            })],
            bcc: vec!["audit@keykeeper.world".into(), "BOB@keykeeper.world".into()],
            subject: Some("Hello".into()),
            text: Some("-----BEGIN PGP MESSAGE-----".into()),
            attachments: vec![OutgoingAttachment {
                filename: "key.asc".into(),
                content: "S0VZREFUQQ==".into(),
                content_type: Some("application/pgp-keys".into()),
                base64: true,
            }],
            encrypted: true,
            ..Default::default()
        }
    }

    #[test]
    fn envelope_includes_bcc_without_exposing_it() {
        let prepared = message().prepare("alice@keykeeper.world").unwrap();
        assert_eq!(prepared.mail_from, "alice@keykeeper.world");
        assert_eq!(
            prepared.recipients,
            vec![
                "bob@keykeeper.world",
                "carol@keykeeper.world",
                "audit@keykeeper.world"
            ]
        );
        assert!(prepared.message_id.ends_with("@keykeeper.world"));
        let rendered = String::from_utf8_lossy(&prepared.body);
        assert!(!rendered.contains("audit@keykeeper.world"));
        assert!(rendered.contains("X-KeyKeeper-Encrypted: true"));
    }

    #[test]
    fn rendered_message_parses_back() {
        let prepared = message().prepare("alice@keykeeper.world").unwrap();
        let mut email = Email::new(1, "Sent", vec![]);
        email.apply_mime(&prepared.body, true).unwrap();
        assert!(email.encrypted);
        assert_eq!(email.subject.as_deref(), Some("Hello"));
        assert_eq!(email.cc[0].name.as_deref(), Some("Carol"));
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].content, "S0VZREFUQQ==");
        assert_eq!(email.attachments[0].size, "KEYDATA".len());
    }

    #[test]
    fn rejects_invalid_input() {
        let empty = OutgoingMessage {
            text: Some("hi".into()),
            ..Default::default()
        };
        assert_eq!(
            empty.prepare("a@keykeeper.world").unwrap_err().code(),
            ErrorCode::InvalidParameter
        );

        let bad_address = OutgoingMessage {
            to: vec!["not-an-address".into()],
            text: Some("hi".into()),
            ..Default::default()
        };
        assert_eq!(
            bad_address.prepare("a@keykeeper.world").unwrap_err().code(),
            ErrorCode::InvalidParameter
        );

        let mut bad_attachment = message();
        bad_attachment.attachments[0].content = "***".into();
        assert_eq!(
            bad_attachment
                .prepare("a@keykeeper.world")
                .unwrap_err()
                .code(),
            ErrorCode::InvalidParameter
        );
    }

    #[test]
    fn attachment_type_is_guessed_from_name() {
        let attachment = OutgoingAttachment {
            filename: "notes.txt".into(),
            content: "hi".into(),
            ..Default::default()
        };
        assert_eq!(attachment.mime_type(), "text/plain");
        assert_eq!(attachment.decoded().unwrap(), b"hi");
    }
}
