// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Application user, keyed by a UUID string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    /// ASCII-armored PGP public key
    pub public_key: Option<String>,
    pub key_id: Option<String>,
    pub fingerprint: Option<String>,
    pub auth_method: Option<String>,
    /// pending, active, ...
    pub status: String,
    /// `ivHex:cipherHex` envelope of the mailbox password
    #[serde(skip_serializing)]
    pub mail_password: Option<String>,
    /// Unix milliseconds
    pub last_login: Option<i64>,
}

/// Row of the mail server's virtual user table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMailUser {
    pub id: u64,
    pub domain_id: u64,
    pub username: String,
    pub email: String,
    /// `{SCHEME}hash`
    #[serde(skip_serializing)]
    pub password: String,
    pub user_id: Option<String>,
}

impl VirtualMailUser {
    pub fn is_linked(&self) -> bool {
        self.user_id.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewVirtualUser {
    pub domain_id: u64,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDomain {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    MailAccountCreated,
    MailAccountLinked,
    MailAccountDeleted,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::MailAccountCreated => "mail_account_created",
            ActivityType::MailAccountLinked => "mail_account_linked",
            ActivityType::MailAccountDeleted => "mail_account_deleted",
        }
    }
}

/// Append-only activity log record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub user_id: String,
    pub activity_type: ActivityType,
    pub ip_address: Option<String>,
    pub details: Value,
}

impl ActivityEntry {
    pub fn new(user_id: impl Into<String>, activity_type: ActivityType, details: Value) -> Self {
        Self {
            user_id: user_id.into(),
            activity_type,
            ip_address: None,
            details,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Challenge {
    pub id: String,
    pub user_id: String,
    pub challenge: String,
    /// Unix milliseconds
    pub expires_at: i64,
    pub used: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: i64,
    pub last_active: i64,
}
