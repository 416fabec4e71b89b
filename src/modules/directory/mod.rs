// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::KeyKeeperResult;
use entity::{ActivityEntry, Challenge, NewVirtualUser, Session, User, VirtualMailUser};
use session::SweepReport;
use std::time::Duration;

pub mod entity;
#[cfg(test)]
pub mod memory;
pub mod mysql;
pub mod session;

/// Application-owned user records.
pub trait UserDirectory {
    async fn find_user(&self, id: &str) -> KeyKeeperResult<Option<User>>;

    async fn set_mail_password(&self, id: &str, envelope: &str) -> KeyKeeperResult<()>;

    async fn append_activity(&self, entry: &ActivityEntry) -> KeyKeeperResult<()>;
}

/// The mail server's virtual users and domains. Only `user_id` and `password` are ever
/// rewritten on an existing row.
pub trait MailDirectory {
    /// Every row whose `user_id` equals `user_id` exactly. More than one is a data error
    /// the caller reports.
    async fn find_by_user_id(&self, user_id: &str) -> KeyKeeperResult<Vec<VirtualMailUser>>;

    /// Case-insensitive email lookup.
    async fn find_by_email(&self, email: &str) -> KeyKeeperResult<Option<VirtualMailUser>>;

    async fn find_by_id(&self, id: u64) -> KeyKeeperResult<Option<VirtualMailUser>>;

    /// All rows with a non-null `user_id`.
    async fn list_linked(&self) -> KeyKeeperResult<Vec<VirtualMailUser>>;

    async fn set_user_id(&self, id: u64, user_id: &str) -> KeyKeeperResult<()>;

    /// Inserts the row, or only replaces `password` when the email already exists.
    async fn upsert_account(&self, row: &NewVirtualUser) -> KeyKeeperResult<VirtualMailUser>;

    async fn delete_by_email(&self, email: &str) -> KeyKeeperResult<bool>;

    /// Id of the domain row, inserting it when no row matches case-insensitively.
    async fn ensure_domain(&self, name: &str) -> KeyKeeperResult<u64>;
}

/// Single-use login challenges and sessions.
pub trait SessionDirectory {
    async fn create_challenge(&self, user_id: &str, ttl: Duration) -> KeyKeeperResult<Challenge>;

    /// Marks the challenge used. Fails when it is unknown, expired or already consumed.
    async fn consume_challenge(&self, user_id: &str, challenge: &str) -> KeyKeeperResult<()>;

    async fn create_session(
        &self,
        user_id: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        ttl: Duration,
    ) -> KeyKeeperResult<Session>;

    async fn delete_session(&self, token: &str) -> KeyKeeperResult<bool>;

    /// Removes expired or consumed challenges and expired sessions.
    async fn sweep_expired(&self) -> KeyKeeperResult<SweepReport>;
}
