// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::entity::{ActivityEntry, NewVirtualUser, User, VirtualMailUser};
use super::{MailDirectory, UserDirectory};
use crate::modules::database::{db_error, DatabaseHandle};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::raise_error;
use mysql_async::prelude::Queryable;
use tracing::debug;

pub const USERS_TABLE: &str = "users";
pub const ACTIVITY_TABLE: &str = "activity_logs";

const USER_COLUMNS: &str = "id, email, name, public_key, key_id, fingerprint, auth_method, status, \
     mail_password, CAST(UNIX_TIMESTAMP(last_login) * 1000 AS SIGNED)";
const MAIL_COLUMNS: &str = "id, domain_id, username, email, password, user_id";

type UserRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
);

type MailRow = (u64, u64, Option<String>, String, String, Option<String>);

fn user_from_row(row: UserRow) -> User {
    let (id, email, name, public_key, key_id, fingerprint, auth_method, status, mail_password, last_login) =
        row;
    User {
        id,
        email,
        name,
        public_key,
        key_id,
        fingerprint,
        auth_method,
        status: status.unwrap_or_else(|| "pending".into()),
        mail_password,
        last_login,
    }
}

fn mail_user_from_row(row: MailRow) -> VirtualMailUser {
    let (id, domain_id, username, email, password, user_id) = row;
    let username = username
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
    VirtualMailUser {
        id,
        domain_id,
        username,
        email,
        password,
        user_id,
    }
}

/// Users and activity log in the primary application database.
pub struct MysqlUserDirectory {
    handle: DatabaseHandle,
}

impl MysqlUserDirectory {
    pub fn new(handle: DatabaseHandle) -> Self {
        Self { handle }
    }
}

impl UserDirectory for MysqlUserDirectory {
    async fn find_user(&self, id: &str) -> KeyKeeperResult<Option<User>> {
        let mut conn = self.handle.conn().await?;
        let row: Option<UserRow> = conn
            .exec_first(
                format!("SELECT {} FROM `{}` WHERE id = ?", USER_COLUMNS, USERS_TABLE),
                (id,),
            )
            .await
            .map_err(|e| db_error(e).context(format!("find user {}", id)))?;
        Ok(row.map(user_from_row))
    }

    async fn set_mail_password(&self, id: &str, envelope: &str) -> KeyKeeperResult<()> {
        let mut conn = self.handle.conn().await?;
        conn.exec_drop(
            format!("UPDATE `{}` SET mail_password = ? WHERE id = ?", USERS_TABLE),
            (envelope, id),
        )
        .await
        .map_err(|e| db_error(e).context(format!("store mail password for {}", id)))?;
        if conn.affected_rows() == 0 {
            return Err(raise_error!(
                format!("User {} not found", id),
                ErrorCode::ResourceNotFound
            ));
        }
        Ok(())
    }

    async fn append_activity(&self, entry: &ActivityEntry) -> KeyKeeperResult<()> {
        let details = serde_json::to_string(&entry.details)
            .map_err(|e| raise_error!(e.to_string(), ErrorCode::InternalError))?;
        let mut conn = self.handle.conn().await?;
        conn.exec_drop(
            format!(
                "INSERT INTO `{}` (user_id, activity_type, ip_address, details, created_at) \
                 VALUES (?, ?, ?, ?, NOW())",
                ACTIVITY_TABLE
            ),
            (
                entry.user_id.as_str(),
                entry.activity_type.as_str(),
                entry.ip_address.as_deref(),
                details,
            ),
        )
        .await
        .map_err(|e| db_error(e).context("append activity"))
    }
}

/// Virtual users and domains, in whichever database the resolver picked.
pub struct MysqlMailDirectory {
    handle: DatabaseHandle,
    users_table: String,
    domains_table: String,
}

impl MysqlMailDirectory {
    pub fn new(handle: DatabaseHandle, users_table: &str, domains_table: &str) -> Self {
        Self {
            handle,
            users_table: users_table.to_string(),
            domains_table: domains_table.to_string(),
        }
    }

    /// Releases a dedicated mail-database connection.
    pub async fn close(self) {
        self.handle.close().await
    }

    async fn select(
        &self,
        filter: &str,
        params: mysql_async::Params,
    ) -> KeyKeeperResult<Vec<VirtualMailUser>> {
        let mut conn = self.handle.conn().await?;
        let rows: Vec<MailRow> = conn
            .exec(
                format!(
                    "SELECT {} FROM `{}` WHERE {} ORDER BY id",
                    MAIL_COLUMNS, self.users_table, filter
                ),
                params,
            )
            .await
            .map_err(|e| db_error(e).context(format!("query {}", self.users_table)))?;
        Ok(rows.into_iter().map(mail_user_from_row).collect())
    }
}

impl MailDirectory for MysqlMailDirectory {
    async fn find_by_user_id(&self, user_id: &str) -> KeyKeeperResult<Vec<VirtualMailUser>> {
        self.select("BINARY user_id = ?", (user_id,).into()).await
    }

    async fn find_by_email(&self, email: &str) -> KeyKeeperResult<Option<VirtualMailUser>> {
        Ok(self
            .select("LOWER(email) = LOWER(?)", (email.trim(),).into())
            .await?
            .into_iter()
            .next())
    }

    async fn find_by_id(&self, id: u64) -> KeyKeeperResult<Option<VirtualMailUser>> {
        Ok(self.select("id = ?", (id,).into()).await?.into_iter().next())
    }

    async fn list_linked(&self) -> KeyKeeperResult<Vec<VirtualMailUser>> {
        self.select("user_id IS NOT NULL", mysql_async::Params::Empty)
            .await
    }

    async fn set_user_id(&self, id: u64, user_id: &str) -> KeyKeeperResult<()> {
        let mut conn = self.handle.conn().await?;
        conn.exec_drop(
            format!("UPDATE `{}` SET user_id = ? WHERE id = ?", self.users_table),
            (user_id, id),
        )
        .await
        .map_err(|e| db_error(e).context(format!("link virtual user {}", id)))
    }

    async fn upsert_account(&self, row: &NewVirtualUser) -> KeyKeeperResult<VirtualMailUser> {
        if let Some(mut existing) = self.find_by_email(&row.email).await? {
            debug!("Virtual user {} exists, replacing password only", existing.email);
            let mut conn = self.handle.conn().await?;
            conn.exec_drop(
                format!("UPDATE `{}` SET password = ? WHERE id = ?", self.users_table),
                (row.password.as_str(), existing.id),
            )
            .await
            .map_err(|e| db_error(e).context(format!("update password of {}", row.email)))?;
            existing.password = row.password.clone();
            return Ok(existing);
        }

        let mut conn = self.handle.conn().await?;
        conn.exec_drop(
            format!(
                "INSERT INTO `{}` (domain_id, username, email, password) VALUES (?, ?, ?, ?)",
                self.users_table
            ),
            (
                row.domain_id,
                row.username.as_str(),
                row.email.as_str(),
                row.password.as_str(),
            ),
        )
        .await
        .map_err(|e| db_error(e).context(format!("insert virtual user {}", row.email)))?;
        let id = conn.last_insert_id().ok_or_else(|| {
            raise_error!(
                format!("No id returned for virtual user {}", row.email),
                ErrorCode::DatabaseError
            )
        })?;
        Ok(VirtualMailUser {
            id,
            domain_id: row.domain_id,
            username: row.username.clone(),
            email: row.email.clone(),
            password: row.password.clone(),
            user_id: None,
        })
    }

    async fn delete_by_email(&self, email: &str) -> KeyKeeperResult<bool> {
        let mut conn = self.handle.conn().await?;
        conn.exec_drop(
            format!("DELETE FROM `{}` WHERE email = ?", self.users_table),
            (email,),
        )
        .await
        .map_err(|e| db_error(e).context(format!("delete virtual user {}", email)))?;
        Ok(conn.affected_rows() > 0)
    }

    async fn ensure_domain(&self, name: &str) -> KeyKeeperResult<u64> {
        let name = name.trim().to_lowercase();
        let mut conn = self.handle.conn().await?;
        let existing: Option<u64> = conn
            .exec_first(
                format!(
                    "SELECT id FROM `{}` WHERE LOWER(name) = ? ORDER BY id LIMIT 1",
                    self.domains_table
                ),
                (name.as_str(),),
            )
            .await
            .map_err(|e| db_error(e).context(format!("look up domain {}", name)))?;
        if let Some(id) = existing {
            return Ok(id);
        }
        conn.exec_drop(
            format!("INSERT INTO `{}` (name) VALUES (?)", self.domains_table),
            (name.as_str(),),
        )
        .await
        .map_err(|e| db_error(e).context(format!("insert domain {}", name)))?;
        conn.last_insert_id().ok_or_else(|| {
            raise_error!(
                format!("No id returned for domain {}", name),
                ErrorCode::DatabaseError
            )
        })
    }
}
