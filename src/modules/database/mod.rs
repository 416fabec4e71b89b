// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::{KeyKeeperError, KeyKeeperResult};
use crate::{raise_error, run_with_timeout};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Pool};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

pub mod resolver;
pub mod url;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn db_error(e: mysql_async::Error) -> KeyKeeperError {
    raise_error!(format!("{}", e), ErrorCode::DatabaseError)
}

/// Where queries go: the shared application pool, or a connection opened just for the
/// mail database. Only dedicated handles need [`DatabaseHandle::close`].
pub enum DatabaseHandle {
    Primary(Pool),
    Dedicated(Mutex<Conn>),
}

/// A connection borrowed from a [`DatabaseHandle`].
pub enum HandleConn<'a> {
    Pooled(Conn),
    Dedicated(MutexGuard<'a, Conn>),
}

impl Deref for HandleConn<'_> {
    type Target = Conn;

    fn deref(&self) -> &Self::Target {
        match self {
            HandleConn::Pooled(conn) => conn,
            HandleConn::Dedicated(guard) => guard,
        }
    }
}

impl DerefMut for HandleConn<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            HandleConn::Pooled(conn) => conn,
            HandleConn::Dedicated(guard) => guard,
        }
    }
}

impl DatabaseHandle {
    pub async fn conn(&self) -> KeyKeeperResult<HandleConn<'_>> {
        match self {
            DatabaseHandle::Primary(pool) => {
                let conn = run_with_timeout!(
                    CONNECT_TIMEOUT,
                    pool.get_conn(),
                    raise_error!(
                        format!(
                            "Timed out after {}s waiting for a database connection",
                            CONNECT_TIMEOUT.as_secs()
                        ),
                        ErrorCode::ConnectionTimeout
                    )
                )?
                .map_err(db_error)?;
                Ok(HandleConn::Pooled(conn))
            }
            DatabaseHandle::Dedicated(conn) => Ok(HandleConn::Dedicated(conn.lock().await)),
        }
    }

    pub fn is_dedicated(&self) -> bool {
        matches!(self, DatabaseHandle::Dedicated(_))
    }

    /// Disconnects a dedicated connection. Pooled handles are left alone.
    pub async fn close(self) {
        if let DatabaseHandle::Dedicated(conn) = self {
            if let Err(e) = conn.into_inner().disconnect().await {
                warn!("Failed to close dedicated mail database connection: {}", e);
            }
        }
    }

    pub async fn table_exists(&self, table: &str) -> KeyKeeperResult<bool> {
        let mut conn = self.conn().await?;
        let count: Option<u64> = conn
            .exec_first(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?",
                (table,),
            )
            .await
            .map_err(db_error)?;
        Ok(count.unwrap_or(0) > 0)
    }

    pub async fn column_exists(&self, table: &str, column: &str) -> KeyKeeperResult<bool> {
        let mut conn = self.conn().await?;
        let count: Option<u64> = conn
            .exec_first(
                "SELECT COUNT(*) FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?",
                (table, column),
            )
            .await
            .map_err(db_error)?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// Name of the database the handle is connected to.
    pub async fn current_database(&self) -> KeyKeeperResult<Option<String>> {
        let mut conn = self.conn().await?;
        let name: Option<Option<String>> = conn
            .query_first("SELECT DATABASE()")
            .await
            .map_err(db_error)?;
        Ok(name.flatten())
    }
}
