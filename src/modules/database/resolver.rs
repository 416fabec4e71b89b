// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::url::DatabaseUrl;
use super::{db_error, DatabaseHandle, CONNECT_TIMEOUT};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::settings::cli::Settings;
use crate::{raise_error, run_with_timeout};
use mysql_async::{Conn, OptsBuilder, Pool};
use serde::Serialize;
use std::fmt;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ResolutionSource {
    /// `USE_MAIN_DB_FOR_MAIL=true`
    MainDatabaseFlag,
    /// No separate mail host configured, so the primary pool is used.
    LegacyDefault,
    DedicatedMailDatabase,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionSource::MainDatabaseFlag => write!(f, "primary database (USE_MAIN_DB_FOR_MAIL)"),
            ResolutionSource::LegacyDefault => write!(f, "primary database (no MAIL_DB_HOST)"),
            ResolutionSource::DedicatedMailDatabase => write!(f, "dedicated mail database"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MailDatabaseConfig {
    pub use_main_db: bool,
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
}

impl MailDatabaseConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            use_main_db: settings.use_main_db_for_mail,
            host: settings.mail_db_host().map(String::from),
            port: settings.mail_db_port,
            user: settings.mail_db_user.clone().filter(|u| !u.is_empty()),
            password: settings.mail_db_password.clone(),
            database: settings.mail_db_name.clone(),
        }
    }
}

/// Connection parameters for the dedicated mail database.
#[derive(Clone, PartialEq, Eq)]
pub struct DedicatedTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

impl fmt::Debug for DedicatedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResolutionPlan {
    Primary(ResolutionSource),
    Dedicated(DedicatedTarget),
}

pub struct ConnectionResolver {
    primary: Option<Pool>,
    primary_url: Option<DatabaseUrl>,
    mail: MailDatabaseConfig,
}

impl ConnectionResolver {
    pub fn new(
        primary: Option<Pool>,
        primary_url: Option<DatabaseUrl>,
        mail: MailDatabaseConfig,
    ) -> Self {
        Self {
            primary,
            primary_url,
            mail,
        }
    }

    pub fn primary(&self) -> Option<&Pool> {
        self.primary.as_ref()
    }

    /// Decides where mail-account records live without touching the network.
    pub fn plan(&self) -> KeyKeeperResult<ResolutionPlan> {
        let has_primary = self.primary.is_some();
        if self.mail.use_main_db && has_primary {
            return Ok(ResolutionPlan::Primary(ResolutionSource::MainDatabaseFlag));
        }
        if self.mail.host.is_none() && has_primary {
            return Ok(ResolutionPlan::Primary(ResolutionSource::LegacyDefault));
        }

        let Some(host) = self.mail.host.clone() else {
            return Err(raise_error!(
                "No mail database available: DATABASE_URL is unset and MAIL_DB_HOST is not configured"
                    .into(),
                ErrorCode::MissingConfiguration
            ));
        };
        let user = self
            .mail
            .user
            .clone()
            .or_else(|| self.primary_url.as_ref().and_then(|u| u.user.clone()))
            .ok_or_else(|| {
                raise_error!(
                    format!(
                        "MAIL_DB_HOST is set to '{}' but neither MAIL_DB_USER nor a DATABASE_URL user is configured",
                        host
                    ),
                    ErrorCode::MissingConfiguration
                )
            })?;
        let password = self
            .mail
            .password
            .clone()
            .or_else(|| self.primary_url.as_ref().and_then(|u| u.password.clone()));

        Ok(ResolutionPlan::Dedicated(DedicatedTarget {
            host,
            port: self.mail.port,
            user,
            password,
            database: self.mail.database.clone(),
        }))
    }

    /// Returns a handle to the database that holds virtual mail users. A dedicated
    /// connection is opened for the mail database; the caller closes it.
    pub async fn resolve(&self) -> KeyKeeperResult<(DatabaseHandle, ResolutionSource)> {
        match self.plan()? {
            ResolutionPlan::Primary(source) => {
                debug!("Mail records resolved to {}", source);
                // plan() only yields Primary when the pool exists
                let pool = self.primary.clone().ok_or_else(|| {
                    raise_error!("Primary pool vanished".into(), ErrorCode::InternalError)
                })?;
                Ok((DatabaseHandle::Primary(pool), source))
            }
            ResolutionPlan::Dedicated(target) => {
                info!("Connecting to mail database {:?}", target);
                let opts = OptsBuilder::default()
                    .ip_or_hostname(target.host.clone())
                    .tcp_port(target.port)
                    .user(Some(target.user.clone()))
                    .pass(target.password.clone())
                    .db_name(Some(target.database.clone()));
                let conn = run_with_timeout!(
                    CONNECT_TIMEOUT,
                    Conn::new(opts),
                    raise_error!(
                        format!(
                            "Connecting to mail database {:?} timed out after {}s",
                            target,
                            CONNECT_TIMEOUT.as_secs()
                        ),
                        ErrorCode::ConnectionTimeout
                    )
                )?
                .map_err(|e| db_error(e).context(format!("mail database {:?}", target)))?;
                Ok((
                    DatabaseHandle::Dedicated(Mutex::new(conn)),
                    ResolutionSource::DedicatedMailDatabase,
                ))
            }
        }
    }
}
