// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Composition root: builds the primary pool, resolves the mail database and wires the
//! directories, the account manager and the secret from [`Settings`].

use crate::modules::credential::crypt::Crypt;
use crate::modules::credential::envelope::AppSecret;
use crate::modules::database::resolver::{ConnectionResolver, MailDatabaseConfig};
use crate::modules::database::url::DatabaseUrl;
use crate::modules::database::DatabaseHandle;
use crate::modules::directory::mysql::{MysqlMailDirectory, MysqlUserDirectory};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::exec::SystemRunner;
use crate::modules::provision::{Backend, MailAccountManager};
use crate::modules::settings::cli::Settings;
use crate::raise_error;
use mysql_async::Pool;
use tracing::{info, warn};

pub type AccountManager = MailAccountManager<SystemRunner, Crypt>;

/// The primary pool and its parsed URL. A missing `DATABASE_URL` is not an error
/// here; the resolver decides whether a dedicated mail database can stand in.
pub fn primary_pool(settings: &Settings) -> KeyKeeperResult<(Option<Pool>, Option<DatabaseUrl>)> {
    let Some(raw) = settings
        .database_url
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
    else {
        return Ok((None, None));
    };
    let url = DatabaseUrl::parse(raw).map_err(|e| e.context("DATABASE_URL"))?;
    info!("Primary database {}", url.redacted());
    Ok((Some(Pool::new(url.opts())), Some(url)))
}

pub fn resolver(settings: &Settings) -> KeyKeeperResult<ConnectionResolver> {
    let (pool, url) = primary_pool(settings)?;
    Ok(ConnectionResolver::new(
        pool,
        url,
        MailDatabaseConfig::from_settings(settings),
    ))
}

/// Commands run for real only with `USE_REAL_MAIL_SERVER=true`.
pub fn account_manager(settings: &Settings) -> AccountManager {
    if !settings.use_real_mail_server {
        warn!("USE_REAL_MAIL_SERVER is off; provisioning commands are logged, not executed");
    }
    MailAccountManager::new(
        Backend::from_settings(settings),
        SystemRunner::new(!settings.use_real_mail_server),
        Crypt::new(settings.mail_crypt_utility),
    )
}

pub fn app_secret(settings: &Settings) -> KeyKeeperResult<AppSecret> {
    AppSecret::resolve(settings.app_secret.as_deref(), settings.keykeeper_env)
}

/// Everything a data-changing command needs. Call [`AppContext::close`] on every exit
/// path so a dedicated mail connection is not leaked.
pub struct AppContext {
    pub users: MysqlUserDirectory,
    pub mail: MysqlMailDirectory,
    pub manager: AccountManager,
    pool: Pool,
}

impl AppContext {
    pub async fn connect(settings: &Settings) -> KeyKeeperResult<Self> {
        let resolver = resolver(settings)?;
        let pool = resolver.primary().cloned().ok_or_else(|| {
            raise_error!(
                "DATABASE_URL is not set; application users live in the primary database".into(),
                ErrorCode::MissingConfiguration
            )
        })?;
        let (handle, source) = resolver.resolve().await?;
        info!("Mail records in {}", source);
        Ok(Self {
            users: MysqlUserDirectory::new(DatabaseHandle::Primary(pool.clone())),
            mail: MysqlMailDirectory::new(
                handle,
                &settings.mail_users_table,
                &settings.mail_domains_table,
            ),
            manager: account_manager(settings),
            pool,
        })
    }

    pub async fn close(self) {
        self.mail.close().await;
        if let Err(e) = self.pool.disconnect().await {
            warn!("Failed to close primary database pool: {}", e);
        }
    }
}
