// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::print_json;
use crate::modules::context::primary_pool;
use crate::modules::database::DatabaseHandle;
use crate::modules::directory::session::{login, SessionStore};
use crate::modules::directory::SessionDirectory;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::settings::cli::Settings;
use crate::raise_error;
use mysql_async::Pool;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Runs `task` against a store on the primary pool and disconnects afterwards.
async fn with_store<T, F, Fut>(settings: &Settings, task: F) -> KeyKeeperResult<T>
where
    F: FnOnce(SessionStore) -> Fut,
    Fut: Future<Output = KeyKeeperResult<T>>,
{
    let (pool, _) = primary_pool(settings)?;
    let pool: Pool = pool.ok_or_else(|| {
        raise_error!(
            "DATABASE_URL is not set".into(),
            ErrorCode::MissingConfiguration
        )
    })?;
    let result = task(SessionStore::new(DatabaseHandle::Primary(pool.clone()))).await;
    if let Err(e) = pool.disconnect().await {
        warn!("Failed to close primary database pool: {}", e);
    }
    result
}

pub async fn cmd_sweep(settings: &Settings) -> KeyKeeperResult<()> {
    let report = with_store(settings, |store| async move { store.sweep_expired().await }).await?;
    println!(
        "Removed {} expired challenges and {} expired sessions",
        report.challenges, report.sessions
    );
    Ok(())
}

pub async fn cmd_challenge(settings: &Settings, user_id: &str, ttl: Duration) -> KeyKeeperResult<()> {
    let challenge = with_store(settings, |store| async move {
        store.create_challenge(user_id, ttl).await
    })
    .await?;
    print_json(&challenge)
}

pub async fn cmd_login(
    settings: &Settings,
    user_id: &str,
    challenge: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    ttl: Duration,
) -> KeyKeeperResult<()> {
    let session = with_store(settings, |store| async move {
        login(&store, user_id, challenge, ip_address, user_agent, ttl).await
    })
    .await?;
    print_json(&session)
}

pub async fn cmd_logout(settings: &Settings, token: &str) -> KeyKeeperResult<()> {
    let removed = with_store(settings, |store| async move {
        store.delete_session(token).await
    })
    .await?;
    if !removed {
        return Err(raise_error!(
            "No session with that token".into(),
            ErrorCode::ResourceNotFound
        ));
    }
    println!("Session removed");
    Ok(())
}
