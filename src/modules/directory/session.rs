// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::entity::{Challenge, Session};
use super::SessionDirectory;
use crate::modules::database::{db_error, DatabaseHandle};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::{KeyKeeperError, KeyKeeperResult};
use crate::{generate_token, raise_error, utc_now};
use mysql_async::prelude::Queryable;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

pub const CHALLENGES_TABLE: &str = "auth_challenges";
pub const SESSIONS_TABLE: &str = "sessions";

const CHALLENGE_LEN: usize = 32;
const SESSION_TOKEN_LEN: usize = 48;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub challenges: u64,
    pub sessions: u64,
}

pub fn new_challenge(user_id: &str, ttl: Duration) -> Challenge {
    Challenge {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        challenge: generate_token!(CHALLENGE_LEN),
        expires_at: utc_now!() + ttl.as_millis() as i64,
        used: false,
    }
}

pub fn new_session(
    user_id: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    ttl: Duration,
) -> Session {
    let now = utc_now!();
    Session {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        token: generate_token!(SESSION_TOKEN_LEN),
        ip_address: ip_address.map(String::from),
        user_agent: user_agent.map(String::from),
        expires_at: now + ttl.as_millis() as i64,
        last_active: now,
    }
}

pub fn challenge_rejected() -> KeyKeeperError {
    raise_error!(
        "Challenge is unknown, expired or already used".into(),
        ErrorCode::InvalidParameter
    )
}

fn log_sweep(report: &SweepReport) {
    info!(
        "Swept {} challenges and {} sessions",
        report.challenges, report.sessions
    );
}

/// Consumes `challenge` and opens a session for `user_id`.
pub async fn login<S: SessionDirectory>(
    store: &S,
    user_id: &str,
    challenge: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    ttl: Duration,
) -> KeyKeeperResult<Session> {
    store.consume_challenge(user_id, challenge).await?;
    store
        .create_session(user_id, ip_address, user_agent, ttl)
        .await
}

/// Login challenges and sessions in the primary database.
pub struct SessionStore {
    handle: DatabaseHandle,
}

impl SessionStore {
    pub fn new(handle: DatabaseHandle) -> Self {
        Self { handle }
    }
}

impl SessionDirectory for SessionStore {
    async fn create_challenge(&self, user_id: &str, ttl: Duration) -> KeyKeeperResult<Challenge> {
        let challenge = new_challenge(user_id, ttl);
        let mut conn = self.handle.conn().await?;
        conn.exec_drop(
            format!(
                "INSERT INTO `{}` (id, user_id, challenge, expires_at, used) \
                 VALUES (?, ?, ?, DATE_ADD(NOW(), INTERVAL ? SECOND), 0)",
                CHALLENGES_TABLE
            ),
            (
                challenge.id.as_str(),
                user_id,
                challenge.challenge.as_str(),
                ttl.as_secs(),
            ),
        )
        .await
        .map_err(|e| db_error(e).context("create challenge"))?;
        Ok(challenge)
    }

    async fn consume_challenge(&self, user_id: &str, challenge: &str) -> KeyKeeperResult<()> {
        let mut conn = self.handle.conn().await?;
        conn.exec_drop(
            format!(
                "UPDATE `{}` SET used = 1 \
                 WHERE user_id = ? AND challenge = ? AND used = 0 AND expires_at > NOW()",
                CHALLENGES_TABLE
            ),
            (user_id, challenge),
        )
        .await
        .map_err(|e| db_error(e).context("consume challenge"))?;
        if conn.affected_rows() != 1 {
            return Err(challenge_rejected());
        }
        Ok(())
    }

    async fn create_session(
        &self,
        user_id: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        ttl: Duration,
    ) -> KeyKeeperResult<Session> {
        let session = new_session(user_id, ip_address, user_agent, ttl);
        let mut conn = self.handle.conn().await?;
        conn.exec_drop(
            format!(
                "INSERT INTO `{}` (id, user_id, token, ip_address, user_agent, expires_at, last_active) \
                 VALUES (?, ?, ?, ?, ?, DATE_ADD(NOW(), INTERVAL ? SECOND), NOW())",
                SESSIONS_TABLE
            ),
            (
                session.id.as_str(),
                user_id,
                session.token.as_str(),
                ip_address,
                user_agent,
                ttl.as_secs(),
            ),
        )
        .await
        .map_err(|e| db_error(e).context("create session"))?;
        Ok(session)
    }

    async fn delete_session(&self, token: &str) -> KeyKeeperResult<bool> {
        let mut conn = self.handle.conn().await?;
        conn.exec_drop(
            format!("DELETE FROM `{}` WHERE token = ?", SESSIONS_TABLE),
            (token,),
        )
        .await
        .map_err(|e| db_error(e).context("delete session"))?;
        Ok(conn.affected_rows() > 0)
    }

    async fn sweep_expired(&self) -> KeyKeeperResult<SweepReport> {
        let mut conn = self.handle.conn().await?;
        conn.query_drop(format!(
            "DELETE FROM `{}` WHERE expires_at < NOW() OR used = 1",
            CHALLENGES_TABLE
        ))
        .await
        .map_err(|e| db_error(e).context("sweep challenges"))?;
        let challenges = conn.affected_rows();

        conn.query_drop(format!(
            "DELETE FROM `{}` WHERE expires_at < NOW()",
            SESSIONS_TABLE
        ))
        .await
        .map_err(|e| db_error(e).context("sweep sessions"))?;
        let sessions = conn.affected_rows();

        let report = SweepReport {
            challenges,
            sessions,
        };
        log_sweep(&report);
        Ok(report)
    }
}
