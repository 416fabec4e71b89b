// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::entity::{
    ActivityEntry, Challenge, NewVirtualUser, Session, User, VirtualDomain, VirtualMailUser,
};
use super::session::{challenge_rejected, new_challenge, new_session, SweepReport};
use super::{MailDirectory, SessionDirectory, UserDirectory};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::{raise_error, utc_now};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct InMemoryUserDirectory {
    pub users: Mutex<Vec<User>>,
    pub activity: Mutex<Vec<ActivityEntry>>,
}

impl InMemoryUserDirectory {
    pub fn with_user(self, id: &str, email: &str) -> Self {
        self.users.lock().unwrap().push(User {
            id: id.into(),
            email: email.into(),
            status: "active".into(),
            ..Default::default()
        });
        self
    }

    pub fn user(&self, id: &str) -> Option<User> {
        self.users.lock().unwrap().iter().find(|u| u.id == id).cloned()
    }

    pub fn activity(&self) -> Vec<ActivityEntry> {
        self.activity.lock().unwrap().clone()
    }
}

impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, id: &str) -> KeyKeeperResult<Option<User>> {
        Ok(self.user(id))
    }

    async fn set_mail_password(&self, id: &str, envelope: &str) -> KeyKeeperResult<()> {
        let mut users = self.users.lock().unwrap();
        let user = users.iter_mut().find(|u| u.id == id).ok_or_else(|| {
            raise_error!(format!("User {} not found", id), ErrorCode::ResourceNotFound)
        })?;
        user.mail_password = Some(envelope.to_string());
        Ok(())
    }

    async fn append_activity(&self, entry: &ActivityEntry) -> KeyKeeperResult<()> {
        self.activity.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMailDirectory {
    pub rows: Mutex<Vec<VirtualMailUser>>,
    pub domains: Mutex<Vec<VirtualDomain>>,
}

impl InMemoryMailDirectory {
    pub fn with_row(self, id: u64, email: &str, user_id: Option<&str>) -> Self {
        let username = email.split('@').next().unwrap_or_default().to_string();
        self.rows.lock().unwrap().push(VirtualMailUser {
            id,
            domain_id: 1,
            username,
            email: email.into(),
            password: "{PLAIN}seed".into(),
            user_id: user_id.map(String::from),
        });
        self
    }

    pub fn rows(&self) -> Vec<VirtualMailUser> {
        self.rows.lock().unwrap().clone()
    }
}

impl MailDirectory for InMemoryMailDirectory {
    async fn find_by_user_id(&self, user_id: &str) -> KeyKeeperResult<Vec<VirtualMailUser>> {
        Ok(self
            .rows()
            .into_iter()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .collect())
    }

    async fn find_by_email(&self, email: &str) -> KeyKeeperResult<Option<VirtualMailUser>> {
        Ok(self
            .rows()
            .into_iter()
            .find(|r| r.email.eq_ignore_ascii_case(email.trim())))
    }

    async fn find_by_id(&self, id: u64) -> KeyKeeperResult<Option<VirtualMailUser>> {
        Ok(self.rows().into_iter().find(|r| r.id == id))
    }

    async fn list_linked(&self) -> KeyKeeperResult<Vec<VirtualMailUser>> {
        Ok(self.rows().into_iter().filter(|r| r.is_linked()).collect())
    }

    async fn set_user_id(&self, id: u64, user_id: &str) -> KeyKeeperResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
            row.user_id = Some(user_id.to_string());
        }
        Ok(())
    }

    async fn upsert_account(&self, row: &NewVirtualUser) -> KeyKeeperResult<VirtualMailUser> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows
            .iter_mut()
            .find(|r| r.email.eq_ignore_ascii_case(&row.email))
        {
            existing.password = row.password.clone();
            return Ok(existing.clone());
        }
        let id = rows.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let inserted = VirtualMailUser {
            id,
            domain_id: row.domain_id,
            username: row.username.clone(),
            email: row.email.clone(),
            password: row.password.clone(),
            user_id: None,
        };
        rows.push(inserted.clone());
        Ok(inserted)
    }

    async fn delete_by_email(&self, email: &str) -> KeyKeeperResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.email != email);
        Ok(rows.len() != before)
    }

    async fn ensure_domain(&self, name: &str) -> KeyKeeperResult<u64> {
        let name = name.trim().to_lowercase();
        let mut domains = self.domains.lock().unwrap();
        if let Some(domain) = domains.iter().find(|d| d.name.eq_ignore_ascii_case(&name)) {
            return Ok(domain.id);
        }
        let id = domains.len() as u64 + 1;
        domains.push(VirtualDomain { id, name });
        Ok(id)
    }
}

#[derive(Default)]
pub struct InMemorySessionDirectory {
    pub challenges: Mutex<Vec<Challenge>>,
    pub sessions: Mutex<Vec<Session>>,
}

impl InMemorySessionDirectory {
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().unwrap().clone()
    }

    /// Moves every expiry into the past.
    pub fn expire_all(&self) {
        let past = utc_now!() - 1;
        for challenge in self.challenges.lock().unwrap().iter_mut() {
            challenge.expires_at = past;
        }
        for session in self.sessions.lock().unwrap().iter_mut() {
            session.expires_at = past;
        }
    }
}

impl SessionDirectory for InMemorySessionDirectory {
    async fn create_challenge(&self, user_id: &str, ttl: Duration) -> KeyKeeperResult<Challenge> {
        let challenge = new_challenge(user_id, ttl);
        self.challenges.lock().unwrap().push(challenge.clone());
        Ok(challenge)
    }

    async fn consume_challenge(&self, user_id: &str, challenge: &str) -> KeyKeeperResult<()> {
        let now = utc_now!();
        let mut challenges = self.challenges.lock().unwrap();
        let entry = challenges
            .iter_mut()
            .find(|c| {
                c.user_id == user_id && c.challenge == challenge && !c.used && c.expires_at > now
            })
            .ok_or_else(challenge_rejected)?;
        entry.used = true;
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
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn delete_session(&self, token: &str) -> KeyKeeperResult<bool> {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|s| s.token != token);
        Ok(sessions.len() != before)
    }

    async fn sweep_expired(&self) -> KeyKeeperResult<SweepReport> {
        let now = utc_now!();
        let mut challenges = self.challenges.lock().unwrap();
        let before = challenges.len();
        challenges.retain(|c| !c.used && c.expires_at >= now);
        let mut sessions = self.sessions.lock().unwrap();
        let sessions_before = sessions.len();
        sessions.retain(|s| s.expires_at >= now);
        Ok(SweepReport {
            challenges: (before - challenges.len()) as u64,
            sessions: (sessions_before - sessions.len()) as u64,
        })
    }
}
