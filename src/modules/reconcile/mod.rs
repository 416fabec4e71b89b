// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::directory::entity::{ActivityEntry, ActivityType, VirtualMailUser};
use crate::modules::directory::{MailDirectory, UserDirectory};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::raise_error;
use itertools::Itertools;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};


/// How an application user relates to the virtual mail users.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconciliationResult {
    Linked {
        account: VirtualMailUser,
    },
    /// Same email, `user_id` still NULL. Safe to link.
    UnlinkedMatch {
        account: VirtualMailUser,
    },
    /// Same email, but linked to someone else. Never repaired automatically.
    ConflictingLink {
        account: VirtualMailUser,
        other_user_id: String,
    },
    /// Rows whose `user_id` differs only by case or hyphens. Advisory only.
    FormatMismatch {
        candidates: Vec<VirtualMailUser>,
    },
    NotFound,
}

impl ReconciliationResult {
    pub fn label(&self) -> &'static str {
        match self {
            ReconciliationResult::Linked { .. } => "linked",
            ReconciliationResult::UnlinkedMatch { .. } => "unlinked_match",
            ReconciliationResult::ConflictingLink { .. } => "conflicting_link",
            ReconciliationResult::FormatMismatch { .. } => "format_mismatch",
            ReconciliationResult::NotFound => "not_found",
        }
    }

    pub fn linked_account(&self) -> Option<&VirtualMailUser> {
        match self {
            ReconciliationResult::Linked { account } => Some(account),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked(VirtualMailUser),
    AlreadyLinked(VirtualMailUser),
}

impl LinkOutcome {
    pub fn account(&self) -> &VirtualMailUser {
        match self {
            LinkOutcome::Linked(account) | LinkOutcome::AlreadyLinked(account) => account,
        }
    }
}

/// Lowercase with hyphens removed, for spotting ids stored in another format.
pub fn relaxed_id(id: &str) -> String {
    id.trim()
        .chars()
        .filter(|c| *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

pub struct IdentityReconciler<'a, U, M> {
    users: &'a U,
    mail: &'a M,
}

impl<'a, U: UserDirectory, M: MailDirectory> IdentityReconciler<'a, U, M> {
    pub fn new(users: &'a U, mail: &'a M) -> Self {
        Self { users, mail }
    }

    pub async fn find_or_explain_mismatch(
        &self,
        user_id: &str,
    ) -> KeyKeeperResult<ReconciliationResult> {
        let mut exact = self.mail.find_by_user_id(user_id).await?;
        match exact.len() {
            0 => {}
            1 => {
                return Ok(ReconciliationResult::Linked {
                    account: exact.remove(0),
                })
            }
            _ => {
                return Err(raise_error!(
                    format!(
                        "User {} is linked to {} virtual mail users ({}); expected at most one",
                        user_id,
                        exact.len(),
                        exact.iter().map(|r| r.email.as_str()).join(", ")
                    ),
                    ErrorCode::LinkConflict
                ))
            }
        }

        let user = self.users.find_user(user_id).await?.ok_or_else(|| {
            raise_error!(
                format!("Unknown application user {}", user_id),
                ErrorCode::InvalidParameter
            )
        })?;

        if let Some(account) = self.mail.find_by_email(&user.email).await? {
            return Ok(match account.user_id.clone() {
                None => ReconciliationResult::UnlinkedMatch { account },
                Some(other_user_id) => {
                    warn!(
                        "Virtual user {} is linked to {} but belongs by email to {}",
                        account.email, other_user_id, user_id
                    );
                    ReconciliationResult::ConflictingLink {
                        account,
                        other_user_id,
                    }
                }
            });
        }

        let wanted = relaxed_id(user_id);
        let candidates: Vec<VirtualMailUser> = self
            .mail
            .list_linked()
            .await?
            .into_iter()
            .filter(|row| {
                row.user_id
                    .as_deref()
                    .is_some_and(|linked| relaxed_id(linked) == wanted)
            })
            .collect();
        if !candidates.is_empty() {
            return Ok(ReconciliationResult::FormatMismatch { candidates });
        }

        Ok(ReconciliationResult::NotFound)
    }

    /// Sets `user_id` on a virtual user row. Repeating the same link is a no-op; linking a
    /// row owned by someone else, or a second row for the same user, is a conflict.
    pub async fn link(&self, user_id: &str, virtual_user_id: u64) -> KeyKeeperResult<LinkOutcome> {
        let account = self.mail.find_by_id(virtual_user_id).await?.ok_or_else(|| {
            raise_error!(
                format!("Virtual mail user {} not found", virtual_user_id),
                ErrorCode::ResourceNotFound
            )
        })?;

        match account.user_id.as_deref() {
            Some(current) if current == user_id => {
                return Ok(LinkOutcome::AlreadyLinked(account));
            }
            Some(current) => {
                return Err(raise_error!(
                    format!(
                        "Virtual mail user {} ({}) is already linked to {}",
                        account.id, account.email, current
                    ),
                    ErrorCode::LinkConflict
                ));
            }
            None => {}
        }

        if self.users.find_user(user_id).await?.is_none() {
            return Err(raise_error!(
                format!("Unknown application user {}", user_id),
                ErrorCode::InvalidParameter
            ));
        }

        if let Some(other) = self
            .mail
            .find_by_user_id(user_id)
            .await?
            .into_iter()
            .find(|row| row.id != account.id)
        {
            return Err(raise_error!(
                format!(
                    "User {} is already linked to virtual mail user {} ({})",
                    user_id, other.id, other.email
                ),
                ErrorCode::LinkConflict
            ));
        }

        self.mail.set_user_id(account.id, user_id).await?;
        self.users
            .append_activity(&ActivityEntry::new(
                user_id,
                ActivityType::MailAccountLinked,
                json!({ "virtual_user_id": account.id, "email": account.email }),
            ))
            .await?;
        info!("Linked virtual mail user {} to {}", account.email, user_id);

        Ok(LinkOutcome::Linked(VirtualMailUser {
            user_id: Some(user_id.to_string()),
            ..account
        }))
    }
}
