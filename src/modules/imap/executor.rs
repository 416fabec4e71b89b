// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::imap::client::{Client, Session};
use crate::modules::imap::flags::{EmailFlag, FlagUpdate};
use crate::modules::message::Email;
use crate::modules::settings::cli::Settings;
use crate::{encode_mailbox_name, raise_error};
use async_imap::types::{Fetch, Name, NameAttribute};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

const HEADER_FETCH_QUERY: &str = "(UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])";
const BODY_FETCH_QUERY: &str = "(UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[])";
const DEFAULT_TRASH: &str = "Trash";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    pub limit: u32,
    pub offset: u32,
    pub fetch_body: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
            fetch_body: false,
        }
    }
}

/// Outcome of the best-effort mutations; failures are reported, not raised.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    fn from_result(result: KeyKeeperResult<()>) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                error: None,
            },
            Err(e) => Self {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Sequence numbers `(start, end)` covering the newest `limit` messages once the newest
/// `offset` have been skipped, or `None` when nothing is left to fetch.
pub fn sequence_range(total: u32, limit: u32, offset: u32) -> Option<(u32, u32)> {
    if total == 0 || limit == 0 || offset >= total {
        return None;
    }
    let end = total - offset;
    let start = end.saturating_sub(limit - 1).max(1);
    Some((start, end))
}

/// One mailbox account on the mail host. Each operation logs in on a fresh
/// connection and logs out before returning, on success and on failure alike.
#[derive(Clone)]
pub struct MailboxClient {
    host: String,
    port: u16,
    secure: bool,
    email: String,
    password: String,
}

impl fmt::Debug for MailboxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxClient")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl MailboxClient {
    pub fn new(host: &str, port: u16, secure: bool, email: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            secure,
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    pub fn from_settings(settings: &Settings, email: &str, password: &str) -> Self {
        Self::new(
            &settings.mail_host,
            settings.mail_imap_port,
            settings.mail_imap_secure,
            email,
            password,
        )
    }

    async fn open(&self) -> KeyKeeperResult<Session> {
        let client = Client::connection(&self.host, self.port, self.secure).await?;
        client.login(&self.email, &self.password).await
    }

    async fn close(&self, mut session: Session) {
        if let Err(e) = session.logout().await {
            warn!("IMAP logout for {} failed: {:#?}", self.email, e);
        }
    }

    pub async fn fetch_emails(
        &self,
        folder: &str,
        options: &FetchOptions,
    ) -> KeyKeeperResult<Vec<Email>> {
        let mut session = self.open().await?;
        let result = self.fetch_range(&mut session, folder, options).await;
        self.close(session).await;
        result.map_err(|e| e.context(format!("fetch {} for {}", folder, self.email)))
    }

    async fn fetch_range(
        &self,
        session: &mut Session,
        folder: &str,
        options: &FetchOptions,
    ) -> KeyKeeperResult<Vec<Email>> {
        let mailbox = session
            .examine(encode_mailbox_name!(folder))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let Some((start, end)) = sequence_range(mailbox.exists, options.limit, options.offset)
        else {
            debug!(
                "{}: nothing to fetch in {} ({} messages, limit {}, offset {})",
                self.email, folder, mailbox.exists, options.limit, options.offset
            );
            return Ok(Vec::new());
        };
        let query = if options.fetch_body {
            BODY_FETCH_QUERY
        } else {
            HEADER_FETCH_QUERY
        };
        let fetches = session
            .fetch(format!("{}:{}", start, end), query)
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
            .try_collect::<Vec<Fetch>>()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;

        let mut emails = fetches
            .iter()
            .map(|fetch| to_email(fetch, folder, options.fetch_body))
            .collect::<KeyKeeperResult<Vec<Email>>>()?;
        // Servers answer in ascending sequence order.
        emails.sort_by(|a, b| b.uid.cmp(&a.uid));
        Ok(emails)
    }

    /// Reads one message without touching `\Seen` unless `mark_as_read` asks for it.
    pub async fn fetch_email(
        &self,
        uid: u32,
        folder: &str,
        mark_as_read: bool,
    ) -> KeyKeeperResult<Option<Email>> {
        let mut session = self.open().await?;
        let result = fetch_one(&mut session, uid, folder, mark_as_read).await;
        self.close(session).await;
        result.map_err(|e| e.context(format!("fetch uid {} in {} for {}", uid, folder, self.email)))
    }

    pub async fn update_email(&self, uid: u32, folder: &str, update: &FlagUpdate) -> OperationResult {
        if update.is_empty() {
            return OperationResult::from_result(Ok(()));
        }
        let result = match self.open().await {
            Ok(mut session) => {
                let result = update_flags(&mut session, uid, folder, update).await;
                self.close(session).await;
                result
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("update of uid {} in {} for {} failed: {}", uid, folder, self.email, e);
        }
        OperationResult::from_result(result)
    }

    /// Moves the message to the Trash folder, or expunges it when `permanent` is set
    /// or it already sits in Trash.
    pub async fn delete_email(&self, uid: u32, folder: &str, permanent: bool) -> OperationResult {
        let result = match self.open().await {
            Ok(mut session) => {
                let result = remove(&mut session, uid, folder, permanent).await;
                self.close(session).await;
                result
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("delete of uid {} in {} for {} failed: {}", uid, folder, self.email, e);
        }
        OperationResult::from_result(result)
    }
}

async fn fetch_one(
    session: &mut Session,
    uid: u32,
    folder: &str,
    mark_as_read: bool,
) -> KeyKeeperResult<Option<Email>> {
    let folder_name = encode_mailbox_name!(folder);
    session
        .examine(&folder_name)
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
    let fetch = session
        .uid_fetch(uid.to_string(), BODY_FETCH_QUERY)
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
        .try_collect::<Vec<Fetch>>()
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
        .into_iter()
        .find(|fetch| fetch.uid == Some(uid));
    let Some(fetch) = fetch else {
        return Ok(None);
    };
    let mut email = to_email(&fetch, folder, true)?;

    if mark_as_read && !email.seen {
        select(session, &folder_name).await?;
        store(session, uid, "+FLAGS.SILENT (\\Seen)").await?;
        email.flags.push(EmailFlag::Seen);
        email.seen = true;
    }
    Ok(Some(email))
}

async fn update_flags(
    session: &mut Session,
    uid: u32,
    folder: &str,
    update: &FlagUpdate,
) -> KeyKeeperResult<()> {
    select(session, &encode_mailbox_name!(folder)).await?;
    let (add, remove) = update.store_queries();
    for query in [add, remove].into_iter().flatten() {
        store(session, uid, &query).await?;
    }
    Ok(())
}

async fn remove(
    session: &mut Session,
    uid: u32,
    folder: &str,
    permanent: bool,
) -> KeyKeeperResult<()> {
    let folder_name = encode_mailbox_name!(folder);
    let trash = find_trash(session).await?;
    select(session, &folder_name).await?;
    if permanent || folder_name == trash {
        store(session, uid, "+FLAGS.SILENT (\\Deleted)").await?;
        session
            .uid_expunge(uid.to_string())
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
            .try_collect::<Vec<u32>>()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
    } else {
        session
            .uid_mv(uid.to_string(), &trash)
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
    }
    Ok(())
}

async fn select(session: &mut Session, folder: &str) -> KeyKeeperResult<()> {
    session
        .select(folder)
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
    Ok(())
}

async fn store(session: &mut Session, uid: u32, query: &str) -> KeyKeeperResult<()> {
    session
        .uid_store(uid.to_string(), query)
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
        .try_collect::<Vec<Fetch>>()
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
    Ok(())
}

async fn find_trash(session: &mut Session) -> KeyKeeperResult<String> {
    let names = session
        .list(Some(""), Some("*"))
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
        .try_collect::<Vec<Name>>()
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
    Ok(trash_folder(&names))
}

fn trash_folder(names: &[Name]) -> String {
    names
        .iter()
        .find(|name| {
            name.attributes()
                .iter()
                .any(|attribute| matches!(attribute, NameAttribute::Trash))
        })
        .or_else(|| {
            names
                .iter()
                .find(|name| name.name().eq_ignore_ascii_case(DEFAULT_TRASH))
        })
        .map(|name| name.name().to_string())
        .unwrap_or_else(|| DEFAULT_TRASH.to_string())
}

fn to_email(fetch: &Fetch, folder: &str, with_body: bool) -> KeyKeeperResult<Email> {
    let uid = fetch.uid.ok_or_else(|| {
        raise_error!(
            format!("Server returned message {} without a UID", fetch.message),
            ErrorCode::ImapUnexpectedResult
        )
    })?;
    let flags = fetch.flags().map(|f| EmailFlag::from(&f)).collect();
    let mut email = Email::new(uid, folder, flags);
    email.size = fetch.size;
    email.date = fetch.internal_date().map(|d| d.timestamp_millis());
    let raw = if with_body {
        fetch.body()
    } else {
        fetch.header()
    };
    if let Some(raw) = raw {
        email.apply_mime(raw, with_body)?;
    }
    Ok(email)
}
