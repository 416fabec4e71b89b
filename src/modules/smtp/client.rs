// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::raise_error;
use mail_send::smtp::message::Parameters;
use mail_send::SmtpClient;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::warn;

/// The SMTP commands a delivery needs. A rejected `RCPT TO` is an outcome, not an
/// error: it comes back as `Ok(Some(reply))`.
pub(crate) trait SmtpTransaction {
    async fn mail_from(&mut self, from: &str) -> KeyKeeperResult<()>;
    async fn rcpt_to(&mut self, to: &str) -> KeyKeeperResult<Option<String>>;
    async fn data(&mut self, message: &[u8]) -> KeyKeeperResult<()>;
    async fn reset(&mut self) -> KeyKeeperResult<()>;
}

pub struct KeyKeeperSmtpClient {
    inner: SmtpClient<TlsStream<TcpStream>>,
}

impl KeyKeeperSmtpClient {
    pub fn new(inner: SmtpClient<TlsStream<TcpStream>>) -> Self {
        Self { inner }
    }

    pub async fn quit(self) {
        let KeyKeeperSmtpClient { mut inner } = self;
        if let Err(e) = inner.quit().await {
            warn!("SMTP QUIT failed: {:#?}", e);
        }
    }
}

impl SmtpTransaction for KeyKeeperSmtpClient {
    async fn mail_from(&mut self, from: &str) -> KeyKeeperResult<()> {
        self.inner
            .mail_from(from, &Parameters::new())
            .await
            .map_err(|e| {
                raise_error!(
                    format!("MAIL FROM <{}> rejected: {:#?}", from, e),
                    ErrorCode::SmtpCommandFailed
                )
            })
    }

    async fn rcpt_to(&mut self, to: &str) -> KeyKeeperResult<Option<String>> {
        match self.inner.rcpt_to(to, &Parameters::new()).await {
            Ok(()) => Ok(None),
            Err(mail_send::Error::UnexpectedReply(reply)) => Ok(Some(reply.to_string())),
            Err(e) => Err(raise_error!(
                format!("RCPT TO <{}> failed: {:#?}", to, e),
                ErrorCode::SmtpCommandFailed
            )),
        }
    }

    async fn data(&mut self, message: &[u8]) -> KeyKeeperResult<()> {
        self.inner.data(message).await.map_err(|e| {
            raise_error!(
                format!("DATA rejected: {:#?}", e),
                ErrorCode::SmtpCommandFailed
            )
        })
    }

    async fn reset(&mut self) -> KeyKeeperResult<()> {
        self.inner
            .rset()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::SmtpCommandFailed))
    }
}
