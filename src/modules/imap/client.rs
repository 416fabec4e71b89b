// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::imap::session::SessionStream;
use crate::modules::utils::net::{
    establish_tcp_connection_with_timeout, establish_tls_connection, resolve_to_socket_addr,
};
use crate::modules::utils::tls::establish_tls_stream;
use crate::raise_error;
use async_imap::Client as ImapClient;
use async_imap::Session as ImapSession;
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use tokio::io::BufWriter;
use tracing::debug;

pub type Session = ImapSession<Box<dyn SessionStream>>;

#[derive(Debug)]
pub(crate) struct Client {
    inner: ImapClient<Box<dyn SessionStream>>,
}

impl Deref for Client {
    type Target = ImapClient<Box<dyn SessionStream>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Client {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

fn alpn(port: u16) -> &'static [&'static str] {
    if port == 993 {
        &[]
    } else {
        &["imap"]
    }
}

impl Client {
    fn new(stream: Box<dyn SessionStream>) -> Self {
        Self {
            inner: ImapClient::new(stream),
        }
    }

    pub(crate) async fn login(self, username: &str, password: &str) -> KeyKeeperResult<Session> {
        let Client { inner } = self;
        inner.login(username, password).await.map_err(|(e, _)| {
            raise_error!(
                format!("IMAP login for {} failed: {:#?}", username, e),
                ErrorCode::ImapAuthenticationFailed
            )
        })
    }

    /// Implicit TLS when `secure`, otherwise a plaintext greeting upgraded with STARTTLS.
    pub async fn connection(host: &str, port: u16, secure: bool) -> KeyKeeperResult<Self> {
        let resolved_addr = resolve_to_socket_addr(host, port)?;
        debug!("Attempting IMAP connection to {host} ({resolved_addr}).");
        if secure {
            Self::establish_secure_connection(resolved_addr, host).await
        } else {
            Self::establish_starttls_connection(resolved_addr, host).await
        }
    }

    async fn establish_secure_connection(
        address: SocketAddr,
        server_hostname: &str,
    ) -> KeyKeeperResult<Self> {
        let tls_stream =
            establish_tls_connection(address, server_hostname, alpn(address.port())).await?;
        let session_stream: Box<dyn SessionStream> = Box::new(BufWriter::new(tls_stream));
        let mut client = Client::new(session_stream);
        client.read_greeting().await?;
        Ok(client)
    }

    async fn establish_starttls_connection(
        address: SocketAddr,
        server_hostname: &str,
    ) -> KeyKeeperResult<Self> {
        let tcp_stream = establish_tcp_connection_with_timeout(address).await?;
        let mut client = ImapClient::new(BufWriter::new(tcp_stream));

        client
            .read_response()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
            .ok_or_else(|| {
                raise_error!(
                    "failed to read greeting".into(),
                    ErrorCode::ImapCommandFailed
                )
            })?;

        client
            .run_command_and_check_ok("STARTTLS", None)
            .await
            .map_err(|e| {
                raise_error!(
                    format!("STARTTLS command failed: {:#?}", e),
                    ErrorCode::ImapCommandFailed
                )
            })?;

        let tcp_stream = client.into_inner().into_inner();
        let tls_stream = establish_tls_stream(server_hostname, &[], tcp_stream).await?;
        let session_stream: Box<dyn SessionStream> = Box::new(BufWriter::new(tls_stream));
        Ok(Client::new(session_stream))
    }

    async fn read_greeting(&mut self) -> KeyKeeperResult<()> {
        self.read_response()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
            .ok_or_else(|| {
                raise_error!(
                    "failed to read greeting".into(),
                    ErrorCode::ImapCommandFailed
                )
            })?;
        Ok(())
    }
}
