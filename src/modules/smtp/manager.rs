// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::settings::cli::Settings;
use crate::modules::smtp::client::KeyKeeperSmtpClient;
use crate::modules::utils::tls::install_crypto_provider;
use crate::raise_error;
use mail_send::{Credentials, SmtpClientBuilder};
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Submission endpoint and the mailbox credentials used to authenticate.
#[derive(Clone)]
pub struct SmtpTransportConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS; otherwise the session is upgraded with STARTTLS.
    pub secure: bool,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SmtpTransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl SmtpTransportConfig {
    pub fn from_settings(settings: &Settings, email: &str, password: &str) -> Self {
        Self {
            host: settings.mail_host.clone(),
            port: settings.mail_smtp_port,
            secure: settings.mail_smtp_secure,
            username: email.to_string(),
            password: password.to_string(),
        }
    }
}

pub struct SmtpClientManager {
    config: SmtpTransportConfig,
}

impl SmtpClientManager {
    pub fn new(config: SmtpTransportConfig) -> Self {
        Self { config }
    }

    pub async fn build(&self) -> KeyKeeperResult<KeyKeeperSmtpClient> {
        install_crypto_provider();
        let local_host = gethostname::gethostname()
            .to_str()
            .unwrap_or("[127.0.0.1]")
            .to_string();
        debug!(
            "Connecting to SMTP {}:{} as {} (implicit TLS: {})",
            self.config.host, self.config.port, self.config.username, self.config.secure
        );
        let client = SmtpClientBuilder::new(self.config.host.clone(), self.config.port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .helo_host(local_host)
            .timeout(SMTP_TIMEOUT)
            .implicit_tls(self.config.secure)
            .connect()
            .await
            .map_err(|e| {
                raise_error!(
                    format!(
                        "SMTP connection to {}:{} failed: {:#?}",
                        self.config.host, self.config.port, e
                    ),
                    ErrorCode::SmtpConnectionFailed
                )
            })?;
        Ok(KeyKeeperSmtpClient::new(client))
    }
}
