// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::exec::{CommandRunner, CommandSpec, SystemRunner};
use crate::modules::settings::cli::CryptUtilityKind;
use crate::raise_error;

/// Produces `$6$salt$hash` strings.
pub trait CryptUtility {
    async fn sha512_crypt(&self, plaintext: &str, salt: &str) -> KeyKeeperResult<String>;
}

/// `openssl passwd -6`, with the password fed on stdin so it never shows up in `ps`.
pub struct OpensslCrypt<R> {
    runner: R,
}

impl<R: CommandRunner> OpensslCrypt<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> CryptUtility for OpensslCrypt<R> {
    async fn sha512_crypt(&self, plaintext: &str, salt: &str) -> KeyKeeperResult<String> {
        let spec = CommandSpec::new("openssl")
            .args(["passwd", "-6", "-salt", salt, "-stdin"])
            .stdin(format!("{}\n", plaintext));
        let output = self.runner.run(&spec).await?.ensure_success(&spec)?;
        Ok(output.stdout.trim().to_string())
    }
}

pub struct NativeCrypt;

impl CryptUtility for NativeCrypt {
    async fn sha512_crypt(&self, plaintext: &str, salt: &str) -> KeyKeeperResult<String> {
        pwhash::sha512_crypt::hash_with(format!("$6${}", salt).as_str(), plaintext).map_err(|e| {
            raise_error!(
                format!("sha512-crypt failed: {}", e),
                ErrorCode::InternalError
            )
        })
    }
}

pub enum Crypt {
    Openssl(OpensslCrypt<SystemRunner>),
    Native(NativeCrypt),
}

impl Crypt {
    /// Hashing is local and side-effect free, so it always executes for real,
    /// even when provisioning commands are in dry-run mode.
    pub fn new(kind: CryptUtilityKind) -> Self {
        match kind {
            CryptUtilityKind::Openssl => Crypt::Openssl(OpensslCrypt::new(SystemRunner::new(false))),
            CryptUtilityKind::Native => Crypt::Native(NativeCrypt),
        }
    }
}

impl CryptUtility for Crypt {
    async fn sha512_crypt(&self, plaintext: &str, salt: &str) -> KeyKeeperResult<String> {
        match self {
            Crypt::Openssl(crypt) => crypt.sha512_crypt(plaintext, salt).await,
            Crypt::Native(crypt) => crypt.sha512_crypt(plaintext, salt).await,
        }
    }
}
