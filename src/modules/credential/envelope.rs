// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::warn;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::modules::settings::cli::Environment;
use crate::raise_error;

/// AES-256-GCM with a 16-byte nonce, so the envelope keeps its `iv:cipher` shape.
type EnvelopeCipher = AesGcm<Aes256, U16>;

pub const IV_LEN: usize = 16;
pub const DEVELOPMENT_SECRET: &str = "keykeeper-default-secret";

/// Key material for the application-side copy of mail passwords.
#[derive(Clone)]
pub struct AppSecret {
    key: [u8; 32],
    weak: bool,
}

impl std::fmt::Debug for AppSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSecret")
            .field("key", &"<redacted>")
            .field("weak", &self.weak)
            .finish()
    }
}

impl AppSecret {
    pub fn new(secret: &str) -> Self {
        let hashed = digest(&SHA256, secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(hashed.as_ref());
        Self {
            key,
            weak: secret == DEVELOPMENT_SECRET,
        }
    }

    /// Resolves `APP_SECRET`. Production refuses a missing or default secret; development
    /// falls back to the well-known default and says so loudly. A configured secret is
    /// hashed exactly as given; blank counts as unset.
    pub fn resolve(configured: Option<&str>, environment: Environment) -> KeyKeeperResult<Self> {
        let configured = configured.filter(|s| !s.trim().is_empty());
        match (configured, environment) {
            (None, Environment::Production) => Err(raise_error!(
                "APP_SECRET is not set; refusing to encrypt mail passwords with the default secret in production"
                    .into(),
                ErrorCode::MissingConfiguration
            )),
            (Some(DEVELOPMENT_SECRET), Environment::Production) => Err(raise_error!(
                "APP_SECRET is the public development default; set a unique secret for production"
                    .into(),
                ErrorCode::WeakConfiguration
            )),
            (None, Environment::Development) => {
                warn!(
                    target: "security",
                    "WeakConfigurationError: APP_SECRET is not set, using the development default secret"
                );
                Ok(Self::new(DEVELOPMENT_SECRET))
            }
            (Some(DEVELOPMENT_SECRET), Environment::Development) => {
                warn!(
                    target: "security",
                    "WeakConfigurationError: APP_SECRET is the public development default"
                );
                Ok(Self::new(DEVELOPMENT_SECRET))
            }
            (Some(secret), _) => Ok(Self::new(secret)),
        }
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    fn cipher(&self) -> KeyKeeperResult<EnvelopeCipher> {
        EnvelopeCipher::new_from_slice(&self.key)
            .map_err(|_| raise_error!("Invalid cipher key length".into(), ErrorCode::InternalError))
    }
}

/// Encrypts `plaintext` into `hex(iv):hex(ciphertext||tag)`.
pub fn encrypt_password(plaintext: &str, secret: &AppSecret) -> KeyKeeperResult<String> {
    let rng = SystemRandom::new();
    let mut iv = [0u8; IV_LEN];
    rng.fill(&mut iv).map_err(|_| {
        raise_error!(
            "Failed to generate a random IV".into(),
            ErrorCode::InternalError
        )
    })?;
    let nonce = GenericArray::from_slice(&iv);
    let ciphertext = secret
        .cipher()?
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| raise_error!("Failed to encrypt password.".into(), ErrorCode::InternalError))?;
    Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
}

pub fn decrypt_password(envelope: &str, secret: &AppSecret) -> KeyKeeperResult<String> {
    let (iv_hex, cipher_hex) = split_envelope(envelope)?;
    let iv = hex::decode(iv_hex).map_err(|_| decode_error("IV is not valid hex"))?;
    if iv.len() != IV_LEN {
        return Err(decode_error("IV must be 16 bytes"));
    }
    let ciphertext =
        hex::decode(cipher_hex).map_err(|_| decode_error("ciphertext is not valid hex"))?;
    let nonce = GenericArray::from_slice(&iv);
    let plaintext = secret
        .cipher()?
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| {
            decode_error("verification failed, likely due to an APP_SECRET mismatch or corrupted data")
        })?;
    String::from_utf8(plaintext).map_err(|_| decode_error("plaintext is not UTF-8"))
}

fn split_envelope(envelope: &str) -> KeyKeeperResult<(&str, &str)> {
    let mut parts = envelope.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(iv), Some(cipher), None) if !iv.is_empty() && !cipher.is_empty() => Ok((iv, cipher)),
        _ => Err(decode_error("expected exactly one ':' separating IV and ciphertext")),
    }
}

fn decode_error(reason: &str) -> crate::modules::error::KeyKeeperError {
    raise_error!(
        format!("Cannot decrypt mail password envelope: {}", reason),
        ErrorCode::DecodeFailed
    )
}
