// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::crypt::CryptUtility;
use crate::generate_token;
use std::fmt;
use tracing::warn;

pub const SHA512_CRYPT_PREFIX: &str = "{SHA512-CRYPT}";
pub const PLAIN_PREFIX: &str = "{PLAIN}";
const SALT_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum HashScheme {
    #[serde(rename = "SHA512-CRYPT")]
    Sha512Crypt,
    #[serde(rename = "PLAIN")]
    Plain,
}

impl fmt::Display for HashScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashScheme::Sha512Crypt => write!(f, "SHA512-CRYPT"),
            HashScheme::Plain => write!(f, "PLAIN"),
        }
    }
}

/// A password in a form Dovecot accepts. `Plain` is the degraded outcome of a failed
/// crypt utility and must never be treated as equivalent to a real hash.
#[derive(Clone, PartialEq, Eq)]
pub enum DovecotHash {
    /// `$6$salt$hash`
    Sha512Crypt(String),
    Plain(String),
}

impl DovecotHash {
    pub fn scheme(&self) -> HashScheme {
        match self {
            DovecotHash::Sha512Crypt(_) => HashScheme::Sha512Crypt,
            DovecotHash::Plain(_) => HashScheme::Plain,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, DovecotHash::Plain(_))
    }

    /// The `{SCHEME}value` string written to the password map or virtual-user row.
    pub fn to_stored(&self) -> String {
        match self {
            DovecotHash::Sha512Crypt(hash) => format!("{}{}", SHA512_CRYPT_PREFIX, hash),
            DovecotHash::Plain(plaintext) => format!("{}{}", PLAIN_PREFIX, plaintext),
        }
    }
}

impl fmt::Debug for DovecotHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DovecotHash::Sha512Crypt(hash) => f.debug_tuple("Sha512Crypt").field(hash).finish(),
            DovecotHash::Plain(_) => f.debug_tuple("Plain").field(&"<redacted>").finish(),
        }
    }
}

pub struct DovecotHasher<C> {
    crypt: C,
}

impl<C: CryptUtility> DovecotHasher<C> {
    pub fn new(crypt: C) -> Self {
        Self { crypt }
    }

    /// Hashes with a fresh 16-character alphanumeric salt. If the crypt utility fails or
    /// prints something that is not a `$6$` hash, returns [`DovecotHash::Plain`].
    pub async fn hash_for_dovecot(&self, plaintext: &str) -> DovecotHash {
        let salt = generate_token!(SALT_LEN);
        match self.crypt.sha512_crypt(plaintext, &salt).await {
            Ok(hash) if is_sha512_crypt_triple(&hash) => DovecotHash::Sha512Crypt(hash),
            Ok(unexpected) => {
                warn!(
                    target: "security",
                    "WeakCredentialWarning: crypt utility returned an unrecognised hash ({} bytes), storing the mail password as PLAIN",
                    unexpected.len()
                );
                DovecotHash::Plain(plaintext.to_string())
            }
            Err(e) => {
                warn!(
                    target: "security",
                    "WeakCredentialWarning: crypt utility failed ({}), storing the mail password as PLAIN",
                    e
                );
                DovecotHash::Plain(plaintext.to_string())
            }
        }
    }
}

/// Splits `{SCHEME}rest` into a known scheme and its remainder.
pub fn split_scheme(hash: &str) -> Option<(HashScheme, &str)> {
    if let Some(rest) = hash.strip_prefix(SHA512_CRYPT_PREFIX) {
        Some((HashScheme::Sha512Crypt, rest))
    } else {
        hash.strip_prefix(PLAIN_PREFIX)
            .map(|rest| (HashScheme::Plain, rest))
    }
}

fn is_sha512_crypt_triple(value: &str) -> bool {
    let Some(rest) = value.strip_prefix('$') else {
        return false;
    };
    let segments: Vec<&str> = rest.split('$').collect();
    segments.len() == 3 && segments[0] == "6" && segments.iter().all(|s| !s.is_empty())
}

pub fn is_valid_dovecot_hash(hash: &str) -> bool {
    match split_scheme(hash) {
        Some((HashScheme::Sha512Crypt, rest)) => is_sha512_crypt_triple(rest),
        Some((HashScheme::Plain, rest)) => !rest.is_empty(),
        None => false,
    }
}

/// Checks `plaintext` against a stored `{SCHEME}value`.
pub fn verify_dovecot_hash(plaintext: &str, hash: &str) -> bool {
    match split_scheme(hash) {
        Some((HashScheme::Sha512Crypt, rest)) => {
            is_sha512_crypt_triple(rest) && pwhash::sha512_crypt::verify(plaintext, rest)
        }
        Some((HashScheme::Plain, rest)) => !rest.is_empty() && rest == plaintext,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::credential::crypt::{NativeCrypt, OpensslCrypt};
    use crate::modules::exec::fake::RecordingRunner;
    use crate::modules::exec::CommandOutput;

    #[test]
    fn validation_accepts_known_schemes() {
        assert!(is_valid_dovecot_hash("{SHA512-CRYPT}$6$abc$hashvalue"));
        assert!(is_valid_dovecot_hash("{PLAIN}anything"));
    }

    #[test]
    fn validation_rejects_malformed_and_unknown() {
        for hash in [
            "{SHA512-CRYPT}malformed",
            "{SHA512-CRYPT}$6$abc",
            "{SHA512-CRYPT}$5$abc$hash",
            "{SHA512-CRYPT}$6$$hash",
            "{SHA512-CRYPT}$6$rounds=5000$abc$hash",
            "{PLAIN}",
            "{MD5-CRYPT}$1$abc$hash",
            "$6$abc$hashvalue",
            "",
        ] {
            assert!(!is_valid_dovecot_hash(hash), "{}", hash);
        }
    }

    #[tokio::test]
    async fn native_hash_verifies() {
        let hasher = DovecotHasher::new(NativeCrypt);
        let hash = hasher.hash_for_dovecot("mailbox-pass").await;
        assert!(!hash.is_degraded());
        let stored = hash.to_stored();
        assert!(stored.starts_with("{SHA512-CRYPT}$6$"));
        assert!(is_valid_dovecot_hash(&stored));
        assert!(verify_dovecot_hash("mailbox-pass", &stored));
        assert!(!verify_dovecot_hash("other-pass", &stored));
    }

    #[tokio::test]
    async fn salts_are_fresh() {
        let hasher = DovecotHasher::new(NativeCrypt);
        let a = hasher.hash_for_dovecot("same").await.to_stored();
        let b = hasher.hash_for_dovecot("same").await.to_stored();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn failed_utility_degrades_to_plain() {
        let hasher = DovecotHasher::new(OpensslCrypt::new(
            RecordingRunner::new().unspawnable("openssl"),
        ));
        let hash = hasher.hash_for_dovecot("pw123").await;
        assert!(hash.is_degraded());
        assert_eq!(hash.scheme(), HashScheme::Plain);
        assert_eq!(hash.to_stored(), "{PLAIN}pw123");
        assert!(!format!("{:?}", hash).contains("pw123"));
    }

    #[tokio::test]
    async fn unexpected_output_degrades_to_plain() {
        let hasher = DovecotHasher::new(OpensslCrypt::new(
            RecordingRunner::new().respond("openssl", CommandOutput::ok("$1$abc$md5\n")),
        ));
        assert!(hasher.hash_for_dovecot("pw").await.is_degraded());
    }

    #[test]
    fn plain_verification_is_exact() {
        assert!(verify_dovecot_hash("abc", "{PLAIN}abc"));
        assert!(!verify_dovecot_hash("abc ", "{PLAIN}abc"));
        assert!(!verify_dovecot_hash("", "{PLAIN}"));
    }
}
