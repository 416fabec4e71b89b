// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use base64::{engine::general_purpose, Engine};
use rand::{rng, Rng};

use super::error::code::ErrorCode;

pub mod net;
pub mod tls;

#[macro_export]
macro_rules! keykeeper_version {
    () => {
        env!("CARGO_PKG_VERSION")
    };
}

#[macro_export]
macro_rules! utc_now {
    () => {{
        use chrono::Utc;
        Utc::now().timestamp_millis()
    }};
}

#[macro_export]
macro_rules! raise_error {
    ($msg:expr, $code:expr) => {
        $crate::modules::error::KeyKeeperError::Generic {
            message: $msg,
            location: snafu::Location::default(),
            code: $code,
        }
    };
}

#[macro_export]
macro_rules! run_with_timeout {
    ($duration:expr, $task:expr, $err_msg:expr) => {{
        match tokio::time::timeout($duration, $task).await {
            Ok(result) => Ok(result),
            Err(_) => Err($err_msg),
        }
    }};
}

#[macro_export]
macro_rules! generate_token {
    ($length:expr) => {{
        $crate::modules::utils::generate_token_impl($length)
    }};
}

/// Random alphanumeric token of exactly `length` characters.
///
/// Built from URL-safe base64 with every `-`, `_`, `+`, `/` and `=` replaced, so the
/// result is usable both as a crypt salt and as a generated mailbox password.
pub(crate) fn generate_token_impl(length: usize) -> String {
    let byte_length = (length + 3) / 4 * 3;
    let random_bytes: Vec<u8> = (0..byte_length).map(|_| rand::random::<u8>()).collect();
    let encoded = general_purpose::URL_SAFE.encode(&random_bytes);

    encoded
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c
            } else {
                make_single_random_char()
            }
        })
        .take(length)
        .collect()
}

fn make_single_random_char() -> char {
    let random_bytes: [u8; 3] = rng().random();
    let encoded = general_purpose::URL_SAFE.encode(random_bytes);
    encoded
        .chars()
        .find(|c| c.is_ascii_alphanumeric())
        .unwrap_or('a')
}

#[macro_export]
macro_rules! encode_mailbox_name {
    ($name:expr) => {{
        utf7_imap::encode_utf7_imap($name.to_string())
    }};
}

#[macro_export]
macro_rules! validate_email {
    ($email:expr) => {{
        $crate::modules::utils::validate_email($email)
    }};
}

pub fn validate_email(email: &str) -> crate::modules::error::KeyKeeperResult<()> {
    use std::str::FromStr;
    let email_address = email_address::EmailAddress::from_str(email).map_err(|_| {
        raise_error!(
            format!("Invalid email format : {}", email),
            ErrorCode::InvalidParameter
        )
    })?;
    if email != email_address.email() {
        return Err(raise_error!(
            format!("Invalid email format: {}", email),
            ErrorCode::InvalidParameter
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_alphanumeric_and_sized() {
        for length in [1, 8, 16, 33] {
            let token = generate_token!(length);
            assert_eq!(token.len(), length);
            assert!(token.chars().all(|c| c.is_ascii_alphanumeric()), "{}", token);
        }
        assert_ne!(generate_token!(16), generate_token!(16));
    }

    #[test]
    fn email_validation() {
        assert!(validate_email!("alice@keykeeper.world").is_ok());
        assert!(validate_email!("alice").is_err());
        assert!(validate_email!("Alice <alice@keykeeper.world>").is_err());
    }
}
