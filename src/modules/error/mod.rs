// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use code::ErrorCode;
use snafu::{Location, Snafu};

pub mod code;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum KeyKeeperError {
    #[snafu(display("{message}"))]
    Generic {
        message: String,
        #[snafu(implicit)]
        location: Location,
        code: ErrorCode,
    },
}

pub type KeyKeeperResult<T, E = KeyKeeperError> = std::result::Result<T, E>;

impl KeyKeeperError {
    pub fn code(&self) -> ErrorCode {
        match self {
            KeyKeeperError::Generic { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            KeyKeeperError::Generic { message, .. } => message,
        }
    }

    /// Prefixes the message with the operation that failed, keeping code and location.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            KeyKeeperError::Generic {
                message,
                location,
                code,
            } => KeyKeeperError::Generic {
                message: format!("{}: {}", context, message),
                location,
                code,
            },
        }
    }

    /// The line the CLI prints to stderr before exiting nonzero.
    pub fn report(&self) -> String {
        let code = self.code();
        format!(
            "Error({} {}): {}",
            code as u32,
            code.kind(),
            self.message()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raise_error;

    #[test]
    fn context_keeps_code() {
        let error = raise_error!("table missing".into(), ErrorCode::DatabaseError)
            .context("find_by_user_id");
        assert_eq!(error.code(), ErrorCode::DatabaseError);
        assert_eq!(error.message(), "find_by_user_id: table missing");
    }

    #[test]
    fn report_names_taxonomy() {
        let error = raise_error!("already linked".into(), ErrorCode::LinkConflict);
        assert_eq!(
            error.report(),
            "Error(30030 ConflictError): already linked"
        );
    }
}
