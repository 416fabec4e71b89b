// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use http::StatusCode;
use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[repr(u32)]
pub enum ErrorCode {
    // Client-side errors (10000–10999)
    InvalidParameter = 10000,
    MissingConfiguration = 10020,
    WeakConfiguration = 10030,

    // Resource errors (30000–30999)
    ResourceNotFound = 30000,
    AlreadyExists = 30010,
    LinkConflict = 30030,

    // Network connection errors (40000–40999)
    NetworkError = 40000,
    ConnectionTimeout = 40010,

    // Mail service errors (50000–50999)
    ImapCommandFailed = 50000,
    ImapAuthenticationFailed = 50010,
    ImapUnexpectedResult = 50020,
    SmtpCommandFailed = 50030,
    SmtpConnectionFailed = 50040,
    ProvisioningFailed = 50100,
    CommandFailed = 50110,

    // Storage errors (60000–60999)
    DatabaseError = 60000,
    DecodeFailed = 60010,

    // Internal system errors (70000–70999)
    InternalError = 70000,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidParameter => StatusCode::BAD_REQUEST,
            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyExists | ErrorCode::LinkConflict => StatusCode::CONFLICT,
            ErrorCode::ConnectionTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::NetworkError
            | ErrorCode::ImapCommandFailed
            | ErrorCode::ImapAuthenticationFailed
            | ErrorCode::ImapUnexpectedResult
            | ErrorCode::SmtpCommandFailed
            | ErrorCode::SmtpConnectionFailed
            | ErrorCode::ProvisioningFailed
            | ErrorCode::CommandFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::MissingConfiguration
            | ErrorCode::WeakConfiguration
            | ErrorCode::DatabaseError
            | ErrorCode::DecodeFailed
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Operator-facing error family.
    pub fn kind(&self) -> &'static str {
        match self {
            ErrorCode::MissingConfiguration => "ConfigurationError",
            ErrorCode::WeakConfiguration => "WeakConfigurationError",
            ErrorCode::InvalidParameter => "ValidationError",
            ErrorCode::ResourceNotFound => "NotFound",
            ErrorCode::AlreadyExists | ErrorCode::LinkConflict => "ConflictError",
            ErrorCode::ProvisioningFailed | ErrorCode::CommandFailed => "ProvisioningError",
            ErrorCode::NetworkError
            | ErrorCode::ConnectionTimeout
            | ErrorCode::ImapCommandFailed
            | ErrorCode::ImapAuthenticationFailed
            | ErrorCode::ImapUnexpectedResult
            | ErrorCode::SmtpCommandFailed
            | ErrorCode::SmtpConnectionFailed => "TransportError",
            ErrorCode::DecodeFailed => "DecodeError",
            ErrorCode::DatabaseError => "DatabaseError",
            ErrorCode::InternalError => "InternalError",
        }
    }

    /// Transport failures may be retried by the caller with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), "TransportError" | "ProvisioningError")
    }
}
