//! Transport error types.

use std::io;

use thiserror::Error;

use crate::kcp::KcpError;

/// Errors returned by fallible transport calls.
#[derive(Debug, Error)]
pub enum Error {
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to resolve {host}")]
    DnsResolve { host: String },

    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("message is empty")]
    EmptyMessage,

    #[error("not connected")]
    NotConnected,

    #[error("server is already active")]
    AlreadyActive,

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("arq engine: {0}")]
    Kcp(#[from] KcpError),
}

/// Category of an error delivered through an `on_error` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Host name could not be resolved.
    DnsResolve,
    /// Nothing received for longer than the configured timeout, or the link died.
    Timeout,
    /// Queues exceeded the disconnect threshold.
    Congestion,
    /// Malformed or unexpected inbound data.
    InvalidReceive,
    /// Rejected outbound message.
    InvalidSend,
    /// The remote closed the connection or the socket refused delivery.
    ConnectionClosed,
    Unexpected,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error {
    /// Category used when this error is reported via `on_error`.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::DnsResolve { .. } => ErrorCode::DnsResolve,
            Error::MessageTooLarge { .. } | Error::EmptyMessage | Error::NotConnected => {
                ErrorCode::InvalidSend
            }
            Error::Kcp(_) => ErrorCode::InvalidSend,
            Error::Io(_) => ErrorCode::ConnectionClosed,
            Error::AlreadyActive | Error::InvalidSetting(_) => ErrorCode::Unexpected,
        }
    }
}
