use std::io;

use thiserror::Error;

/// Errors a request handler may return.  `ClientError` values pass through
/// unchanged; anything else is reported as a handler failure.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Everything that can go wrong on a single connection.
///
/// All of these are local to one connection: the worker reports them to the
/// observer, closes the socket and frees its slot.  They never reach the
/// accept loop.
#[derive(Debug, Error)]
pub enum ClientError
{
    /// Malformed record, out-of-order record or unsupported record type.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer closed the connection between records.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The peer closed the connection in the middle of a record.
    #[error("connection closed mid-record")]
    Truncated,

    /// A read or write did not complete within the connection timeout.
    #[error("connection timed out")]
    IoTimeout,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Accumulated PARAMS content exceeded the configured limit.
    #[error("request headers reached {size} bytes, limit is {limit}")]
    HeaderTooLarge { size: usize, limit: usize },

    /// The peer sent ABORT_REQUEST.
    #[error("request aborted by peer")]
    Aborted,

    /// The peer sent GET_VALUES, which this server does not answer.
    #[error("management records are not supported")]
    UnsupportedManagementRequest,

    /// A record arrived for a request id other than the one being served.
    #[error("record for request {got} while serving request {expected}")]
    UnknownRequestId { got: u16, expected: u16 },

    /// BEGIN_REQUEST asked for a role other than responder.
    #[error("unsupported role {0}")]
    UnknownRole(u16),

    /// Name-value pairs or stdin content could not be decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The handler asked for a parameter the peer never sent.
    #[error("missing parameter {0:?}")]
    MissingParameter(String),

    /// The user handler returned an error.
    #[error("handler failed: {0}")]
    HandlerFailed(String),
}

impl ClientError {
    /// A close that is part of normal connection teardown rather than a
    /// protocol violation.
    pub fn is_clean_close(&self) -> bool
    {
        matches!(self, ClientError::PeerClosed)
    }
}

/// Configuration problems detected before the listener starts.  These are
/// fatal; the process exits with code 1.
#[derive(Debug, Error)]
pub enum ConfigError
{
    #[error("port must be between 1 and 65535")]
    InvalidPort,

    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),

    #[error("no request handler registered")]
    MissingHandler,

    #[error("max_concurrent_requests must be at least 1")]
    InvalidConcurrency,
}
