//! Tunnel error types
//!
//! One error enum covers both the codec and the two state machines, rather
//! than one per module.

use thiserror::Error;

/// Errors surfaced by the codec, session table, and client/server state machines.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Malformed QNAME/TXT grammar, wrong verb, bad argument count, or
    /// undecodable bit/checksum field.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Computed checksum does not match the advertised one.
    #[error("checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },

    /// No reply arrived within the deadline.
    #[error("timed out waiting for reply")]
    Timeout,

    /// The server's out-of-scope HTTP fetch returned non-200 or failed outright.
    #[error("upstream fetch failed: {0}")]
    UpstreamFetchFailed(String),

    /// Encoding would exceed the 63-octet label or 255-octet name budget.
    #[error("name too long: {0}")]
    NameTooLong(String),

    /// Filename contains a literal `-`, which is indistinguishable from the
    /// `.`→`-` substitution used to fit it in a single DNS label.
    #[error("invalid filename: {0}")]
    InvalidName(String),

    /// Client exhausted its retry budget for some logical step.
    #[error("transfer failed after exhausting retries: {0}")]
    TransferFailed(String),

    /// Socket or filesystem I/O failure with no protocol-level meaning of its own.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
