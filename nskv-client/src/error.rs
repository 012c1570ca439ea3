//! # Error Taxonomy
//!
//! Purpose: Separate what went wrong on the wire (`TransportError`) from which
//! client operation it broke (`ClientError`).
//!
//! ## Design Principles
//! 1. **Tagged Failures**: Each accessor has its own variant, so callers can
//!    match on the operation without parsing messages.
//! 2. **Cause Preservation**: Transport failures are kept as `source()` for
//!    inspection and logging.
//! 3. **No Retries**: Errors are surfaced as-is; retry policy belongs to the
//!    caller.

use std::io;

use thiserror::Error;

use crate::codec::CodecError;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Failures of a single round trip or of the pool that serves it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Store returned an error reply.
    #[error("server error: {message}")]
    Server { message: String },
    /// Reply type did not match the command that was sent.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Pool is at capacity and configured not to wait.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// Pool was closed before or while waiting for a connection.
    #[error("connection pool closed")]
    PoolClosed,
    /// Address could not be parsed into a socket address.
    #[error("invalid address")]
    InvalidAddress,
    /// Pool or client limits are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// `AUTH` was rejected while dialing.
    #[error("authentication failed: {message}")]
    AuthFailed { message: String },
    /// Expiry rounds down to zero whole seconds.
    #[error("expiry must be at least one second")]
    InvalidExpiry,
}

/// Errors surfaced by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Operation invoked on an inert or closed client.
    #[error("client was not initialized")]
    NotInitialized,
    #[error("could not 'PING' store: {0}")]
    PingFailed(#[source] TransportError),
    #[error("could not 'GET' specified key: {0}")]
    GetFailed(#[source] TransportError),
    #[error("could not 'SET' value to specified key: {0}")]
    SetFailed(#[source] TransportError),
    #[error("could not 'SETEX' value to specified key: {0}")]
    SetExFailed(#[source] TransportError),
    /// The `EXISTS` round trip failed. A missing key is `Ok(false)`, not this.
    #[error("could not check specified key: {0}")]
    KeyNotFound(#[source] TransportError),
    #[error("could not 'DEL' specified key: {0}")]
    DelFailed(#[source] TransportError),
    #[error("could not clear keys: {0}")]
    ClearFailed(#[source] TransportError),
    #[error("could not 'SCAN' keys: {0}")]
    ScanFailed(#[source] TransportError),
    /// The store kept returning non-zero cursors past the iteration budget.
    #[error("scan did not converge after {iterations} round trips")]
    ScanDidNotConverge { iterations: usize },
    /// Stored bytes are not a valid representation of the requested type.
    #[error("stored value cannot be read as {target}")]
    CoerceFailed { target: &'static str },
    #[error("encode object failed: {0}")]
    EncodeFailed(#[source] CodecError),
    #[error("decode object failed: {0}")]
    DecodeFailed(#[source] CodecError),
    /// Every acquisition attempt found the lock held elsewhere.
    #[error("could not acquire lock {name:?}")]
    LockFailed { name: String },
    #[error("lock round trip failed: {0}")]
    LockTransport(#[source] TransportError),
    #[error("could not initialize default client: {0}")]
    InitializeDefaultFailed(#[source] Box<ClientError>),
    /// Failure outside any tagged operation, e.g. while building a pool.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Comparable tag for a `ClientError`, independent of its cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotInitialized,
    PingFailed,
    GetFailed,
    SetFailed,
    SetExFailed,
    KeyNotFound,
    DelFailed,
    ClearFailed,
    ScanFailed,
    ScanDidNotConverge,
    CoerceFailed,
    EncodeFailed,
    DecodeFailed,
    Lock,
    InitializeDefaultFailed,
    Transport,
}

impl ClientError {
    /// Returns the operation tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::NotInitialized => ErrorKind::NotInitialized,
            ClientError::PingFailed(_) => ErrorKind::PingFailed,
            ClientError::GetFailed(_) => ErrorKind::GetFailed,
            ClientError::SetFailed(_) => ErrorKind::SetFailed,
            ClientError::SetExFailed(_) => ErrorKind::SetExFailed,
            ClientError::KeyNotFound(_) => ErrorKind::KeyNotFound,
            ClientError::DelFailed(_) => ErrorKind::DelFailed,
            ClientError::ClearFailed(_) => ErrorKind::ClearFailed,
            ClientError::ScanFailed(_) => ErrorKind::ScanFailed,
            ClientError::ScanDidNotConverge { .. } => ErrorKind::ScanDidNotConverge,
            ClientError::CoerceFailed { .. } => ErrorKind::CoerceFailed,
            ClientError::EncodeFailed(_) => ErrorKind::EncodeFailed,
            ClientError::DecodeFailed(_) => ErrorKind::DecodeFailed,
            ClientError::LockFailed { .. } | ClientError::LockTransport(_) => ErrorKind::Lock,
            ClientError::InitializeDefaultFailed(_) => ErrorKind::InitializeDefaultFailed,
            ClientError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Returns the wrapped transport cause, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            ClientError::PingFailed(err)
            | ClientError::GetFailed(err)
            | ClientError::SetFailed(err)
            | ClientError::SetExFailed(err)
            | ClientError::KeyNotFound(err)
            | ClientError::DelFailed(err)
            | ClientError::ClearFailed(err)
            | ClientError::ScanFailed(err)
            | ClientError::LockTransport(err)
            | ClientError::Transport(err) => Some(err),
            ClientError::InitializeDefaultFailed(inner) => inner.transport(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn tagged_errors_keep_their_cause() {
        let err = ClientError::GetFailed(TransportError::Server {
            message: "ERR boom".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::GetFailed);
        assert!(matches!(err.transport(), Some(TransportError::Server { .. })));
        assert!(err.source().is_some());
    }

    #[test]
    fn default_init_failure_exposes_nested_transport() {
        let err = ClientError::InitializeDefaultFailed(Box::new(ClientError::PingFailed(
            TransportError::Protocol,
        )));
        assert_eq!(err.kind(), ErrorKind::InitializeDefaultFailed);
        assert!(matches!(err.transport(), Some(TransportError::Protocol)));
    }

    #[test]
    fn inert_client_error_has_no_cause() {
        let err = ClientError::NotInitialized;
        assert!(err.transport().is_none());
        assert_eq!(err.to_string(), "client was not initialized");
    }
}
