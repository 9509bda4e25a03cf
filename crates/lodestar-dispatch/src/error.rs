//! Error types for the dispatch layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote endpoint refused the connection.
    #[error("connection refused to {addr}")]
    ConnectionRefused {
        /// Address that refused the connection.
        addr: String,
    },

    /// The connection could not be established in time.
    #[error("connection timeout after {timeout_ms}ms to {addr}")]
    ConnectionTimeout {
        /// Address being connected to.
        addr: String,
        /// Configured connect timeout.
        timeout_ms: u64,
    },

    /// The peer reset the connection mid-exchange.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// No response arrived within the read timeout.
    #[error("read timeout after {timeout_ms}ms")]
    ReadTimeout {
        /// Configured read timeout.
        timeout_ms: u64,
    },

    /// Any other transport-specific failure.
    #[error("transport failure: {reason}")]
    Other {
        /// Human readable description.
        reason: String,
    },

    /// Underlying I/O error, including failures while reading a response body.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Classification used by retry settings.
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::ConnectionRefused { .. } => TransportErrorKind::ConnectionRefused,
            TransportError::ConnectionTimeout { .. } => TransportErrorKind::ConnectionTimeout,
            TransportError::ConnectionReset => TransportErrorKind::ConnectionReset,
            TransportError::ReadTimeout { .. } => TransportErrorKind::ReadTimeout,
            TransportError::Other { .. } => TransportErrorKind::Other,
            TransportError::Io(_) => TransportErrorKind::Io,
        }
    }
}

/// Payload-free discriminant of [`TransportError`], usable in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// [`TransportError::ConnectionRefused`].
    ConnectionRefused,
    /// [`TransportError::ConnectionTimeout`].
    ConnectionTimeout,
    /// [`TransportError::ConnectionReset`].
    ConnectionReset,
    /// [`TransportError::ReadTimeout`].
    ReadTimeout,
    /// [`TransportError::Other`].
    Other,
    /// [`TransportError::Io`].
    Io,
}

/// Failures surfaced to the caller of a dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request URI carries no host naming the target service.
    #[error("request URI {uri} does not contain a valid service name")]
    IllegalRequest {
        /// The offending URI.
        uri: String,
    },

    /// The request URI could not be rebuilt for the resolved endpoint.
    #[error("invalid URI: {reason}")]
    InvalidUri {
        /// Why reconstruction failed.
        reason: String,
    },

    /// A dispatch client was assembled without a required collaborator.
    #[error("configuration error: {reason}")]
    Config {
        /// What is missing or inconsistent.
        reason: String,
    },

    /// The transport call failed and was not (or no longer) retried.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// Returns the transport error if this is a transport failure.
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            DispatchError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Error type returned by lifecycle listeners.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
