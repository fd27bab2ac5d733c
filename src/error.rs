//! Error taxonomy for the driver.
//!
//! Every fallible operation in this crate returns one of these variants plus
//! whatever server-supplied detail is available. Transport and Protocol
//! errors mean the connection is no longer trustworthy; Server errors leave
//! the connection recoverable via `AckFailure`/`Reset`; Config and Usage
//! errors never touch the wire.

use std::io;

/// The single error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum BoltError {
    /// A `bolt://` URL or environment configuration was invalid.
    #[error("config error: {0}")]
    Config(String),

    /// The TCP/TLS transport failed (dial, handshake, read, write).
    #[error("transport error: {0}")]
    Transport(String),

    /// The underlying I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A malformed PackStream value or out-of-sequence protocol message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `INIT` was rejected by the server.
    #[error("authentication failed: {code}: {message}")]
    Auth {
        /// Server-supplied error code, e.g. `Neo.ClientError.Security.Unauthorized`.
        code: String,
        /// Human-readable detail from the server.
        message: String,
    },

    /// The server returned a `FAILURE` for a statement.
    #[error("server error {code}: {message}")]
    Server {
        /// Server-supplied error code.
        code: String,
        /// Human-readable detail from the server.
        message: String,
    },

    /// The caller misused the API (concurrent use of a connection, a closed
    /// pool, an already-consumed stream, ...).
    #[error("usage error: {0}")]
    Usage(String),
}

impl BoltError {
    pub(crate) fn protocol<S: Into<String>>(msg: S) -> Self {
        BoltError::Protocol(msg.into())
    }

    pub(crate) fn transport<S: Into<String>>(msg: S) -> Self {
        BoltError::Transport(msg.into())
    }

    pub(crate) fn usage<S: Into<String>>(msg: S) -> Self {
        BoltError::Usage(msg.into())
    }

    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        BoltError::Config(msg.into())
    }

    /// True if this error means the connection must be closed rather than
    /// recycled by the pool (Transport/Protocol/Io).
    pub fn poisons_connection(&self) -> bool {
        matches!(self, BoltError::Transport(_) | BoltError::Protocol(_) | BoltError::Io(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BoltError>;
