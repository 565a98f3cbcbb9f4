//! Error types for the read path, the write path, the worker pool and the
//! listener lifecycle.
//!
//! Only read errors are interpreted by the framework. Write errors are
//! carried to the response's completion callback untouched, and processing
//! errors never leave the request handler.

use std::io;
use thiserror::Error;

/// Failure reported by a read attempt on the listener socket
#[derive(Debug, Error)]
pub enum ReadError {
    /// The underlying stream reached its end
    #[error("end of stream")]
    Eof,
    /// The listener was closed while a read was pending
    #[error("listener closed")]
    Closed,
    /// A failure that is expected to clear on the next attempt
    #[error("transient read failure: {0}")]
    Transient(#[source] io::Error),
    /// The socket is no longer usable
    #[error("read failure: {0}")]
    Terminal(#[source] io::Error),
}

impl ReadError {
    /// Terminal errors stop the read loop and shut the listener down.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReadError::Transient(_))
    }
}

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            // ConnectionReset/Refused show up on UDP sockets after an ICMP
            // port-unreachable for an earlier send; the socket is still fine.
            io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused => ReadError::Transient(err),
            io::ErrorKind::UnexpectedEof => ReadError::Eof,
            _ => ReadError::Terminal(err),
        }
    }
}

/// Failure reported by a write capability
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("short write: {written} of {expected} bytes")]
    Short { written: usize, expected: usize },
    /// The write did not run to completion: it panicked, or the future
    /// driving it was dropped
    #[error("write did not complete")]
    Incomplete,
    #[error("write rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("work pool is closed")]
    Closed,
    #[error("work pool queue is full")]
    Full,
    #[error("work pool requires a running tokio runtime")]
    NoRuntime,
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),
    #[error("listener already started")]
    AlreadyStarted,
    #[error("listener is not running")]
    NotRunning,
    #[error(transparent)]
    Pool(#[from] PoolError),
}
