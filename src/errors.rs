// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while talking to a cache server.
///
/// The transport variants carry the concrete [`io::Error`] that caused them,
/// so callers see the underlying cause rather than a generic read/write
/// failure. The semantic variants ([`Error::Redis`], [`Error::NotStored`],
/// [`Error::Exists`], [`Error::NotFound`], [`Error::Server`]) are responses
/// a healthy server sent over an intact stream; see
/// [`Error::is_resumable`].
#[derive(Debug, Error)]
pub enum Error {
    /// TCP connect failed or timed out.
    #[error("failed to connect: {0}")]
    ConnectionFailed(#[source] io::Error),

    /// A read from the stream failed or timed out.
    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),

    /// A write to the stream failed or timed out.
    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// The peer closed the connection in the middle of a response.
    #[error("connection closed mid-response")]
    EndOfStream,

    /// The response violated the wire framing rules.
    #[error("malformed response framing")]
    ProtocolError,

    /// The response was well-formed but of the wrong kind for this command.
    #[error("unexpected response type")]
    UnexpectedType,

    /// A value did not fit into the caller-provided buffer.
    #[error("value of {size} bytes exceeds buffer capacity of {capacity}")]
    ValueTooLarge { size: usize, capacity: usize },

    /// A decimal field contained a non-digit byte.
    #[error("invalid character in integer")]
    InvalidCharacter,

    /// A decimal field did not fit the target integer type.
    #[error("integer overflow")]
    Overflow,

    /// The Redis server replied with an error line (`-ERR ...`).
    #[error("redis error: {0}")]
    Redis(String),

    /// Memcached refused to store the item (`NS`).
    #[error("not stored")]
    NotStored,

    /// The compare-and-swap token did not match (`EX`).
    #[error("cas token mismatch")]
    Exists,

    /// The key does not exist (`EN` on fetch, `NF` on delete/arithmetic).
    #[error("not found")]
    NotFound,

    /// Memcached reported an internal failure, or sent a response code this
    /// client does not know.
    #[error("server error: {0}")]
    Server(String),

    /// More than 64 keys were passed to a single multi-key call.
    #[error("more than 64 keys in one call")]
    TooManyKeys,

    /// A server address did not parse as `host:port`.
    #[error("invalid server address `{0}`")]
    InvalidServer(String),

    /// The client was configured with an empty server list.
    #[error("no servers configured")]
    NoServers,
}

impl Error {
    /// True when the server rejected the command but the stream is still
    /// framed: the connection can safely carry the next command and the
    /// caller should not retry (the server already gave its answer).
    ///
    /// Everything else means the stream may hold garbage or nothing at all,
    /// and the connection must be discarded.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Error::Redis(_)
                | Error::NotStored
                | Error::Exists
                | Error::NotFound
                | Error::Server(_)
        )
    }
}
