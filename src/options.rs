// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

use std::time::Duration;

/// Tunables shared by both clients.
///
/// The defaults are deliberately small: two idle connections per server,
/// 4 KiB stream buffers, no I/O timeouts, and two retries with no pause
/// between them.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How many idle connections each per-server pool may hold.
    pub max_idle: usize,
    /// Capacity of the buffered reader on each connection.
    pub read_buffer_size: usize,
    /// Capacity of the buffered writer on each connection.
    pub write_buffer_size: usize,
    /// Applied to the TCP connect; `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Applied to every read on the connection.
    pub read_timeout: Option<Duration>,
    /// Applied to every write and flush on the connection.
    pub write_timeout: Option<Duration>,
    /// How many additional attempts a command gets after a transport
    /// failure. Semantic server responses are never retried.
    pub retry_attempts: usize,
    /// Pause between attempts.
    pub retry_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            max_idle: 2,
            read_buffer_size: 4096,
            write_buffer_size: 4096,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            retry_attempts: 2,
            retry_interval: Duration::ZERO,
        }
    }
}

/// The subset of [`ClientOptions`] a single connection needs; stored in each
/// pool so acquire-misses can dial new connections with the right knobs.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionOptions {
    pub(crate) read_buffer_size: usize,
    pub(crate) write_buffer_size: usize,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
}

impl ClientOptions {
    pub(crate) fn connection(&self) -> ConnectionOptions {
        ConnectionOptions {
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }
}
