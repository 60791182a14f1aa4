// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

//! Client for Redis-compatible servers speaking RESP2.
//!
//! One client owns one per-server connection pool. Every command acquires a
//! connection, runs the codec operation, and classifies any failure: a
//! server-sent error line travels back to the caller with the connection
//! recycled, while transport and framing failures destroy the connection
//! and retry on a fresh one under the configured schedule.

mod pipeline;
pub(crate) mod protocol;

pub use pipeline::{Pipeline, Reply};

use crate::address::ServerAddress;
use crate::errors::{Error, Result};
use crate::options::ClientOptions;
use crate::pool::Pool;
use crate::retry_strategies::RetryStrategy;

/// Multi-key commands carry at most this many keys; the argument array is
/// built on the stack and larger batches fail with `TooManyKeys` before any
/// I/O happens.
pub(crate) const MAX_KEYS: usize = 64;

/// `SET` behavior switches. When both `nx` and `xx` are set, `nx` wins.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Expiry in seconds (`EX`).
    pub ex: Option<u32>,
    /// Only set if the key does not exist (`NX`).
    pub nx: bool,
    /// Only set if the key already exists (`XX`).
    pub xx: bool,
    /// Ask the server for the previous value (`GET`); the reply is drained,
    /// so this only changes what counts as success, not what is returned.
    pub get: bool,
}

pub(crate) const SET_MAX_ARGS: usize = 7;

pub(crate) fn set_args<'a>(
    key: &'a str,
    value: &'a [u8],
    options: &SetOptions,
    seconds: &'a mut itoa::Buffer,
    args: &mut [&'a [u8]; SET_MAX_ARGS],
) -> usize {
    args[0] = b"SET";
    args[1] = key.as_bytes();
    args[2] = value;
    let mut count = 3;
    if let Some(ex) = options.ex {
        args[count] = b"EX";
        args[count + 1] = seconds.format(ex).as_bytes();
        count += 2;
    }
    if options.nx {
        args[count] = b"NX";
        count += 1;
    } else if options.xx {
        args[count] = b"XX";
        count += 1;
    }
    if options.get {
        args[count] = b"GET";
        count += 1;
    }
    count
}

pub(crate) fn key_list_args<'a>(
    command: &'static [u8],
    keys: &[&'a str],
    args: &mut [&'a [u8]; MAX_KEYS + 1],
) -> Result<usize> {
    if keys.len() > MAX_KEYS {
        return Err(Error::TooManyKeys);
    }
    args[0] = command;
    for (slot, key) in args[1..].iter_mut().zip(keys) {
        *slot = key.as_bytes();
    }
    Ok(keys.len() + 1)
}

/// A pooled RESP2 client for a single server.
pub struct Client {
    pool: Pool,
    retry: RetryStrategy,
}

impl Client {
    /// Creates a client for `"host:port"`. No connection is made until the
    /// first command runs.
    pub fn new(address: &str, options: ClientOptions) -> Result<Client> {
        let address = ServerAddress::parse(address)?;
        let pool = Pool::new(
            address.host,
            address.port,
            options.connection(),
            options.max_idle,
        );
        Ok(Client {
            pool,
            retry: RetryStrategy::new(options.retry_attempts, options.retry_interval),
        })
    }

    /// Fetches `key` into `buf`; `None` when the key does not exist.
    pub async fn get<'a>(&self, key: &str, buf: &'a mut [u8]) -> Result<Option<&'a [u8]>> {
        let args: [&[u8]; 2] = [b"GET", key.as_bytes()];
        let len = execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_bulk_string(&mut *conn, &args, &mut *buf).await
        })?;
        Ok(len.map(|len| &buf[..len]))
    }

    /// Stores `value` under `key`. An unmet `NX`/`XX` condition still counts
    /// as success (the server answers nil); callers that need to know must
    /// re-read the key.
    pub async fn set(&self, key: &str, value: &[u8], options: &SetOptions) -> Result<()> {
        let mut seconds = itoa::Buffer::new();
        let mut args: [&[u8]; SET_MAX_ARGS] = [&[]; SET_MAX_ARGS];
        let count = set_args(key, value, options, &mut seconds, &mut args);
        let args = &args[..count];
        execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_ok_or_nil(&mut *conn, args).await
        })
    }

    /// Deletes up to 64 keys, returning how many existed.
    pub async fn del(&self, keys: &[&str]) -> Result<i64> {
        let mut args: [&[u8]; MAX_KEYS + 1] = [&[]; MAX_KEYS + 1];
        let count = key_list_args(b"DEL", keys, &mut args)?;
        let args = &args[..count];
        execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_integer(&mut *conn, args).await
        })
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        let args: [&[u8]; 2] = [b"INCR", key.as_bytes()];
        execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_integer(&mut *conn, &args).await
        })
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut delta_buf = itoa::Buffer::new();
        let args: [&[u8]; 3] = [
            b"INCRBY",
            key.as_bytes(),
            delta_buf.format(delta).as_bytes(),
        ];
        execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_integer(&mut *conn, &args).await
        })
    }

    pub async fn decr(&self, key: &str) -> Result<i64> {
        let args: [&[u8]; 2] = [b"DECR", key.as_bytes()];
        execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_integer(&mut *conn, &args).await
        })
    }

    pub async fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut delta_buf = itoa::Buffer::new();
        let args: [&[u8]; 3] = [
            b"DECRBY",
            key.as_bytes(),
            delta_buf.format(delta).as_bytes(),
        ];
        execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_integer(&mut *conn, &args).await
        })
    }

    /// Sets a relative expiry; false when the key does not exist.
    pub async fn expire(&self, key: &str, seconds: u32) -> Result<bool> {
        let mut seconds_buf = itoa::Buffer::new();
        let args: [&[u8]; 3] = [
            b"EXPIRE",
            key.as_bytes(),
            seconds_buf.format(seconds).as_bytes(),
        ];
        let set = execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_integer(&mut *conn, &args).await
        })?;
        Ok(set == 1)
    }

    /// Remaining time to live in seconds; -1 without an expiry, -2 without
    /// a key.
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        let args: [&[u8]; 2] = [b"TTL", key.as_bytes()];
        execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_integer(&mut *conn, &args).await
        })
    }

    /// Counts how many of up to 64 keys exist.
    pub async fn exists(&self, keys: &[&str]) -> Result<i64> {
        let mut args: [&[u8]; MAX_KEYS + 1] = [&[]; MAX_KEYS + 1];
        let count = key_list_args(b"EXISTS", keys, &mut args)?;
        let args = &args[..count];
        execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_integer(&mut *conn, args).await
        })
    }

    /// Round-trips the connection. With a message the server echoes it as a
    /// bulk string, which is read and discarded.
    pub async fn ping(&self, message: Option<&str>) -> Result<()> {
        match message {
            None => {
                let args: [&[u8]; 1] = [b"PING"];
                execute_with_retry!(self.pool, self.retry, conn => {
                    protocol::exec_simple_string(&mut *conn, &args).await
                })
            }
            Some(message) => {
                let args: [&[u8]; 2] = [b"PING", message.as_bytes()];
                execute_with_retry!(self.pool, self.retry, conn => {
                    protocol::exec_bulk_string_discard(&mut *conn, &args).await
                })
            }
        }
    }

    pub async fn flushdb(&self) -> Result<()> {
        let args: [&[u8]; 1] = [b"FLUSHDB"];
        execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_simple_string(&mut *conn, &args).await
        })
    }

    pub async fn dbsize(&self) -> Result<i64> {
        let args: [&[u8]; 1] = [b"DBSIZE"];
        execute_with_retry!(self.pool, self.retry, conn => {
            protocol::exec_integer(&mut *conn, &args).await
        })
    }

    /// Acquires a connection and starts a command batch on it. The batch
    /// holds the connection until it is dropped; see [`Pipeline`].
    pub async fn pipeline(&self) -> Result<Pipeline> {
        let mut pauses = self.retry.intervals();
        let conn = loop {
            match self.pool.acquire().await {
                Ok(conn) => break conn,
                Err(err) => match pauses.next() {
                    Some(pause) => {
                        tracing::debug!(error = %err, "acquire failed, retrying");
                        tokio::time::sleep(pause).await;
                    }
                    None => return Err(err),
                },
            }
        };
        Ok(Pipeline::new(conn))
    }

    /// Number of idle pooled connections; exposed for tests and gauges.
    pub fn idle_connections(&self) -> usize {
        self.pool.idle_count()
    }
}
