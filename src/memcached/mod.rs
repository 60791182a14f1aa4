// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

//! Distributed memcached client speaking the meta protocol.
//!
//! The client owns one pool per configured server and routes each key
//! through its [`Hasher`]; keyless operations round-robin over the servers
//! through an atomic cursor. Failure handling matches the Redis client:
//! semantic responses (`EN`/`NS`/`EX`/`NF`, `SERVER_ERROR`) recycle the
//! connection and reach the caller directly, transport failures destroy it
//! and retry — always against the server the call first selected, since a
//! failure on one shard says nothing about the others.

mod hashing;
pub(crate) mod protocol;

pub use hashing::Hasher;

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::address::ServerAddress;
use crate::errors::{Error, Result};
use crate::options::ClientOptions;
use crate::pool::Pool;
use crate::retry_strategies::RetryStrategy;

/// A fetched item. `value` is a sub-slice of the buffer the caller passed
/// to [`Client::get`].
#[derive(Debug)]
pub struct Info<'a> {
    pub value: &'a [u8],
    pub flags: u32,
    /// Compare-and-swap token to hand back via [`SetOptions::cas`].
    pub cas: u64,
}

/// Storage discipline for [`Client::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetMode {
    /// Unconditional store.
    #[default]
    Set,
    /// Store only if the key is absent.
    Add,
    /// Store only if the key is present.
    Replace,
    Append,
    Prepend,
}

impl SetMode {
    pub(crate) fn token(self) -> Option<&'static [u8]> {
        match self {
            SetMode::Set => None,
            SetMode::Add => Some(b"ME"),
            SetMode::Replace => Some(b"MR"),
            SetMode::Append => Some(b"MA"),
            SetMode::Prepend => Some(b"MP"),
        }
    }
}

/// Options for [`Client::set`]. Zero values are not sent on the wire.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Expiry in seconds; 0 means no expiry.
    pub ttl: u32,
    /// Opaque client flags stored with the item.
    pub flags: u32,
    /// Make the store conditional on this cas token; a mismatch fails with
    /// [`Error::Exists`].
    pub cas: Option<u64>,
}

struct Server {
    address: ServerAddress,
    pool: Pool,
    /// Rendezvous seed, `wyhash("host:port")`, fixed at construction.
    hash_id: u64,
}

/// A pooled meta-protocol client over one or more servers.
pub struct Client {
    servers: Vec<Server>,
    hasher: Hasher,
    cursor: AtomicUsize,
    retry: RetryStrategy,
}

impl Client {
    /// Creates a client over `"host:port"` addresses. No connection is made
    /// until the first command runs.
    pub fn new(addresses: &[&str], hasher: Hasher, options: ClientOptions) -> Result<Client> {
        if addresses.is_empty() {
            return Err(Error::NoServers);
        }
        let servers = addresses
            .iter()
            .map(|&address| {
                let address = ServerAddress::parse(address)?;
                let pool = Pool::new(
                    address.host.clone(),
                    address.port,
                    options.connection(),
                    options.max_idle,
                );
                let hash_id = hashing::server_hash_id(&address);
                Ok(Server {
                    address,
                    pool,
                    hash_id,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Client {
            servers,
            hasher,
            cursor: AtomicUsize::new(0),
            retry: RetryStrategy::new(options.retry_attempts, options.retry_interval),
        })
    }

    /// The server a key lives on. Retries of one call stay pinned to the
    /// server chosen here.
    fn pick_server(&self, key: &[u8]) -> &Server {
        let index = if self.servers.len() == 1 {
            0
        } else {
            match self.hasher {
                Hasher::None => self.cursor.fetch_add(1, Ordering::Relaxed) % self.servers.len(),
                Hasher::Modulo => hashing::pick_modulo(key, self.servers.len()),
                Hasher::Rendezvous => {
                    hashing::pick_rendezvous(key, self.servers.iter().map(|server| server.hash_id))
                }
            }
        };
        &self.servers[index]
    }

    /// Round-robin pick for operations that have no key.
    fn next_server(&self) -> &Server {
        &self.servers[self.cursor.fetch_add(1, Ordering::Relaxed) % self.servers.len()]
    }

    /// Fetches `key` into `buf`. A miss is [`Error::NotFound`].
    pub async fn get<'a>(&self, key: &str, buf: &'a mut [u8]) -> Result<Info<'a>> {
        let server = self.pick_server(key.as_bytes());
        let raw = execute_with_retry!(server.pool, self.retry, conn => {
            protocol::get(&mut *conn, key.as_bytes(), &mut *buf).await
        })?;
        Ok(Info {
            value: &buf[..raw.len],
            flags: raw.flags,
            cas: raw.cas,
        })
    }

    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        mode: SetMode,
        options: &SetOptions,
    ) -> Result<()> {
        let server = self.pick_server(key.as_bytes());
        execute_with_retry!(server.pool, self.retry, conn => {
            protocol::set(&mut *conn, key.as_bytes(), value, mode, options).await
        })
    }

    /// Deletes `key`; a miss is [`Error::NotFound`].
    pub async fn delete(&self, key: &str) -> Result<()> {
        let server = self.pick_server(key.as_bytes());
        execute_with_retry!(server.pool, self.retry, conn => {
            protocol::delete(&mut *conn, key.as_bytes()).await
        })
    }

    /// Adds `delta` to a numeric item and returns the new value.
    pub async fn incr(&self, key: &str, delta: u64) -> Result<u64> {
        let server = self.pick_server(key.as_bytes());
        execute_with_retry!(server.pool, self.retry, conn => {
            protocol::arithmetic(&mut *conn, key.as_bytes(), delta, false).await
        })
    }

    /// Subtracts `delta` from a numeric item and returns the new value.
    pub async fn decr(&self, key: &str, delta: u64) -> Result<u64> {
        let server = self.pick_server(key.as_bytes());
        execute_with_retry!(server.pool, self.retry, conn => {
            protocol::arithmetic(&mut *conn, key.as_bytes(), delta, true).await
        })
    }

    /// Resets the expiry of an existing item.
    pub async fn touch(&self, key: &str, ttl: u32) -> Result<()> {
        let server = self.pick_server(key.as_bytes());
        execute_with_retry!(server.pool, self.retry, conn => {
            protocol::touch(&mut *conn, key.as_bytes(), ttl).await
        })
    }

    /// Round-trips one server picked round-robin.
    pub async fn noop(&self) -> Result<()> {
        let server = self.next_server();
        execute_with_retry!(server.pool, self.retry, conn => {
            protocol::noop(&mut *conn).await
        })
    }

    /// Version string of one server picked round-robin.
    pub async fn version(&self) -> Result<String> {
        let server = self.next_server();
        execute_with_retry!(server.pool, self.retry, conn => {
            protocol::version(&mut *conn).await
        })
    }

    /// Flushes every configured server. A flush that only reached one shard
    /// would leave the cache inconsistent, so this fans out to all of them.
    pub async fn flush_all(&self) -> Result<()> {
        futures::future::try_join_all(self.servers.iter().map(|server| async move {
            execute_with_retry!(server.pool, self.retry, conn => {
                protocol::flush_all(&mut *conn).await
            })
        }))
        .await
        .map(|_| ())
    }

    /// Idle pooled connections summed over all servers; exposed for tests
    /// and gauges.
    pub fn idle_connections(&self) -> usize {
        self.servers
            .iter()
            .map(|server| server.pool.idle_count())
            .sum()
    }

    /// The configured server addresses, in routing order.
    pub fn server_addresses(&self) -> impl Iterator<Item = &ServerAddress> {
        self.servers.iter().map(|server| &server.address)
    }
}
