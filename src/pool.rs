// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

//! Bounded idle-list pool of healthy connections to one server.
//!
//! The idle list lives behind a plain [`std::sync::Mutex`] whose critical
//! sections only move connections in and out of a vector; connection
//! establishment and all protocol I/O happen outside the lock. Release runs
//! in [`PooledConnection::drop`], which cannot be interrupted, so a
//! cancelled caller can never leave the pool in a half-updated state.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::connection::Connection;
use crate::errors::Result;
use crate::options::ConnectionOptions;

struct PoolInner {
    host: String,
    port: u16,
    options: ConnectionOptions,
    max_idle: usize,
    idle: Mutex<Vec<Connection>>,
}

/// One pool per server; cheap to clone.
#[derive(Clone)]
pub(crate) struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub(crate) fn new(
        host: String,
        port: u16,
        options: ConnectionOptions,
        max_idle: usize,
    ) -> Pool {
        Pool {
            inner: Arc::new(PoolInner {
                host,
                port,
                options,
                max_idle,
                idle: Mutex::new(Vec::with_capacity(max_idle)),
            }),
        }
    }

    /// Pops an idle connection, or dials a new one on a miss. A failed dial
    /// leaves the pool untouched.
    pub(crate) async fn acquire(&self) -> Result<PooledConnection> {
        let idle = self.inner.idle.lock().unwrap().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                Connection::connect(&self.inner.host, self.inner.port, &self.inner.options).await?
            }
        };
        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            conn: Some(conn),
            healthy: true,
        })
    }

    /// Number of connections currently sitting in the idle list.
    pub(crate) fn idle_count(&self) -> usize {
        self.inner.idle.lock().unwrap().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.idle_count() == 0
    }
}

/// An acquired connection. The holder has exclusive access until the guard
/// drops; dropping runs the release path, re-filing the connection when its
/// health bit is set and the idle list has room, closing it otherwise.
pub(crate) struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    healthy: bool,
}

impl PooledConnection {
    /// Marks whether the connection may re-enter the pool on release.
    /// Callers clear this before starting an operation (so a cancelled read
    /// never recycles a half-drained stream) and restore it once the
    /// response has been fully consumed.
    pub(crate) fn set_healthy(&mut self, healthy: bool) {
        self.healthy = healthy;
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        if !self.healthy {
            debug!(host = %self.pool.host, "discarding connection");
            return;
        }
        let mut idle = self.pool.idle.lock().unwrap();
        if idle.len() < self.pool.max_idle {
            idle.push(conn);
            return;
        }
        drop(idle);
        debug!(host = %self.pool.host, "idle list full, closing connection");
    }
}
