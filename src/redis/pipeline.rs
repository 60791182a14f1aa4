// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

//! Command batching on a single pooled connection.
//!
//! A [`Pipeline`] queues commands into the connection's write buffer without
//! flushing, remembering which reply shape each one expects. [`Pipeline::exec`]
//! flushes once and then reads exactly one reply per queued command, in
//! order — the protocol guarantee that responses arrive in request order on
//! a single stream is what makes the demultiplex trivial.
//!
//! A server error line fills its slot with [`Reply::Error`] and reading
//! continues; the stream is still framed. Any other failure poisons the
//! connection, and dropping the pipeline then closes it instead of handing
//! it back to the pool.

use std::mem;

use crate::connection::Connection;
use crate::errors::{Error, Result};
use crate::pool::PooledConnection;
use crate::redis::protocol::{self, ReplyHeader};
use crate::redis::{key_list_args, set_args, SetOptions, MAX_KEYS, SET_MAX_ARGS};

/// Most commands a batch may hold before [`Pipeline::exec`] must run.
const MAX_PENDING: usize = 64;

/// The reply shape a queued command expects.
#[derive(Clone, Copy, Debug)]
enum ReplyKind {
    /// A simple string; anything else is a framing violation.
    Status,
    /// `+OK`, nil, or a drained previous value (`SET` and its options).
    OkOrNil,
    Int,
    Bulk,
}

/// One slot of an executed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The command succeeded with no interesting payload.
    Ok,
    Int(i64),
    /// A bulk string, `None` for nil. Payloads are owned by the batch.
    Bulk(Option<Vec<u8>>),
    /// The server rejected this command; later slots are unaffected.
    Error(String),
}

pub struct Pipeline {
    conn: PooledConnection,
    pending: Vec<ReplyKind>,
}

impl Pipeline {
    pub(crate) fn new(conn: PooledConnection) -> Pipeline {
        Pipeline {
            conn,
            pending: Vec::with_capacity(MAX_PENDING),
        }
    }

    /// Number of commands queued and not yet executed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    async fn push(&mut self, args: &[&[u8]], kind: ReplyKind) -> Result<()> {
        if self.pending.len() >= MAX_PENDING {
            return Err(Error::TooManyKeys);
        }
        // While commands are queued the connection must not be recycled:
        // the write buffer may already have spilled to the wire, and the
        // replies have not been read.
        self.conn.set_healthy(false);
        protocol::write_command_unflushed(&mut *self.conn, args).await?;
        self.pending.push(kind);
        Ok(())
    }

    pub async fn set(&mut self, key: &str, value: &[u8], options: &SetOptions) -> Result<()> {
        let mut seconds = itoa::Buffer::new();
        let mut args: [&[u8]; SET_MAX_ARGS] = [&[]; SET_MAX_ARGS];
        let count = set_args(key, value, options, &mut seconds, &mut args);
        self.push(&args[..count], ReplyKind::OkOrNil).await
    }

    pub async fn get(&mut self, key: &str) -> Result<()> {
        let args: [&[u8]; 2] = [b"GET", key.as_bytes()];
        self.push(&args, ReplyKind::Bulk).await
    }

    pub async fn del(&mut self, keys: &[&str]) -> Result<()> {
        let mut args: [&[u8]; MAX_KEYS + 1] = [&[]; MAX_KEYS + 1];
        let count = key_list_args(b"DEL", keys, &mut args)?;
        self.push(&args[..count], ReplyKind::Int).await
    }

    pub async fn incr(&mut self, key: &str) -> Result<()> {
        let args: [&[u8]; 2] = [b"INCR", key.as_bytes()];
        self.push(&args, ReplyKind::Int).await
    }

    pub async fn incr_by(&mut self, key: &str, delta: i64) -> Result<()> {
        let mut delta_buf = itoa::Buffer::new();
        let args: [&[u8]; 3] = [
            b"INCRBY",
            key.as_bytes(),
            delta_buf.format(delta).as_bytes(),
        ];
        self.push(&args, ReplyKind::Int).await
    }

    pub async fn decr(&mut self, key: &str) -> Result<()> {
        let args: [&[u8]; 2] = [b"DECR", key.as_bytes()];
        self.push(&args, ReplyKind::Int).await
    }

    pub async fn decr_by(&mut self, key: &str, delta: i64) -> Result<()> {
        let mut delta_buf = itoa::Buffer::new();
        let args: [&[u8]; 3] = [
            b"DECRBY",
            key.as_bytes(),
            delta_buf.format(delta).as_bytes(),
        ];
        self.push(&args, ReplyKind::Int).await
    }

    pub async fn expire(&mut self, key: &str, seconds: u32) -> Result<()> {
        let mut seconds_buf = itoa::Buffer::new();
        let args: [&[u8]; 3] = [
            b"EXPIRE",
            key.as_bytes(),
            seconds_buf.format(seconds).as_bytes(),
        ];
        self.push(&args, ReplyKind::Int).await
    }

    pub async fn ttl(&mut self, key: &str) -> Result<()> {
        let args: [&[u8]; 2] = [b"TTL", key.as_bytes()];
        self.push(&args, ReplyKind::Int).await
    }

    pub async fn exists(&mut self, keys: &[&str]) -> Result<()> {
        let mut args: [&[u8]; MAX_KEYS + 1] = [&[]; MAX_KEYS + 1];
        let count = key_list_args(b"EXISTS", keys, &mut args)?;
        self.push(&args[..count], ReplyKind::Int).await
    }

    pub async fn ping(&mut self) -> Result<()> {
        let args: [&[u8]; 1] = [b"PING"];
        self.push(&args, ReplyKind::Status).await
    }

    /// Flushes the batch and reads one reply per queued command. On success
    /// the connection is healthy again and the pipeline may queue a new
    /// batch; on failure the connection is poisoned and will be closed when
    /// the pipeline drops.
    pub async fn exec(&mut self) -> Result<Vec<Reply>> {
        let pending = mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        let result = Self::read_batch(&mut self.conn, &pending).await;
        if result.is_ok() {
            self.conn.set_healthy(true);
        }
        result
    }

    async fn read_batch(conn: &mut PooledConnection, pending: &[ReplyKind]) -> Result<Vec<Reply>> {
        conn.flush().await?;
        let mut replies = Vec::with_capacity(pending.len());
        for kind in pending {
            replies.push(Self::read_reply(&mut **conn, *kind).await?);
        }
        Ok(replies)
    }

    async fn read_reply(conn: &mut Connection, kind: ReplyKind) -> Result<Reply> {
        match (kind, protocol::read_header(conn).await?) {
            // The server refused this command over an intact stream; the
            // slot records it and the demux moves on.
            (_, ReplyHeader::Error(message)) => Ok(Reply::Error(message)),
            (ReplyKind::Status, ReplyHeader::Simple) => Ok(Reply::Ok),
            (ReplyKind::OkOrNil, ReplyHeader::Simple) => Ok(Reply::Ok),
            (ReplyKind::OkOrNil, ReplyHeader::Bulk(None)) => Ok(Reply::Ok),
            (ReplyKind::OkOrNil, ReplyHeader::Bulk(Some(size))) => {
                conn.discard(size).await?;
                conn.read_crlf().await?;
                Ok(Reply::Ok)
            }
            (ReplyKind::Int, ReplyHeader::Int(value)) => Ok(Reply::Int(value)),
            (ReplyKind::Bulk, ReplyHeader::Bulk(None)) => Ok(Reply::Bulk(None)),
            (ReplyKind::Bulk, ReplyHeader::Bulk(Some(size))) => {
                let mut value = vec![0u8; size];
                conn.read_exact(&mut value).await?;
                conn.read_crlf().await?;
                Ok(Reply::Bulk(Some(value)))
            }
            _ => Err(Error::UnexpectedType),
        }
    }
}
