// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

//! Pooled cache-protocol clients.
//!
//! This crate speaks two wire protocols — RESP2 for Redis-compatible servers
//! ([`redis::Client`]) and the memcached meta protocol ([`memcached::Client`])
//! — on top of one shared core: a bounded idle-list connection pool per
//! server, typed response decoding into caller-owned buffers, and a retry
//! loop that distinguishes "the server said no" (the connection is still
//! framed and goes back to the pool) from "the transport is broken" (the
//! connection is destroyed and the command is retried on a fresh one).
//!
//! The memcached client additionally routes each key to one of N servers via
//! modulo or rendezvous hashing; the Redis client additionally offers a
//! [`redis::Pipeline`] that batches commands on a single pooled connection.

#[macro_use]
mod macros;

mod address;
mod connection;
mod errors;
mod options;
mod pool;
mod retry_strategies;

pub mod memcached;
pub mod redis;

pub use address::ServerAddress;
pub use errors::{Error, Result};
pub use options::ClientOptions;
