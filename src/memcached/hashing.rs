// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

//! Key-to-server placement.
//!
//! Both strategies hash with wyhash and explicit seeds, so the mapping is a
//! pure function of the key and the configured server set — stable across
//! calls, processes and restarts. Rendezvous scores every server with its
//! own precomputed seed and takes the maximum, which keeps roughly `1/N` of
//! keys moving when the server set changes; modulo remaps almost everything
//! but costs a single hash.

use wyhash::wyhash;

use crate::address::ServerAddress;

/// How the client maps a key to one of its servers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Hasher {
    /// Ignore the key; the client round-robins over its servers.
    None,
    /// `wyhash(key) % N`.
    Modulo,
    /// Highest-random-weight hashing over per-server seeds.
    #[default]
    Rendezvous,
}

/// Per-server rendezvous seed, computed once at construction so lookups
/// never rehash the server identifier.
pub(crate) fn server_hash_id(address: &ServerAddress) -> u64 {
    wyhash(address.to_string().as_bytes(), 0)
}

pub(crate) fn pick_modulo(key: &[u8], server_count: usize) -> usize {
    (wyhash(key, 0) % server_count as u64) as usize
}

/// Index of the highest-scoring server; on equal scores the first wins.
pub(crate) fn pick_rendezvous(key: &[u8], seeds: impl Iterator<Item = u64>) -> usize {
    let mut best = 0;
    let mut best_score = 0;
    for (index, seed) in seeds.enumerate() {
        let score = wyhash(key, seed);
        if index == 0 || score > best_score {
            best = index;
            best_score = score;
        }
    }
    best
}
