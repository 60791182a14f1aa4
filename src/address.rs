// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

use crate::errors::{Error, Result};

/// A parsed `host:port` server address.
///
/// The port is everything after the *last* colon, so bracketed IPv6
/// addresses like `[::1]:6379` parse with `host = "[::1]"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn parse(address: &str) -> Result<ServerAddress> {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidServer(address.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidServer(address.to_string()))?;
        Ok(ServerAddress {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
