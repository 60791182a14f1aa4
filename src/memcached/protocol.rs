// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

//! Memcached meta-protocol codec.
//!
//! Commands are single lines of space-separated ASCII tokens (`mg`, `ms`,
//! `md`, `ma`, `mn`), with store payloads on the following line; both lines
//! are CRLF-terminated. Responses open with a two-letter code, optionally
//! followed by flag tokens (`f<flags>`, `c<cas>`) and, for `VA`, a payload
//! of the announced size. The miss/not-stored/conflict codes are semantic
//! answers from a healthy server, mapped to the resumable error kinds.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::Connection;
use crate::errors::{Error, Result};
use crate::memcached::{SetMode, SetOptions};

/// Length and metadata of a fetched value; the payload itself has already
/// been copied into the caller's buffer.
pub(crate) struct RawInfo {
    pub(crate) len: usize,
    pub(crate) flags: u32,
    pub(crate) cas: u64,
}

/// Decoded first line of a response.
enum MetaReply {
    /// `VA <size> ...` — a payload of `size` bytes follows.
    Value { size: usize, flags: u32, cas: u64 },
    /// `HD ...` — stored or hit with no payload.
    Stored,
    /// `EN`
    Miss,
    /// `NS`
    NotStored,
    /// `EX`
    CasMismatch,
    /// `NF`
    NotFound,
    /// `OK`
    Ok,
    /// `MN`
    NoOp,
    /// `VERSION <str>`
    Version(String),
}

async fn read_reply<S>(conn: &mut Connection<S>) -> Result<MetaReply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = conn.read_line().await?;
    if let Some(rest) = line.strip_prefix(b"VERSION ") {
        return Ok(MetaReply::Version(
            String::from_utf8_lossy(rest).into_owned(),
        ));
    }
    if line.starts_with(b"SERVER_ERROR") {
        let message = line.strip_prefix(b"SERVER_ERROR ").unwrap_or(b"");
        return Err(Error::Server(String::from_utf8_lossy(message).into_owned()));
    }
    let mut tokens = line.split(|&byte| byte == b' ');
    let code = tokens.next().ok_or(Error::ProtocolError)?;
    match code {
        [b'V', b'A'] => {
            let size = parse_u64(tokens.next().ok_or(Error::ProtocolError)?)? as usize;
            let (flags, cas) = parse_item_flags(tokens)?;
            Ok(MetaReply::Value { size, flags, cas })
        }
        [b'H', b'D'] => Ok(MetaReply::Stored),
        [b'E', b'N'] => Ok(MetaReply::Miss),
        [b'N', b'S'] => Ok(MetaReply::NotStored),
        [b'E', b'X'] => Ok(MetaReply::CasMismatch),
        [b'N', b'F'] => Ok(MetaReply::NotFound),
        [b'O', b'K'] => Ok(MetaReply::Ok),
        [b'M', b'N'] => Ok(MetaReply::NoOp),
        _ => Err(Error::Server(String::from_utf8_lossy(line).into_owned())),
    }
}

fn parse_item_flags<'a>(tokens: impl Iterator<Item = &'a [u8]>) -> Result<(u32, u64)> {
    let mut flags = 0;
    let mut cas = 0;
    for token in tokens {
        match token.split_first() {
            Some((b'f', digits)) => {
                flags = u32::try_from(parse_u64(digits)?).map_err(|_| Error::Overflow)?;
            }
            Some((b'c', digits)) => cas = parse_u64(digits)?,
            // Other return flags are not requested by this client; tolerate
            // them rather than desynchronize on a chatty server.
            _ => {}
        }
    }
    Ok((flags, cas))
}

/// The semantic response codes, mapped to their error kinds; anything else
/// in a position where a specific code was expected is a framing-level
/// surprise.
fn semantic_error(reply: MetaReply) -> Error {
    match reply {
        MetaReply::Miss | MetaReply::NotFound => Error::NotFound,
        MetaReply::NotStored => Error::NotStored,
        MetaReply::CasMismatch => Error::Exists,
        _ => Error::UnexpectedType,
    }
}

/// `mg <key> v f c` — fetch value, flags and cas token into `buf`.
pub(crate) async fn get<S>(conn: &mut Connection<S>, key: &[u8], buf: &mut [u8]) -> Result<RawInfo>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.write_all(b"mg ").await?;
    conn.write_all(key).await?;
    conn.write_all(b" v f c\r\n").await?;
    conn.flush().await?;
    match read_reply(conn).await? {
        MetaReply::Value { size, flags, cas } => {
            if size > buf.len() {
                return Err(Error::ValueTooLarge {
                    size,
                    capacity: buf.len(),
                });
            }
            conn.read_exact(&mut buf[..size]).await?;
            conn.read_crlf().await?;
            Ok(RawInfo {
                len: size,
                flags,
                cas,
            })
        }
        other => Err(semantic_error(other)),
    }
}

/// `ms <key> <size> [T<ttl>] [F<flags>] [C<cas>] [M<mode>]` plus payload.
pub(crate) async fn set<S>(
    conn: &mut Connection<S>,
    key: &[u8],
    value: &[u8],
    mode: SetMode,
    options: &SetOptions,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut number = itoa::Buffer::new();
    conn.write_all(b"ms ").await?;
    conn.write_all(key).await?;
    conn.write_all(b" ").await?;
    conn.write_all(number.format(value.len()).as_bytes()).await?;
    if options.ttl > 0 {
        conn.write_all(b" T").await?;
        conn.write_all(number.format(options.ttl).as_bytes()).await?;
    }
    if options.flags > 0 {
        conn.write_all(b" F").await?;
        conn.write_all(number.format(options.flags).as_bytes())
            .await?;
    }
    if let Some(cas) = options.cas {
        conn.write_all(b" C").await?;
        conn.write_all(number.format(cas).as_bytes()).await?;
    }
    if let Some(token) = mode.token() {
        conn.write_all(b" ").await?;
        conn.write_all(token).await?;
    }
    conn.write_all(b"\r\n").await?;
    conn.write_all(value).await?;
    conn.write_all(b"\r\n").await?;
    conn.flush().await?;
    match read_reply(conn).await? {
        MetaReply::Stored => Ok(()),
        other => Err(semantic_error(other)),
    }
}

/// `md <key>` — delete; a miss is `NotFound`.
pub(crate) async fn delete<S>(conn: &mut Connection<S>, key: &[u8]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.write_all(b"md ").await?;
    conn.write_all(key).await?;
    conn.write_all(b"\r\n").await?;
    conn.flush().await?;
    match read_reply(conn).await? {
        MetaReply::Stored => Ok(()),
        other => Err(semantic_error(other)),
    }
}

/// `ma <key> v D<delta> [MD]` — increment, or decrement with `MD`. The new
/// value comes back as a decimal `VA` payload.
pub(crate) async fn arithmetic<S>(
    conn: &mut Connection<S>,
    key: &[u8],
    delta: u64,
    decrement: bool,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut number = itoa::Buffer::new();
    conn.write_all(b"ma ").await?;
    conn.write_all(key).await?;
    conn.write_all(b" v D").await?;
    conn.write_all(number.format(delta).as_bytes()).await?;
    if decrement {
        conn.write_all(b" MD").await?;
    }
    conn.write_all(b"\r\n").await?;
    conn.flush().await?;
    match read_reply(conn).await? {
        MetaReply::Value { size, .. } => {
            let mut digits = [0u8; 32];
            if size > digits.len() {
                return Err(Error::ProtocolError);
            }
            conn.read_exact(&mut digits[..size]).await?;
            conn.read_crlf().await?;
            parse_u64(&digits[..size])
        }
        other => Err(semantic_error(other)),
    }
}

/// Touch is a meta-get that only carries a TTL option: `mg <key> T<ttl>`.
/// The server answers `HD` on a hit.
pub(crate) async fn touch<S>(conn: &mut Connection<S>, key: &[u8], ttl: u32) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut number = itoa::Buffer::new();
    conn.write_all(b"mg ").await?;
    conn.write_all(key).await?;
    conn.write_all(b" T").await?;
    conn.write_all(number.format(ttl).as_bytes()).await?;
    conn.write_all(b"\r\n").await?;
    conn.flush().await?;
    match read_reply(conn).await? {
        MetaReply::Stored => Ok(()),
        other => Err(semantic_error(other)),
    }
}

/// `mn` — the meta no-op; cheap connection liveness probe.
pub(crate) async fn noop<S>(conn: &mut Connection<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.write_all(b"mn\r\n").await?;
    conn.flush().await?;
    match read_reply(conn).await? {
        MetaReply::NoOp => Ok(()),
        other => Err(semantic_error(other)),
    }
}

pub(crate) async fn flush_all<S>(conn: &mut Connection<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.write_all(b"flush_all\r\n").await?;
    conn.flush().await?;
    match read_reply(conn).await? {
        MetaReply::Ok => Ok(()),
        other => Err(semantic_error(other)),
    }
}

pub(crate) async fn version<S>(conn: &mut Connection<S>) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.write_all(b"version\r\n").await?;
    conn.flush().await?;
    match read_reply(conn).await? {
        MetaReply::Version(version) => Ok(version),
        other => Err(semantic_error(other)),
    }
}

/// Base-10 unsigned parse for sizes, flag values and arithmetic results.
pub(crate) fn parse_u64(bytes: &[u8]) -> Result<u64> {
    if bytes.is_empty() {
        return Err(Error::InvalidCharacter);
    }
    let mut value: u64 = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return Err(Error::InvalidCharacter);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((byte - b'0') as u64))
            .ok_or(Error::Overflow)?;
    }
    Ok(value)
}
