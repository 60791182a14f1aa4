// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

//! RESP2 wire codec.
//!
//! Commands go out as arrays of bulk strings (`*N\r\n` followed by
//! `$len\r\n<arg>\r\n` per argument). Replies are dispatched on their type
//! prefix and decoded directly into caller-owned buffers; bulk payloads are
//! never staged through an intermediate allocation.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::Connection;
use crate::errors::{Error, Result};

/// First line of a reply, reduced to what the typed readers need. The error
/// message is the only owned piece, and only materializes on the error path.
pub(crate) enum ReplyHeader {
    Simple,
    Error(String),
    Int(i64),
    Bulk(Option<usize>),
}

/// Appends one command to the write buffer without flushing. Pipelines use
/// this directly; everything else goes through [`write_command`].
pub(crate) async fn write_command_unflushed<S>(
    conn: &mut Connection<S>,
    args: &[&[u8]],
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut length = itoa::Buffer::new();
    conn.write_all(b"*").await?;
    conn.write_all(length.format(args.len()).as_bytes()).await?;
    conn.write_all(b"\r\n").await?;
    for arg in args {
        conn.write_all(b"$").await?;
        conn.write_all(length.format(arg.len()).as_bytes()).await?;
        conn.write_all(b"\r\n").await?;
        conn.write_all(arg).await?;
        conn.write_all(b"\r\n").await?;
    }
    Ok(())
}

pub(crate) async fn write_command<S>(conn: &mut Connection<S>, args: &[&[u8]]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_command_unflushed(conn, args).await?;
    conn.flush().await
}

pub(crate) async fn read_header<S>(conn: &mut Connection<S>) -> Result<ReplyHeader>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = conn.read_line().await?;
    let (prefix, rest) = line.split_first().ok_or(Error::ProtocolError)?;
    match *prefix {
        b'+' => Ok(ReplyHeader::Simple),
        b'-' => Ok(ReplyHeader::Error(
            String::from_utf8_lossy(rest).into_owned(),
        )),
        b':' => Ok(ReplyHeader::Int(parse_i64(rest)?)),
        b'$' => match parse_i64(rest)? {
            -1 => Ok(ReplyHeader::Bulk(None)),
            size if size >= 0 => Ok(ReplyHeader::Bulk(Some(size as usize))),
            _ => Err(Error::ProtocolError),
        },
        // Arrays included: nothing in the command surface returns one.
        _ => Err(Error::UnexpectedType),
    }
}

/// Writes the command and expects a simple-string reply (`+OK`, `+PONG`).
pub(crate) async fn exec_simple_string<S>(conn: &mut Connection<S>, args: &[&[u8]]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_command(conn, args).await?;
    match read_header(conn).await? {
        ReplyHeader::Simple => Ok(()),
        ReplyHeader::Error(message) => Err(Error::Redis(message)),
        _ => Err(Error::UnexpectedType),
    }
}

/// Writes the command and expects an integer reply.
pub(crate) async fn exec_integer<S>(conn: &mut Connection<S>, args: &[&[u8]]) -> Result<i64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_command(conn, args).await?;
    match read_header(conn).await? {
        ReplyHeader::Int(value) => Ok(value),
        ReplyHeader::Error(message) => Err(Error::Redis(message)),
        _ => Err(Error::UnexpectedType),
    }
}

/// Writes the command and reads a bulk-string reply into `buf`, returning
/// the payload length, or `None` for a nil reply. A payload larger than
/// `buf` fails with `ValueTooLarge` and leaves the stream mid-response, so
/// the connection must not be reused afterwards.
pub(crate) async fn exec_bulk_string<S>(
    conn: &mut Connection<S>,
    args: &[&[u8]],
    buf: &mut [u8],
) -> Result<Option<usize>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_command(conn, args).await?;
    match read_header(conn).await? {
        ReplyHeader::Bulk(None) => Ok(None),
        ReplyHeader::Bulk(Some(size)) => {
            if size > buf.len() {
                return Err(Error::ValueTooLarge {
                    size,
                    capacity: buf.len(),
                });
            }
            conn.read_exact(&mut buf[..size]).await?;
            conn.read_crlf().await?;
            Ok(Some(size))
        }
        ReplyHeader::Error(message) => Err(Error::Redis(message)),
        _ => Err(Error::UnexpectedType),
    }
}

/// Writes the command and reads a bulk-string reply, discarding the payload.
pub(crate) async fn exec_bulk_string_discard<S>(
    conn: &mut Connection<S>,
    args: &[&[u8]],
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_command(conn, args).await?;
    match read_header(conn).await? {
        ReplyHeader::Bulk(None) => Ok(()),
        ReplyHeader::Bulk(Some(size)) => {
            conn.discard(size).await?;
            conn.read_crlf().await
        }
        ReplyHeader::Error(message) => Err(Error::Redis(message)),
        _ => Err(Error::UnexpectedType),
    }
}

/// Writes the command and accepts `+OK`, a nil bulk (`SET NX`/`XX` condition
/// not met), or a bulk payload (`SET ... GET` returning the previous value,
/// which is drained). All three count as success.
pub(crate) async fn exec_ok_or_nil<S>(conn: &mut Connection<S>, args: &[&[u8]]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_command(conn, args).await?;
    match read_header(conn).await? {
        ReplyHeader::Simple => Ok(()),
        ReplyHeader::Bulk(None) => Ok(()),
        ReplyHeader::Bulk(Some(size)) => {
            conn.discard(size).await?;
            conn.read_crlf().await
        }
        ReplyHeader::Error(message) => Err(Error::Redis(message)),
        _ => Err(Error::UnexpectedType),
    }
}

/// Base-10 signed integer parse that distinguishes a stray byte from a
/// value that does not fit.
pub(crate) fn parse_i64(bytes: &[u8]) -> Result<i64> {
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return Err(Error::InvalidCharacter);
    }
    let mut value: i64 = 0;
    for &byte in digits {
        if !byte.is_ascii_digit() {
            return Err(Error::InvalidCharacter);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((byte - b'0') as i64))
            .ok_or(Error::Overflow)?;
    }
    Ok(if negative { -value } else { value })
}
