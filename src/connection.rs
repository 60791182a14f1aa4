// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

//! One protocol connection: a TCP stream split into a buffered reader and
//! writer, with the configured timeouts applied to every operation. The
//! protocol codecs drive this through line reads, exact reads into caller
//! buffers, and buffered writes; nothing here knows about RESP or the meta
//! protocol.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
    ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tracing::debug;

use crate::errors::{Error, Result};
use crate::options::ConnectionOptions;

/// Applies an optional timeout to a single I/O future. A lapse surfaces as
/// the same `io::Error` a kernel-level timeout would.
async fn io_op<T>(
    timeout: Option<Duration>,
    op: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::from(io::ErrorKind::TimedOut)),
        },
        None => op.await,
    }
}

pub(crate) struct Connection<S = TcpStream> {
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
    line_buf: Vec<u8>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Connection<TcpStream> {
    /// Dials `host:port` with the connect timeout applied and wraps the
    /// stream in buffered halves. Nagle is disabled; request payloads are
    /// small and latency-sensitive.
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        options: &ConnectionOptions,
    ) -> Result<Connection> {
        let stream = io_op(options.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(Error::ConnectionFailed)?;
        stream.set_nodelay(true).map_err(Error::ConnectionFailed)?;
        debug!(host, port, "connection established");
        Ok(Connection::new(stream, options))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub(crate) fn new(stream: S, options: &ConnectionOptions) -> Connection<S> {
        let (read_half, write_half) = tokio::io::split(stream);
        Connection {
            reader: BufReader::with_capacity(options.read_buffer_size, read_half),
            writer: BufWriter::with_capacity(options.write_buffer_size, write_half),
            line_buf: Vec::with_capacity(128),
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
        }
    }

    /// Reads one CRLF-terminated line and returns it without the terminator.
    /// A stream that ends before the newline is `EndOfStream`; a line that
    /// is too short to carry the terminator, or ends in a bare `\n`, is
    /// `ProtocolError`.
    pub(crate) async fn read_line(&mut self) -> Result<&[u8]> {
        self.line_buf.clear();
        let read = io_op(
            self.read_timeout,
            self.reader.read_until(b'\n', &mut self.line_buf),
        )
        .await
        .map_err(Error::ReadFailed)?;
        if read == 0 {
            return Err(Error::EndOfStream);
        }
        if !self.line_buf.ends_with(b"\n") {
            return Err(Error::EndOfStream);
        }
        if self.line_buf.len() < 2 || self.line_buf[self.line_buf.len() - 2] != b'\r' {
            return Err(Error::ProtocolError);
        }
        Ok(&self.line_buf[..self.line_buf.len() - 2])
    }

    /// Fills `buf` exactly.
    pub(crate) async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        io_op(self.read_timeout, self.reader.read_exact(buf))
            .await
            .map(|_| ())
            .map_err(|err| match err.kind() {
                io::ErrorKind::UnexpectedEof => Error::EndOfStream,
                _ => Error::ReadFailed(err),
            })
    }

    /// Consumes and discards the next `count` bytes.
    pub(crate) async fn discard(&mut self, mut count: usize) -> Result<()> {
        while count > 0 {
            let taken = {
                let available = io_op(self.read_timeout, self.reader.fill_buf())
                    .await
                    .map_err(Error::ReadFailed)?;
                if available.is_empty() {
                    return Err(Error::EndOfStream);
                }
                available.len().min(count)
            };
            self.reader.consume(taken);
            count -= taken;
        }
        Ok(())
    }

    /// Consumes the CRLF that terminates a payload.
    pub(crate) async fn read_crlf(&mut self) -> Result<()> {
        let mut terminator = [0u8; 2];
        self.read_exact(&mut terminator).await?;
        if &terminator != b"\r\n" {
            return Err(Error::ProtocolError);
        }
        Ok(())
    }

    /// Appends to the buffered writer; nothing reaches the wire until
    /// [`Connection::flush`].
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        io_op(self.write_timeout, self.writer.write_all(data))
            .await
            .map_err(Error::WriteFailed)
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        io_op(self.write_timeout, self.writer.flush())
            .await
            .map_err(Error::WriteFailed)
    }
}
