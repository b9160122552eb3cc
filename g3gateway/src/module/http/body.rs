/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{HttpBodyTransferError, HttpChunkedLine};
use crate::module::io::limited_read_until;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HttpBodyType {
    ContentLength(u64),
    Chunked,
    ReadUntilEnd,
}

async fn copy_exact<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut left: u64,
) -> Result<u64, HttpBodyTransferError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let total = left;
    while left > 0 {
        let buf = reader
            .fill_buf()
            .await
            .map_err(HttpBodyTransferError::ReadFailed)?;
        if buf.is_empty() {
            return Err(HttpBodyTransferError::ReaderClosed);
        }
        let len = usize::try_from(left).unwrap_or(usize::MAX).min(buf.len());
        writer
            .write_all(&buf[..len])
            .await
            .map_err(HttpBodyTransferError::WriteFailed)?;
        reader.consume(len);
        left -= len as u64;
    }
    Ok(total)
}

async fn copy_until_end<R, W>(reader: &mut R, writer: &mut W) -> Result<u64, HttpBodyTransferError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    loop {
        let buf = reader
            .fill_buf()
            .await
            .map_err(HttpBodyTransferError::ReadFailed)?;
        if buf.is_empty() {
            return Ok(total);
        }
        let len = buf.len();
        writer
            .write_all(buf)
            .await
            .map_err(HttpBodyTransferError::WriteFailed)?;
        reader.consume(len);
        total += len as u64;
    }
}

async fn copy_line<R, W>(
    reader: &mut R,
    writer: &mut W,
    line_buf: &mut Vec<u8>,
    line_max_len: usize,
) -> Result<(), HttpBodyTransferError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    line_buf.clear();
    let (found, nr) = limited_read_until(reader, b'\n', line_max_len, line_buf)
        .await
        .map_err(HttpBodyTransferError::ReadFailed)?;
    if !found {
        return if nr < line_max_len {
            Err(HttpBodyTransferError::ReaderClosed)
        } else {
            Err(HttpBodyTransferError::InvalidChunked("too long line"))
        };
    }
    writer
        .write_all(line_buf)
        .await
        .map_err(HttpBodyTransferError::WriteFailed)
}

/// Forward a chunked body without decoding it, trailer included.
async fn copy_chunked<R, W>(
    reader: &mut R,
    writer: &mut W,
    line_max_len: usize,
) -> Result<u64, HttpBodyTransferError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line_buf = Vec::<u8>::with_capacity(64);
    let mut total = 0u64;
    loop {
        copy_line(reader, writer, &mut line_buf, line_max_len).await?;
        total += line_buf.len() as u64;
        let chunk = HttpChunkedLine::parse(&line_buf)
            .map_err(|_| HttpBodyTransferError::InvalidChunked("invalid chunk size line"))?;
        if chunk.chunk_size == 0 {
            break;
        }

        total += copy_exact(reader, writer, chunk.chunk_size).await?;

        copy_line(reader, writer, &mut line_buf, line_max_len).await?;
        total += line_buf.len() as u64;
        if line_buf.as_slice() != b"\r\n" && line_buf.as_slice() != b"\n" {
            return Err(HttpBodyTransferError::InvalidChunked("no chunk data end"));
        }
    }

    // trailer fields, ends with an empty line
    loop {
        copy_line(reader, writer, &mut line_buf, line_max_len).await?;
        total += line_buf.len() as u64;
        if line_buf.as_slice() == b"\r\n" || line_buf.as_slice() == b"\n" {
            return Ok(total);
        }
    }
}

/// Copy a message body from `reader` to `writer` according to its framing.
///
/// Returns the number of body bytes written, chunk framing included.
/// The writer is flushed but not shut down.
pub(crate) async fn copy_body<R, W>(
    reader: &mut R,
    writer: &mut W,
    body_type: HttpBodyType,
    line_max_len: usize,
) -> Result<u64, HttpBodyTransferError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let nw = match body_type {
        HttpBodyType::ContentLength(size) => copy_exact(reader, writer, size).await?,
        HttpBodyType::Chunked => copy_chunked(reader, writer, line_max_len).await?,
        HttpBodyType::ReadUntilEnd => copy_until_end(reader, writer).await?,
    };
    writer
        .flush()
        .await
        .map_err(HttpBodyTransferError::WriteFailed)?;
    Ok(nw)
}

async fn read_line<R>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
    line_max_len: usize,
) -> Result<(), HttpBodyTransferError>
where
    R: AsyncBufRead + Unpin,
{
    line_buf.clear();
    let (found, nr) = limited_read_until(reader, b'\n', line_max_len, line_buf)
        .await
        .map_err(HttpBodyTransferError::ReadFailed)?;
    if found {
        Ok(())
    } else if nr < line_max_len {
        Err(HttpBodyTransferError::ReaderClosed)
    } else {
        Err(HttpBodyTransferError::InvalidChunked("too long line"))
    }
}

/// Read a whole message body into memory, chunked framing removed.
pub(crate) async fn read_body<R>(
    reader: &mut R,
    body_type: HttpBodyType,
    line_max_len: usize,
    max_size: usize,
) -> Result<Vec<u8>, HttpBodyTransferError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    match body_type {
        HttpBodyType::ContentLength(size) => {
            if size > max_size as u64 {
                return Err(HttpBodyTransferError::TooLarge(max_size));
            }
            copy_exact(reader, &mut body, size).await?;
        }
        HttpBodyType::Chunked => {
            let mut line_buf = Vec::<u8>::with_capacity(64);
            loop {
                read_line(reader, &mut line_buf, line_max_len).await?;
                let chunk = HttpChunkedLine::parse(&line_buf)
                    .map_err(|_| HttpBodyTransferError::InvalidChunked("invalid chunk size line"))?;
                if chunk.chunk_size == 0 {
                    break;
                }
                if body.len() as u64 + chunk.chunk_size > max_size as u64 {
                    return Err(HttpBodyTransferError::TooLarge(max_size));
                }
                copy_exact(reader, &mut body, chunk.chunk_size).await?;
                read_line(reader, &mut line_buf, line_max_len).await?;
                if line_buf.as_slice() != b"\r\n" && line_buf.as_slice() != b"\n" {
                    return Err(HttpBodyTransferError::InvalidChunked("no chunk data end"));
                }
            }
            loop {
                read_line(reader, &mut line_buf, line_max_len).await?;
                if line_buf.as_slice() == b"\r\n" || line_buf.as_slice() == b"\n" {
                    break;
                }
            }
        }
        HttpBodyType::ReadUntilEnd => {
            let mut limited = (&mut *reader).take(max_size as u64 + 1);
            limited
                .read_to_end(&mut body)
                .await
                .map_err(HttpBodyTransferError::ReadFailed)?;
            if body.len() > max_size {
                return Err(HttpBodyTransferError::TooLarge(max_size));
            }
        }
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn content_length() {
        let stream = tokio_test::io::Builder::new()
            .read(b"hello")
            .read(b" world, next")
            .build();
        let mut reader = BufReader::new(stream);
        let mut out = Vec::new();
        let nw = copy_body(&mut reader, &mut out, HttpBodyType::ContentLength(11), 1024)
            .await
            .unwrap();
        assert_eq!(nw, 11);
        assert_eq!(out.as_slice(), b"hello world");
    }

    #[tokio::test]
    async fn content_length_closed() {
        let stream = tokio_test::io::Builder::new().read(b"hello").build();
        let mut reader = BufReader::new(stream);
        let mut out = Vec::new();
        let r = copy_body(&mut reader, &mut out, HttpBodyType::ContentLength(11), 1024).await;
        assert!(matches!(r, Err(HttpBodyTransferError::ReaderClosed)));
    }

    #[tokio::test]
    async fn chunked() {
        let body = b"5\r\nhello\r\n6; ext=1\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let stream = tokio_test::io::Builder::new()
            .read(&body[..9])
            .read(&body[9..])
            .build();
        let mut reader = BufReader::new(stream);
        let mut out = Vec::new();
        let nw = copy_body(&mut reader, &mut out, HttpBodyType::Chunked, 1024)
            .await
            .unwrap();
        assert_eq!(nw, body.len() as u64);
        assert_eq!(out.as_slice(), body);
    }

    #[tokio::test]
    async fn chunked_invalid() {
        let stream = tokio_test::io::Builder::new()
            .read(b"5\r\nhelloXX0\r\n\r\n")
            .build();
        let mut reader = BufReader::new(stream);
        let mut out = Vec::new();
        let r = copy_body(&mut reader, &mut out, HttpBodyType::Chunked, 1024).await;
        assert!(matches!(r, Err(HttpBodyTransferError::InvalidChunked(_))));
    }

    #[tokio::test]
    async fn until_end() {
        let stream = tokio_test::io::Builder::new()
            .read(b"abc")
            .read(b"def")
            .build();
        let mut reader = BufReader::new(stream);
        let mut out = Vec::new();
        let nw = copy_body(&mut reader, &mut out, HttpBodyType::ReadUntilEnd, 1024)
            .await
            .unwrap();
        assert_eq!(nw, 6);
        assert_eq!(out.as_slice(), b"abcdef");
    }

    #[tokio::test]
    async fn read_chunked_body() {
        let body = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let stream = tokio_test::io::Builder::new().read(body).build();
        let mut reader = BufReader::new(stream);
        let data = read_body(&mut reader, HttpBodyType::Chunked, 1024, 4096)
            .await
            .unwrap();
        assert_eq!(data.as_slice(), b"hello world");
    }

    #[tokio::test]
    async fn read_too_large_body() {
        let stream = tokio_test::io::Builder::new().build();
        let mut reader = BufReader::new(stream);
        let r = read_body(&mut reader, HttpBodyType::ContentLength(100), 1024, 10).await;
        assert!(matches!(r, Err(HttpBodyTransferError::TooLarge(10))));
    }
}
