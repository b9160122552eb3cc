/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

pub(crate) const DEFAULT_COPY_BUFFER_SIZE: usize = 16 * 1024; // 16KB
const DEFAULT_COPY_YIELD_SIZE: usize = 1024 * 1024; // 1MB

#[derive(Error, Debug)]
pub(crate) enum StreamCopyError {
    #[error("read failed: {0:?}")]
    ReadFailed(io::Error),
    #[error("write failed: {0:?}")]
    WriteFailed(io::Error),
}

/// Copy all data from `reader` to `writer` with a fixed buffer.
///
/// The `active` flag is set whenever data moves, so the caller can do idle checks.
pub(crate) struct StreamCopy<'a, R: ?Sized, W: ?Sized> {
    reader: &'a mut R,
    writer: &'a mut W,
    buf: Box<[u8]>,
    r_off: usize,
    w_off: usize,
    read_done: bool,
    need_flush: bool,
    active: bool,
    total_write: u64,
}

impl<'a, R, W> StreamCopy<'a, R, W>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    pub(crate) fn new(reader: &'a mut R, writer: &'a mut W, buffer_size: usize) -> Self {
        StreamCopy {
            reader,
            writer,
            buf: vec![0; buffer_size].into_boxed_slice(),
            r_off: 0,
            w_off: 0,
            read_done: false,
            need_flush: false,
            active: false,
            total_write: 0,
        }
    }

    pub(crate) fn writer(&mut self) -> &mut W {
        self.writer
    }

    #[inline]
    pub(crate) fn copied_size(&self) -> u64 {
        self.total_write
    }

    #[inline]
    pub(crate) fn is_idle(&self) -> bool {
        !self.active
    }

    #[inline]
    pub(crate) fn reset_active(&mut self) {
        self.active = false;
    }

    /// Write out the cached data, used when the other direction failed.
    pub(crate) async fn write_flush(&mut self) -> Result<(), StreamCopyError> {
        if self.w_off < self.r_off {
            self.writer
                .write_all(&self.buf[self.w_off..self.r_off])
                .await
                .map_err(StreamCopyError::WriteFailed)?;
            self.total_write += (self.r_off - self.w_off) as u64;
            self.w_off = self.r_off;
            self.writer
                .flush()
                .await
                .map_err(StreamCopyError::WriteFailed)?;
        }
        Ok(())
    }

    fn poll_fill_buf(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut read_buf = ReadBuf::new(&mut self.buf[self.r_off..]);
        ready!(Pin::new(&mut *self.reader).poll_read(cx, &mut read_buf))?;
        let nr = read_buf.filled().len();
        if nr == 0 {
            self.read_done = true;
        } else {
            self.r_off += nr;
            self.active = true;
        }
        Poll::Ready(Ok(()))
    }

    fn poll_copy(&mut self, cx: &mut Context<'_>) -> Poll<Result<u64, StreamCopyError>> {
        let mut copy_this_round = 0usize;
        loop {
            if !self.read_done {
                if self.w_off == self.r_off {
                    self.w_off = 0;
                    self.r_off = 0;
                } else if self.w_off > 0 && self.r_off == self.buf.len() {
                    self.buf.copy_within(self.w_off..self.r_off, 0);
                    self.r_off -= self.w_off;
                    self.w_off = 0;
                }

                if self.r_off < self.buf.len() {
                    match self.poll_fill_buf(cx) {
                        Poll::Ready(Ok(_)) => {}
                        Poll::Ready(Err(e)) => {
                            return Poll::Ready(Err(StreamCopyError::ReadFailed(e)));
                        }
                        Poll::Pending => {
                            if self.w_off >= self.r_off {
                                if self.need_flush {
                                    self.need_flush = false;
                                    ready!(Pin::new(&mut *self.writer).poll_flush(cx))
                                        .map_err(StreamCopyError::WriteFailed)?;
                                }
                                return Poll::Pending;
                            }
                        }
                    }
                }
            }

            while self.w_off < self.r_off {
                let n = ready!(
                    Pin::new(&mut *self.writer).poll_write(cx, &self.buf[self.w_off..self.r_off])
                )
                .map_err(StreamCopyError::WriteFailed)?;
                if n == 0 {
                    return Poll::Ready(Err(StreamCopyError::WriteFailed(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write zero byte into writer",
                    ))));
                }
                self.w_off += n;
                self.total_write += n as u64;
                self.need_flush = true;
                self.active = true;
                copy_this_round += n;
            }

            if self.read_done {
                if self.need_flush {
                    ready!(Pin::new(&mut *self.writer).poll_flush(cx))
                        .map_err(StreamCopyError::WriteFailed)?;
                    self.need_flush = false;
                }
                return Poll::Ready(Ok(self.total_write));
            }

            // yield if we have copied too much
            if copy_this_round >= DEFAULT_COPY_YIELD_SIZE {
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
        }
    }
}

impl<R, W> Future for StreamCopy<'_, R, W>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    type Output = Result<u64, StreamCopyError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.poll_copy(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_all() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"hello ")
            .read(b"world")
            .build();
        let mut writer = tokio_test::io::Builder::new()
            .write(b"hello ")
            .write(b"world")
            .build();
        let copy = StreamCopy::new(&mut reader, &mut writer, 1024);
        assert_eq!(copy.await.unwrap(), 11);
    }

    #[tokio::test]
    async fn small_buffer() {
        let mut reader = tokio_test::io::Builder::new().read(b"abcdef").build();
        let mut writer = Vec::new();
        let copy = StreamCopy::new(&mut reader, &mut writer, 4);
        assert_eq!(copy.await.unwrap(), 6);
        assert_eq!(writer.as_slice(), b"abcdef");
    }
}
