/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{self, IoSlice};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub(crate) trait StreamReadStats {
    fn add_read_bytes(&self, size: usize);
}

pub(crate) trait StreamWriteStats {
    fn add_write_bytes(&self, size: usize);
}

pub(crate) type ArcStreamReadStats = Arc<dyn StreamReadStats + Send + Sync>;
pub(crate) type ArcStreamWriteStats = Arc<dyn StreamWriteStats + Send + Sync>;

pin_project! {
    /// Report every byte read from the inner reader.
    pub(crate) struct CountingReader<R> {
        #[pin]
        inner: R,
        stats: ArcStreamReadStats,
    }
}

impl<R> CountingReader<R> {
    pub(crate) fn new(inner: R, stats: ArcStreamReadStats) -> Self {
        CountingReader { inner, stats }
    }
}

impl<R: AsyncRead> AsyncRead for CountingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        let nr = buf.filled().len() - before;
        if nr > 0 {
            this.stats.add_read_bytes(nr);
        }
        Poll::Ready(Ok(()))
    }
}

pin_project! {
    /// Report every byte written to the inner writer.
    pub(crate) struct CountingWriter<W> {
        #[pin]
        inner: W,
        stats: ArcStreamWriteStats,
    }
}

impl<W> CountingWriter<W> {
    pub(crate) fn new(inner: W, stats: ArcStreamWriteStats) -> Self {
        CountingWriter { inner, stats }
    }
}

impl<W: AsyncWrite> AsyncWrite for CountingWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let nw = ready!(this.inner.poll_write(cx, buf))?;
        this.stats.add_write_bytes(nw);
        Poll::Ready(Ok(nw))
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let nw = ready!(this.inner.poll_write_vectored(cx, bufs))?;
        this.stats.add_write_bytes(nw);
        Poll::Ready(Ok(nw))
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct Counter {
        read: AtomicUsize,
        write: AtomicUsize,
    }

    impl StreamReadStats for Counter {
        fn add_read_bytes(&self, size: usize) {
            self.read.fetch_add(size, Ordering::Relaxed);
        }
    }

    impl StreamWriteStats for Counter {
        fn add_write_bytes(&self, size: usize) {
            self.write.fetch_add(size, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn count() {
        let counter = Arc::new(Counter::default());

        let stream = tokio_test::io::Builder::new()
            .read(b"abc")
            .read(b"de")
            .build();
        let mut reader = CountingReader::new(stream, counter.clone());
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(counter.read.load(Ordering::Relaxed), 5);

        let stream = tokio_test::io::Builder::new().write(b"hello").build();
        let mut writer = CountingWriter::new(stream, counter.clone());
        writer.write_all(b"hello").await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(counter.write.load(Ordering::Relaxed), 5);
    }
}
