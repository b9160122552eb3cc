/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;

use super::{DEFAULT_COPY_BUFFER_SIZE, StreamCopy, StreamCopyError};

#[derive(Debug, Error)]
pub(crate) enum RelayError {
    #[error("client read failed: {0:?}")]
    ClientReadFailed(io::Error),
    #[error("client write failed: {0:?}")]
    ClientWriteFailed(io::Error),
    #[error("upstream read failed: {0:?}")]
    UpstreamReadFailed(io::Error),
    #[error("upstream write failed: {0:?}")]
    UpstreamWriteFailed(io::Error),
    #[error("idle for {0:?}")]
    Idle(Duration),
    #[error("canceled")]
    Canceled,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RelayStats {
    pub(crate) client_to_upstream: u64,
    pub(crate) upstream_to_client: u64,
}

/// Ticks once per idle period, never ticks when there is no idle timeout.
struct IdleTimer {
    timeout: Duration,
    interval: Option<Interval>,
}

impl IdleTimer {
    fn new(idle_timeout: Option<Duration>) -> Self {
        let interval = idle_timeout.map(|timeout| {
            let period = timeout.max(Duration::from_millis(1));
            tokio::time::interval_at(Instant::now() + period, period)
        });
        IdleTimer {
            timeout: idle_timeout.unwrap_or_default(),
            interval,
        }
    }

    async fn tick(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

/// Relay data in both directions until both sides reach EOF.
///
/// When one direction ends, the peer writer is shut down and the other one keeps running.
/// The relay is stopped if no data moved in either direction for a whole `idle_timeout`
/// period, or when `cancel` is triggered. No idle check is done if `idle_timeout` is `None`.
pub(crate) async fn relay<CR, CW, UR, UW>(
    clt_r: &mut CR,
    clt_w: &mut CW,
    ups_r: &mut UR,
    ups_w: &mut UW,
    idle_timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<RelayStats, RelayError>
where
    CR: AsyncRead + Unpin + ?Sized,
    CW: AsyncWrite + Unpin + ?Sized,
    UR: AsyncRead + Unpin + ?Sized,
    UW: AsyncWrite + Unpin + ?Sized,
{
    let mut clt_to_ups = StreamCopy::new(clt_r, ups_w, DEFAULT_COPY_BUFFER_SIZE);
    let mut ups_to_clt = StreamCopy::new(ups_r, clt_w, DEFAULT_COPY_BUFFER_SIZE);
    let mut idle_timer = IdleTimer::new(idle_timeout);

    loop {
        tokio::select! {
            r = &mut clt_to_ups => {
                return match r {
                    Ok(_) => {
                        let _ = clt_to_ups.writer().shutdown().await;
                        let mut stats = RelayStats {
                            client_to_upstream: clt_to_ups.copied_size(),
                            upstream_to_client: 0,
                        };
                        stats.upstream_to_client =
                            relay_one_side(ups_to_clt, idle_timer, cancel, false).await?;
                        Ok(stats)
                    }
                    Err(StreamCopyError::ReadFailed(e)) => Err(RelayError::ClientReadFailed(e)),
                    Err(StreamCopyError::WriteFailed(e)) => {
                        let _ = ups_to_clt.write_flush().await;
                        Err(RelayError::UpstreamWriteFailed(e))
                    }
                };
            }
            r = &mut ups_to_clt => {
                return match r {
                    Ok(_) => {
                        let _ = ups_to_clt.writer().shutdown().await;
                        let mut stats = RelayStats {
                            client_to_upstream: 0,
                            upstream_to_client: ups_to_clt.copied_size(),
                        };
                        stats.client_to_upstream =
                            relay_one_side(clt_to_ups, idle_timer, cancel, true).await?;
                        Ok(stats)
                    }
                    Err(StreamCopyError::ReadFailed(e)) => Err(RelayError::UpstreamReadFailed(e)),
                    Err(StreamCopyError::WriteFailed(e)) => {
                        let _ = clt_to_ups.write_flush().await;
                        Err(RelayError::ClientWriteFailed(e))
                    }
                };
            }
            _ = idle_timer.tick() => {
                if clt_to_ups.is_idle() && ups_to_clt.is_idle() {
                    return Err(RelayError::Idle(idle_timer.timeout));
                }
                clt_to_ups.reset_active();
                ups_to_clt.reset_active();
            }
            _ = cancel.cancelled() => {
                return Err(RelayError::Canceled);
            }
        }
    }
}

async fn relay_one_side<R, W>(
    mut copy: StreamCopy<'_, R, W>,
    mut idle_timer: IdleTimer,
    cancel: &CancellationToken,
    from_client: bool,
) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        tokio::select! {
            r = &mut copy => {
                return match r {
                    Ok(n) => {
                        let _ = copy.writer().shutdown().await;
                        Ok(n)
                    }
                    Err(StreamCopyError::ReadFailed(e)) => if from_client {
                        Err(RelayError::ClientReadFailed(e))
                    } else {
                        Err(RelayError::UpstreamReadFailed(e))
                    },
                    Err(StreamCopyError::WriteFailed(e)) => if from_client {
                        Err(RelayError::UpstreamWriteFailed(e))
                    } else {
                        Err(RelayError::ClientWriteFailed(e))
                    },
                };
            }
            _ = idle_timer.tick() => {
                if copy.is_idle() {
                    return Err(RelayError::Idle(idle_timer.timeout));
                }
                copy.reset_active();
            }
            _ = cancel.cancelled() => {
                return Err(RelayError::Canceled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    #[tokio::test]
    async fn relay_both_directions() {
        let (mut client, gw_client) = duplex(1024);
        let (gw_upstream, mut upstream) = duplex(1024);

        let task = tokio::spawn(async move {
            let (mut clt_r, mut clt_w) = tokio::io::split(gw_client);
            let (mut ups_r, mut ups_w) = tokio::io::split(gw_upstream);
            let cancel = CancellationToken::new();
            relay(
                &mut clt_r,
                &mut clt_w,
                &mut ups_r,
                &mut ups_w,
                Some(Duration::from_secs(10)),
                &cancel,
            )
            .await
        });

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        upstream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        upstream.write_all(b"bye").await.unwrap();
        upstream.shutdown().await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest.as_slice(), b"bye");

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.client_to_upstream, 4);
        assert_eq!(stats.upstream_to_client, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn relay_idle() {
        let (_client, gw_client) = duplex(1024);
        let (gw_upstream, _upstream) = duplex(1024);
        let (mut clt_r, mut clt_w) = tokio::io::split(gw_client);
        let (mut ups_r, mut ups_w) = tokio::io::split(gw_upstream);
        let cancel = CancellationToken::new();
        let r = relay(
            &mut clt_r,
            &mut clt_w,
            &mut ups_r,
            &mut ups_w,
            Some(Duration::from_secs(1)),
            &cancel,
        )
        .await;
        assert!(matches!(r, Err(RelayError::Idle(_))));
    }

    #[tokio::test]
    async fn relay_canceled() {
        let (_client, gw_client) = duplex(1024);
        let (gw_upstream, _upstream) = duplex(1024);
        let (mut clt_r, mut clt_w) = tokio::io::split(gw_client);
        let (mut ups_r, mut ups_w) = tokio::io::split(gw_upstream);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let r = relay(
            &mut clt_r,
            &mut clt_w,
            &mut ups_r,
            &mut ups_w,
            Some(Duration::from_secs(10)),
            &cancel,
        )
        .await;
        assert!(matches!(r, Err(RelayError::Canceled)));
    }

    #[tokio::test(start_paused = true)]
    async fn relay_without_idle_timeout() {
        let (mut client, gw_client) = duplex(1024);
        let (gw_upstream, mut upstream) = duplex(1024);

        let task = tokio::spawn(async move {
            let (mut clt_r, mut clt_w) = tokio::io::split(gw_client);
            let (mut ups_r, mut ups_w) = tokio::io::split(gw_upstream);
            let cancel = CancellationToken::new();
            relay(&mut clt_r, &mut clt_w, &mut ups_r, &mut ups_w, None, &cancel).await
        });

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!task.is_finished());

        client.write_all(b"late").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"late");

        client.shutdown().await.unwrap();
        upstream.shutdown().await.unwrap();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.client_to_upstream, 4);
        assert_eq!(stats.upstream_to_client, 0);
    }
}
