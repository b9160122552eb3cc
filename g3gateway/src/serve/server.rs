/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use log::{debug, info, warn};
use slog::Logger;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use super::task::serve_client_boxed;
use super::{ArcSocketSet, SocketKind, SocketSet, TrackedSocket};
use crate::config::ServerConfig;
use crate::control::ArcControlPlane;
use crate::module::tls;
use crate::stat::ArcProxyMetricsStore;

/// Everything a connection task needs.
pub(crate) struct ServerContext {
    pub(crate) config: ServerConfig,
    pub(crate) control: ArcControlPlane,
    pub(crate) metrics: ArcProxyMetricsStore,
    pub(crate) sockets: ArcSocketSet,
    pub(crate) task_logger: Option<Logger>,
}

impl ServerContext {
    pub(crate) fn new(
        config: &ServerConfig,
        control: ArcControlPlane,
        metrics: ArcProxyMetricsStore,
    ) -> Self {
        let task_logger = if config.task_log {
            Some(crate::log::get_task_logger())
        } else {
            None
        };
        ServerContext {
            config: config.clone(),
            control,
            metrics,
            sockets: Arc::new(SocketSet::new(config.track_sockets)),
            task_logger,
        }
    }
}

pub(crate) struct GatewayServer {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
}

impl GatewayServer {
    pub(crate) async fn bind(ctx: Arc<ServerContext>) -> anyhow::Result<Self> {
        let tls_acceptor = match &ctx.config.tls {
            Some(tls_config) => {
                let server_config =
                    tls::build_server_config(&tls_config.certificate, &tls_config.private_key)
                        .context("invalid listener tls config")?;
                Some(TlsAcceptor::from(server_config))
            }
            None => None,
        };
        let listener = TcpListener::bind(ctx.config.listen)
            .await
            .context(format!("failed to listen on {}", ctx.config.listen))?;
        Ok(GatewayServer {
            ctx,
            listener,
            tls_acceptor,
        })
    }

    pub(crate) fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to get listen address")
    }

    /// Accept connections until `quit` is cancelled, then close all live sockets.
    pub(crate) async fn run(self, quit: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                _ = quit.cancelled() => break,
                r = self.listener.accept() => {
                    match r {
                        Ok((stream, peer_addr)) => self.spawn_stream_task(stream, peer_addr),
                        Err(e) => warn!("failed to accept: {e}"),
                    }
                }
            }
        }

        info!(
            "server stopped, closing {} tracked sockets",
            self.ctx.sockets.len()
        );
        self.ctx.sockets.close_all();
    }

    fn spawn_stream_task(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let ctx = Arc::clone(&self.ctx);
        let socket = ctx
            .sockets
            .track(SocketKind::Client, peer_addr.to_string());
        match &self.tls_acceptor {
            Some(acceptor) => {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    run_tls_task(ctx, acceptor, stream, peer_addr, socket).await;
                });
            }
            None => {
                tokio::spawn(serve_client_boxed(
                    ctx,
                    Box::new(stream),
                    peer_addr,
                    None,
                    socket,
                ));
            }
        }
    }
}

async fn run_tls_task(
    ctx: Arc<ServerContext>,
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer_addr: SocketAddr,
    socket: TrackedSocket,
) {
    let accept = tokio::time::timeout(ctx.config.tls_accept_timeout, acceptor.accept(stream));
    let tls_stream = tokio::select! {
        _ = socket.closed() => return,
        r = accept => match r {
            Ok(Ok(tls_stream)) => tls_stream,
            Ok(Err(e)) => {
                debug!("tls handshake with {peer_addr} failed: {e}");
                return;
            }
            Err(_) => {
                debug!("tls handshake with {peer_addr} timed out");
                return;
            }
        },
    };
    serve_client_boxed(ctx, Box::new(tls_stream), peer_addr, None, socket).await;
}
