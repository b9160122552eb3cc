/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::control::{ArcControlPlane, HttpControlPlane, StaticControlPlane};
use crate::stat::ProxyMetricsStore;

mod error;
pub(crate) use error::{
    ErrorId, ErrorScope, GatewayError, ServerTaskError, ServerTaskResult, sanitize_header_value,
    write_bad_request, write_http_error, write_socket_error,
};

mod sockets;
pub(crate) use sockets::{ArcSocketSet, SocketKind, SocketSet, TrackedSocket};

mod task;
pub(crate) use task::ServerTaskNotes;

mod server;
pub(crate) use server::{GatewayServer, ServerContext};


fn build_control_plane(config: &GatewayConfig) -> anyhow::Result<ArcControlPlane> {
    match &config.control {
        Some(control) => {
            info!("using control plane at {}", control.url);
            let client = HttpControlPlane::new(control).context("invalid control config")?;
            Ok(Arc::new(client))
        }
        None => {
            info!(
                "using {} static projects as control plane",
                config.static_projects.len()
            );
            Ok(Arc::new(StaticControlPlane::new(&config.static_projects)))
        }
    }
}

/// Run the gateway until a quit signal is received.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    crate::transport::load_default().context("failed to load transports")?;
    crate::transport::foreach(|name, _| info!("loaded transport {name}"));

    let control = build_control_plane(&config)?;
    let metrics = Arc::new(ProxyMetricsStore::new());
    let quit = CancellationToken::new();

    let flush_task = crate::stat::spawn_flush_task(
        metrics.clone(),
        control.clone(),
        config.metrics.flush_interval,
        quit.clone(),
    );

    let ctx = Arc::new(ServerContext::new(&config.server, control, metrics));
    let server = GatewayServer::bind(ctx).await?;
    info!("gateway listening on {}", server.local_addr()?);
    let server_task = tokio::spawn(server.run(quit.clone()));

    let r = crate::signal::wait_quit().await;
    info!("quitting");
    quit.cancel();

    if let Err(e) = server_task.await {
        warn!("server task failed: {e}");
    }
    if let Err(e) = flush_task.await {
        warn!("metrics flush task failed: {e}");
    }
    r
}
