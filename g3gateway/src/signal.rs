/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::anyhow;
use log::info;

#[cfg(unix)]
async fn wait_terminate() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term_sig = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("failed to create SIGTERM listener: {e}"))?;
    let mut quit_sig = signal(SignalKind::quit())
        .map_err(|e| anyhow!("failed to create SIGQUIT listener: {e}"))?;
    tokio::select! {
        _ = term_sig.recv() => info!("got terminate signal"),
        _ = quit_sig.recv() => info!("got quit signal"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_terminate() -> anyhow::Result<()> {
    std::future::pending().await
}

/// Wait until the process is asked to quit.
pub async fn wait_quit() -> anyhow::Result<()> {
    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.map_err(|e| anyhow!("failed to listen for ctrl-c: {e}"))?;
            info!("got interrupt signal");
            Ok(())
        }
        r = wait_terminate() => r,
    }
}
