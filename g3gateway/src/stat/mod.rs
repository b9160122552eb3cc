/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::control::ArcControlPlane;

mod store;
pub(crate) use store::{ArcProxyMetricsStore, MetricsDelta, ProxyMetricsStore};

mod connection;
pub(crate) use connection::ConnectionMetrics;

async fn flush_once(store: &ProxyMetricsStore, control: &ArcControlPlane) {
    let batch = store.drain_all();
    if batch.is_empty() {
        return;
    }
    let count = batch.len();
    match control.add_proxies_metrics(batch).await {
        Ok(_) => debug!("sent metrics for {count} proxies"),
        Err(e) => warn!("failed to send metrics for {count} proxies: {e}"),
    }
}

/// Periodically move the collected proxy metrics to the control plane.
///
/// A last flush is done after `quit` is cancelled.
pub(crate) fn spawn_flush_task(
    store: ArcProxyMetricsStore,
    control: ArcControlPlane,
    interval: Duration,
    quit: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                biased;

                _ = quit.cancelled() => break,
                _ = interval.tick() => flush_once(&store, &control).await,
            }
        }
        flush_once(&store, &control).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticProjectConfig;
    use crate::control::{ProjectStatus, ProjectToConnect, ProxyToConnect, StaticControlPlane};
    use std::sync::Arc;

    fn static_control() -> Arc<StaticControlPlane> {
        Arc::new(StaticControlPlane::new(&[StaticProjectConfig {
            token: "dXNlcjpwYXNz".to_string(),
            project: ProjectToConnect {
                id: "p1".to_string(),
                status: ProjectStatus::Calm,
                certificate: None,
                cookie_session: false,
                useragent_override: false,
                auto_scale_up: false,
            },
            proxies: vec![proxy()],
        }]))
    }

    fn proxy() -> ProxyToConnect {
        ProxyToConnect {
            id: "c1:k1".to_string(),
            transport_type: "proxy".to_string(),
            project_id: "p1".to_string(),
            connector_id: "c1".to_string(),
            key: "k1".to_string(),
            config: serde_json::Value::Null,
            useragent: String::new(),
            timeout_disconnected: 10_000,
        }
    }

    #[tokio::test]
    async fn flush_on_quit() {
        let control = static_control();
        let store = Arc::new(ProxyMetricsStore::new());
        let quit = CancellationToken::new();
        let handle = spawn_flush_task(
            store.clone(),
            control.clone(),
            Duration::from_secs(3600),
            quit.clone(),
        );

        let metrics = ConnectionMetrics::new(store.clone(), &proxy());
        metrics.set_status(200);
        metrics.add_sent(10);
        drop(metrics);

        quit.cancel();
        handle.await.unwrap();

        let received = control.received_metrics();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].requests, 1);
        assert_eq!(received[0].requests_valid, 1);
        assert_eq!(received[0].bytes_sent, 10);
        assert!(store.drain_all().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_flush() {
        let control = static_control();
        let store = Arc::new(ProxyMetricsStore::new());
        let quit = CancellationToken::new();
        let handle = spawn_flush_task(
            store.clone(),
            control.clone(),
            Duration::from_secs(1),
            quit.clone(),
        );

        drop(ConnectionMetrics::new(store.clone(), &proxy()));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(control.received_metrics().len(), 1);

        quit.cancel();
        handle.await.unwrap();
        assert_eq!(control.received_metrics().len(), 1);
    }
}
