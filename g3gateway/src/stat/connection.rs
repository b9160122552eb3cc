/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use http::HeaderMap;

use super::{ArcProxyMetricsStore, MetricsDelta};
use crate::control::ProxyToConnect;
use crate::module::stream::{
    ArcStreamReadStats, ArcStreamWriteStats, StreamReadStats, StreamWriteStats,
};

const VERDICT_NONE: u8 = 0;
const VERDICT_VALID: u8 = 1;
const VERDICT_INVALID: u8 = 2;

fn headers_size(headers: &HeaderMap) -> u64 {
    headers
        .iter()
        .map(|(name, value)| (name.as_str().len() + value.len()) as u64)
        .sum()
}

/// Traffic counters of one dispatch through one upstream proxy.
///
/// The request and the bytes are added to the store as soon as they are seen,
/// so long lived tunnels show up in every flush. The verdict is added once,
/// when the last reference is dropped. A dispatch that never saw a response
/// status is counted as invalid.
pub(crate) struct ConnectionMetrics {
    store: ArcProxyMetricsStore,
    proxy: ProxyToConnect,
    verdict: AtomicU8,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    finished: AtomicBool,
}

impl ConnectionMetrics {
    pub(crate) fn new(store: ArcProxyMetricsStore, proxy: &ProxyToConnect) -> Arc<Self> {
        store.record(
            proxy,
            MetricsDelta {
                requests: 1,
                ..Default::default()
            },
        );
        Arc::new(ConnectionMetrics {
            store,
            proxy: proxy.clone(),
            verdict: AtomicU8::new(VERDICT_NONE),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        })
    }

    pub(crate) fn add_request_head(&self, method: &str, path: &str, headers: &HeaderMap) {
        self.add_sent((method.len() + path.len()) as u64 + headers_size(headers));
    }

    pub(crate) fn add_response_head(&self, status: u16, reason: &str, headers: &HeaderMap) {
        self.add_received(reason.len() as u64 + headers_size(headers));
        self.set_status(status);
    }

    pub(crate) fn set_status(&self, status: u16) {
        let verdict = if status < 400 {
            VERDICT_VALID
        } else {
            VERDICT_INVALID
        };
        self.verdict.store(verdict, Ordering::Relaxed);
    }

    pub(crate) fn add_sent(&self, size: u64) {
        if size == 0 {
            return;
        }
        self.bytes_sent.fetch_add(size, Ordering::Relaxed);
        self.store.record(
            &self.proxy,
            MetricsDelta {
                bytes_sent: size,
                ..Default::default()
            },
        );
    }

    pub(crate) fn add_received(&self, size: u64) {
        if size == 0 {
            return;
        }
        self.bytes_received.fetch_add(size, Ordering::Relaxed);
        self.store.record(
            &self.proxy,
            MetricsDelta {
                bytes_received: size,
                ..Default::default()
            },
        );
    }

    /// Stats sinks for the upstream side of a stream.
    ///
    /// Bytes read from the upstream are received, bytes written are sent.
    pub(crate) fn upstream_pair(self: &Arc<Self>) -> (ArcStreamReadStats, ArcStreamWriteStats) {
        (
            Arc::clone(self) as ArcStreamReadStats,
            Arc::clone(self) as ArcStreamWriteStats,
        )
    }

    /// A write side sink for data relayed from the upstream to the client.
    pub(crate) fn received_writer(self: &Arc<Self>) -> ArcStreamWriteStats {
        Arc::new(ReceivedWriteStats(Arc::clone(self)))
    }

    /// Totals of this dispatch.
    pub(crate) fn snapshot(&self) -> MetricsDelta {
        let (valid, invalid) = self.verdict();
        MetricsDelta {
            requests: 1,
            requests_valid: valid,
            requests_invalid: invalid,
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }

    fn verdict(&self) -> (u64, u64) {
        match self.verdict.load(Ordering::Relaxed) {
            VERDICT_VALID => (1, 0),
            _ => (0, 1),
        }
    }

    fn finish(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let (valid, invalid) = self.verdict();
        self.store.record(
            &self.proxy,
            MetricsDelta {
                requests_valid: valid,
                requests_invalid: invalid,
                ..Default::default()
            },
        );
    }
}

impl StreamReadStats for ConnectionMetrics {
    fn add_read_bytes(&self, size: usize) {
        self.add_received(size as u64);
    }
}

impl StreamWriteStats for ConnectionMetrics {
    fn add_write_bytes(&self, size: usize) {
        self.add_sent(size as u64);
    }
}

impl Drop for ConnectionMetrics {
    fn drop(&mut self) {
        self.finish();
    }
}

struct ReceivedWriteStats(Arc<ConnectionMetrics>);

impl StreamWriteStats for ReceivedWriteStats {
    fn add_write_bytes(&self, size: usize) {
        self.0.add_received(size as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::ProxyMetricsStore;
    use http::HeaderValue;

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

    #[test]
    fn head_estimate() {
        let store = Arc::new(ProxyMetricsStore::new());
        let metrics = ConnectionMetrics::new(store.clone(), &proxy());

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("example.com"));
        metrics.add_request_head("GET", "/abc", &headers);
        assert_eq!(metrics.snapshot().bytes_sent, 3 + 4 + 4 + 11);

        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("5"));
        metrics.add_response_head(200, "OK", &headers);
        let (_, w) = metrics.upstream_pair();
        w.add_write_bytes(7);
        metrics.received_writer().add_write_bytes(5);

        let delta = metrics.snapshot();
        assert_eq!(delta.bytes_sent, 22 + 7);
        assert_eq!(delta.bytes_received, 2 + 15 + 5);

        drop(w);
        drop(metrics);
        let all = store.drain_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].requests, 1);
        assert_eq!(all[0].requests_valid, 1);
        assert_eq!(all[0].requests_invalid, 0);
        assert_eq!(all[0].bytes_sent, 29);
        assert_eq!(all[0].bytes_received, 22);
    }

    #[test]
    fn visible_before_finished() {
        let store = Arc::new(ProxyMetricsStore::new());
        let metrics = ConnectionMetrics::new(store.clone(), &proxy());
        let (r, w) = metrics.upstream_pair();
        w.add_write_bytes(4);
        r.add_read_bytes(6);

        let all = store.drain_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].requests, 1);
        assert_eq!(all[0].requests_valid + all[0].requests_invalid, 0);
        assert_eq!(all[0].bytes_sent, 4);
        assert_eq!(all[0].bytes_received, 6);

        w.add_write_bytes(1);
        let all = store.drain_all();
        assert_eq!(all[0].requests, 0);
        assert_eq!(all[0].bytes_sent, 1);

        metrics.set_status(200);
        drop((r, w));
        drop(metrics);
        let all = store.drain_all();
        assert_eq!(all[0].requests, 0);
        assert_eq!(all[0].requests_valid, 1);
        assert_eq!(all[0].bytes_sent, 0);
        assert_eq!(all[0].requests_invalid, 0);
    }

    #[test]
    fn no_status_is_invalid() {
        let store = Arc::new(ProxyMetricsStore::new());
        let metrics = ConnectionMetrics::new(store.clone(), &proxy());
        drop(metrics);
        let all = store.drain_all();
        assert_eq!(all[0].requests, 1);
        assert_eq!(all[0].requests_invalid, 1);
    }

    #[test]
    fn error_status_is_invalid() {
        let store = Arc::new(ProxyMetricsStore::new());
        let metrics = ConnectionMetrics::new(store.clone(), &proxy());
        metrics.add_response_head(503, "Service Unavailable", &HeaderMap::new());
        drop(metrics);
        let all = store.drain_all();
        assert_eq!(all[0].requests_valid, 0);
        assert_eq!(all[0].requests_invalid, 1);
    }
}
