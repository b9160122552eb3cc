/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use foldhash::fast::FixedState;

use crate::control::{ProxyMetricsAdd, ProxyToConnect};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct MetricsDelta {
    pub(crate) requests: u64,
    pub(crate) requests_valid: u64,
    pub(crate) requests_invalid: u64,
    pub(crate) bytes_received: u64,
    pub(crate) bytes_sent: u64,
}

impl MetricsDelta {
    fn add_to(&self, m: &mut ProxyMetricsAdd) {
        m.requests += self.requests;
        m.requests_valid += self.requests_valid;
        m.requests_invalid += self.requests_invalid;
        m.bytes_received += self.bytes_received;
        m.bytes_sent += self.bytes_sent;
    }
}

/// Per proxy accumulators, drained on every flush.
#[derive(Default)]
pub(crate) struct ProxyMetricsStore {
    inner: Mutex<HashMap<String, ProxyMetricsAdd, FixedState>>,
}

pub(crate) type ArcProxyMetricsStore = Arc<ProxyMetricsStore>;

impl ProxyMetricsStore {
    pub(crate) fn new() -> Self {
        ProxyMetricsStore::default()
    }

    pub(crate) fn record(&self, proxy: &ProxyToConnect, delta: MetricsDelta) {
        let mut ht = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match ht.get_mut(&proxy.id) {
            Some(m) => delta.add_to(m),
            None => {
                let mut m = ProxyMetricsAdd {
                    id: proxy.id.clone(),
                    project_id: proxy.project_id.clone(),
                    connector_id: proxy.connector_id.clone(),
                    ..Default::default()
                };
                delta.add_to(&mut m);
                ht.insert(proxy.id.clone(), m);
            }
        }
    }

    /// Take all accumulators out, only the non empty ones are returned.
    pub(crate) fn drain_all(&self) -> Vec<ProxyMetricsAdd> {
        let ht = {
            let mut ht = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            mem::take(&mut *ht)
        };
        ht.into_values().filter(|m| !m.is_empty()).collect()
    }
}
