/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use foldhash::fast::FixedState;
use log::debug;

use super::{
    ConnectMode, ControlError, ControlPlane, ProjectStatus, ProjectToConnect, ProxyMetricsAdd,
    ProxyToConnect,
};
use crate::config::StaticProjectConfig;

struct StaticProject {
    token: String,
    project: ProjectToConnect,
    status: Mutex<ProjectStatus>,
    proxies: Vec<ProxyToConnect>,
    next: AtomicUsize,
}

impl StaticProject {
    fn next_proxy(&self, proxyname: Option<&str>) -> Option<&ProxyToConnect> {
        if let Some(name) = proxyname {
            if let Some(proxy) = self.proxies.iter().find(|p| p.id == name) {
                return Some(proxy);
            }
        }
        if self.proxies.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        self.proxies.get(i)
    }
}

/// Control plane served from the config file.
///
/// Proxies are picked in round-robin order, and metrics are kept in memory.
pub(crate) struct StaticControlPlane {
    projects: Vec<StaticProject>,
    scaled_up: Mutex<Vec<String>>,
    metrics: Mutex<HashMap<String, ProxyMetricsAdd, FixedState>>,
}

impl StaticControlPlane {
    pub(crate) fn new(config: &[StaticProjectConfig]) -> Self {
        let projects = config
            .iter()
            .map(|c| StaticProject {
                token: c.token.clone(),
                project: c.project.clone(),
                status: Mutex::new(c.project.status),
                proxies: c.proxies.clone(),
                next: AtomicUsize::new(0),
            })
            .collect();
        StaticControlPlane {
            projects,
            scaled_up: Mutex::new(Vec::new()),
            metrics: Mutex::new(HashMap::with_hasher(FixedState::default())),
        }
    }

    fn find_project(&self, project_id: &str) -> Option<&StaticProject> {
        self.projects.iter().find(|p| p.project.id == project_id)
    }

    #[cfg(test)]
    pub(crate) fn scaled_up_projects(&self) -> Vec<String> {
        self.scaled_up
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Metrics received so far, summed up per proxy.
    #[cfg(test)]
    pub(crate) fn received_metrics(&self) -> Vec<ProxyMetricsAdd> {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ControlPlane for StaticControlPlane {
    async fn get_project_to_connect(
        &self,
        token: &str,
        mode: ConnectMode,
        _certificate_hostname: Option<&str>,
    ) -> Result<ProjectToConnect, ControlError> {
        let Some(p) = self.projects.iter().find(|p| p.token == token) else {
            return Err(ControlError::Rejected(
                "Cannot find project with this token".to_string(),
            ));
        };
        let mut project = p.project.clone();
        project.status = *p.status.lock().unwrap_or_else(PoisonError::into_inner);
        if mode == ConnectMode::Tunnel {
            project.certificate = None;
        }
        Ok(project)
    }

    async fn get_next_proxy_to_connect(
        &self,
        project_id: &str,
        proxyname: Option<&str>,
    ) -> Result<ProxyToConnect, ControlError> {
        self.find_project(project_id)
            .and_then(|p| p.next_proxy(proxyname))
            .cloned()
            .ok_or_else(|| ControlError::Rejected("No proxy online".to_string()))
    }

    async fn scale_up_project(&self, project_id: &str) -> Result<(), ControlError> {
        let Some(p) = self.find_project(project_id) else {
            return Err(ControlError::Rejected(format!(
                "Cannot find project {project_id}"
            )));
        };
        let mut status = p.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == ProjectStatus::Calm {
            *status = ProjectStatus::Hot;
            self.scaled_up
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(project_id.to_string());
        }
        drop(status);
        debug!("project {project_id} scaled up");
        Ok(())
    }

    async fn add_proxies_metrics(&self, metrics: Vec<ProxyMetricsAdd>) -> Result<(), ControlError> {
        let mut received = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        for m in metrics {
            let v = received.entry(m.id.clone()).or_insert_with(|| ProxyMetricsAdd {
                id: m.id.clone(),
                project_id: m.project_id.clone(),
                connector_id: m.connector_id.clone(),
                ..Default::default()
            });
            v.requests += m.requests;
            v.requests_valid += m.requests_valid;
            v.requests_invalid += m.requests_invalid;
            v.bytes_received += m.bytes_received;
            v.bytes_sent += m.bytes_sent;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(key: &str) -> ProxyToConnect {
        ProxyToConnect {
            id: format!("c1:{key}"),
            transport_type: "proxy".to_string(),
            project_id: "p1".to_string(),
            connector_id: "c1".to_string(),
            key: key.to_string(),
            config: serde_json::Value::Null,
            useragent: String::new(),
            timeout_disconnected: 10_000,
        }
    }

    fn control(proxies: Vec<ProxyToConnect>) -> StaticControlPlane {
        StaticControlPlane::new(&[StaticProjectConfig {
            token: "token".to_string(),
            project: ProjectToConnect {
                id: "p1".to_string(),
                status: ProjectStatus::Calm,
                certificate: None,
                cookie_session: false,
                useragent_override: false,
                auto_scale_up: true,
            },
            proxies,
        }])
    }

    #[tokio::test]
    async fn project_by_token() {
        let control = control(vec![]);
        let project = control
            .get_project_to_connect("token", ConnectMode::Auto, None)
            .await
            .unwrap();
        assert_eq!(project.id, "p1");
        assert!(
            control
                .get_project_to_connect("other", ConnectMode::Auto, None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn round_robin_with_affinity() {
        let control = control(vec![proxy("k1"), proxy("k2")]);
        let a = control.get_next_proxy_to_connect("p1", None).await.unwrap();
        let b = control.get_next_proxy_to_connect("p1", None).await.unwrap();
        assert_ne!(a.id, b.id);
        for _ in 0..3 {
            let p = control
                .get_next_proxy_to_connect("p1", Some("c1:k2"))
                .await
                .unwrap();
            assert_eq!(p.id, "c1:k2");
        }
        let p = control
            .get_next_proxy_to_connect("p1", Some("c1:gone"))
            .await
            .unwrap();
        assert_ne!(p.id, "c1:gone");
    }

    #[tokio::test]
    async fn no_proxy() {
        let control = control(vec![]);
        let e = control.get_next_proxy_to_connect("p1", None).await.unwrap_err();
        assert!(matches!(e, ControlError::Rejected(_)));
    }

    #[tokio::test]
    async fn scale_up() {
        let control = control(vec![]);
        control.scale_up_project("p1").await.unwrap();
        assert_eq!(control.scaled_up_projects(), vec!["p1".to_string()]);
        let project = control
            .get_project_to_connect("token", ConnectMode::Auto, None)
            .await
            .unwrap();
        assert_eq!(project.status, ProjectStatus::Hot);
    }

    #[tokio::test]
    async fn metrics() {
        let control = control(vec![]);
        let m = ProxyMetricsAdd {
            id: "c1:k1".to_string(),
            requests: 1,
            bytes_sent: 10,
            ..Default::default()
        };
        control.add_proxies_metrics(vec![m.clone()]).await.unwrap();
        control.add_proxies_metrics(vec![m]).await.unwrap();
        let received = control.received_metrics();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].requests, 2);
        assert_eq!(received[0].bytes_sent, 20);
    }
}
