/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod jwt;
pub(crate) use jwt::JwtSigner;

mod client;
pub(crate) use client::HttpControlPlane;

mod memory;
pub(crate) use memory::StaticControlPlane;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum ProjectStatus {
    Off,
    Calm,
    Hot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ConnectMode {
    Tunnel,
    Mitm,
    Auto,
}

impl ConnectMode {
    pub(crate) fn from_header(value: Option<&str>) -> Self {
        match value.map(|v| v.trim()) {
            Some(v) if v.eq_ignore_ascii_case("tunnel") => ConnectMode::Tunnel,
            Some(v) if v.eq_ignore_ascii_case("mitm") => ConnectMode::Mitm,
            _ => ConnectMode::Auto,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Certificate {
    pub(crate) cert: String,
    pub(crate) key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProjectToConnect {
    pub(crate) id: String,
    pub(crate) status: ProjectStatus,
    #[serde(default)]
    pub(crate) certificate: Option<Certificate>,
    #[serde(default)]
    pub(crate) cookie_session: bool,
    #[serde(default)]
    pub(crate) useragent_override: bool,
    #[serde(default)]
    pub(crate) auto_scale_up: bool,
}

const DEFAULT_TIMEOUT_DISCONNECTED: u64 = 10_000;

fn default_timeout_disconnected() -> u64 {
    DEFAULT_TIMEOUT_DISCONNECTED
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProxyToConnect {
    pub(crate) id: String,
    #[serde(rename = "type")]
    pub(crate) transport_type: String,
    pub(crate) project_id: String,
    pub(crate) connector_id: String,
    #[serde(default)]
    pub(crate) key: String,
    #[serde(default)]
    pub(crate) config: serde_json::Value,
    #[serde(default)]
    pub(crate) useragent: String,
    /// Client side inactivity in milliseconds before a tunnel is closed
    #[serde(default = "default_timeout_disconnected")]
    pub(crate) timeout_disconnected: u64,
}

impl ProxyToConnect {
    /// The connect and idle timeout of the proxy, 0 means no timeout.
    pub(crate) fn timeout_disconnected(&self) -> Option<Duration> {
        if self.timeout_disconnected == 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_disconnected))
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProxyMetricsAdd {
    pub(crate) id: String,
    pub(crate) project_id: String,
    pub(crate) connector_id: String,
    pub(crate) requests: u64,
    pub(crate) requests_valid: u64,
    pub(crate) requests_invalid: u64,
    pub(crate) bytes_received: u64,
    pub(crate) bytes_sent: u64,
}

impl ProxyMetricsAdd {
    pub(crate) fn is_empty(&self) -> bool {
        self.requests == 0
            && self.requests_valid == 0
            && self.requests_invalid == 0
            && self.bytes_received == 0
            && self.bytes_sent == 0
    }
}

#[derive(Debug, Error)]
pub(crate) enum ControlError {
    #[error("{0}")]
    Rejected(String),
    #[error("invalid control url: {0}")]
    InvalidUrl(String),
    #[error("connect to control plane failed: {0}")]
    ConnectFailed(String),
    #[error("control plane request failed: {0}")]
    RequestFailed(String),
    #[error("invalid response from control plane: {0}")]
    InvalidResponse(String),
    #[error("control plane timed out")]
    Timeout,
}

/// The service of record for projects, proxies and metrics.
#[async_trait]
pub(crate) trait ControlPlane {
    async fn get_project_to_connect(
        &self,
        token: &str,
        mode: ConnectMode,
        certificate_hostname: Option<&str>,
    ) -> Result<ProjectToConnect, ControlError>;

    async fn get_next_proxy_to_connect(
        &self,
        project_id: &str,
        proxyname: Option<&str>,
    ) -> Result<ProxyToConnect, ControlError>;

    async fn scale_up_project(&self, project_id: &str) -> Result<(), ControlError>;

    async fn add_proxies_metrics(&self, metrics: Vec<ProxyMetricsAdd>) -> Result<(), ControlError>;
}

pub(crate) type ArcControlPlane = Arc<dyn ControlPlane + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_mode() {
        assert_eq!(ConnectMode::from_header(Some("tunnel")), ConnectMode::Tunnel);
        assert_eq!(ConnectMode::from_header(Some("MITM")), ConnectMode::Mitm);
        assert_eq!(ConnectMode::from_header(Some("other")), ConnectMode::Auto);
        assert_eq!(ConnectMode::from_header(None), ConnectMode::Auto);
        assert_eq!(
            serde_json::to_string(&ConnectMode::Tunnel).unwrap(),
            "\"tunnel\""
        );
    }

    #[test]
    fn decode_project() {
        let s = r#"{"id":"p1","status":"CALM","certificate":null,"cookieSession":true,
            "useragentOverride":false,"autoScaleUp":true}"#;
        let project: ProjectToConnect = serde_json::from_str(s).unwrap();
        assert_eq!(project.id, "p1");
        assert_eq!(project.status, ProjectStatus::Calm);
        assert!(project.certificate.is_none());
        assert!(project.cookie_session);
        assert!(project.auto_scale_up);
    }

    #[test]
    fn decode_proxy() {
        let s = r#"{"id":"c1:k1","type":"proxy","projectId":"p1","connectorId":"c1",
            "key":"k1","config":{"address":{"hostname":"127.0.0.1","port":3128}},
            "useragent":"ua"}"#;
        let proxy: ProxyToConnect = serde_json::from_str(s).unwrap();
        assert_eq!(proxy.transport_type, "proxy");
        assert_eq!(proxy.timeout_disconnected(), Some(Duration::from_secs(10)));
        assert_eq!(proxy.config["address"]["port"], 3128);
    }

    #[test]
    fn zero_timeout_disconnected() {
        let s = r#"{"id":"c1:k1","type":"datacenter","projectId":"p1","connectorId":"c1",
            "key":"k1","config":{},"useragent":"","timeoutDisconnected":0}"#;
        let proxy: ProxyToConnect = serde_json::from_str(s).unwrap();
        assert_eq!(proxy.timeout_disconnected, 0);
        assert!(proxy.timeout_disconnected().is_none());
    }

    #[test]
    fn encode_metrics() {
        let m = ProxyMetricsAdd {
            id: "c1:k1".to_string(),
            project_id: "p1".to_string(),
            connector_id: "c1".to_string(),
            requests: 1,
            requests_valid: 1,
            requests_invalid: 0,
            bytes_received: 10,
            bytes_sent: 20,
        };
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["projectId"], "p1");
        assert_eq!(v["bytesReceived"], 10);
        assert_eq!(v["requestsValid"], 1);
        assert!(!m.is_empty());
        assert!(ProxyMetricsAdd::default().is_empty());
    }
}
