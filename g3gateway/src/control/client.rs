/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use http::Method;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use rustls::ClientConfig;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::TlsConnector;

use super::{
    ConnectMode, ControlError, ControlPlane, JwtSigner, ProjectToConnect, ProxyMetricsAdd,
    ProxyToConnect,
};
use crate::config::ControlConfig;
use crate::module::addr::{Host, UpstreamAddr};
use crate::module::http::{HttpUpstreamResponse, read_body};
use crate::module::net::tcp_connect_to;
use crate::module::tls;

const MAX_RESPONSE_BODY_SIZE: usize = 4 * 1024 * 1024;
const BODY_LINE_MAX_LEN: usize = 1024;

enum Authorization<'a> {
    Basic(&'a str),
    Bearer,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Remote control plane reached by JSON over HTTP/1.1.
///
/// A new connection is used for every call.
pub(crate) struct HttpControlPlane {
    addr: UpstreamAddr,
    host_header: String,
    base_path: String,
    tls: Option<Arc<ClientConfig>>,
    useragent: String,
    timeout: Duration,
    max_header_size: usize,
    signer: JwtSigner,
}

impl HttpControlPlane {
    pub(crate) fn new(config: &ControlConfig) -> anyhow::Result<Self> {
        let url = &config.url;
        let host = url
            .host()
            .ok_or_else(|| anyhow!("no host found in control url"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("no port found in control url"))?;
        let addr = UpstreamAddr::new(Host::from(host.to_owned()), port);
        let host_header = match url.port() {
            Some(port) => format!("{}:{port}", addr.host_str()),
            None => addr.host_str(),
        };

        let tls = if url.scheme() == "https" {
            let config = match &config.ca_certificate {
                Some(ca) => tls::build_client_config_with_ca(ca)?,
                None => tls::build_client_config(None)?,
            };
            Some(config)
        } else {
            None
        };

        Ok(HttpControlPlane {
            addr,
            host_header,
            base_path: url.path().trim_end_matches('/').to_string(),
            tls,
            useragent: config.useragent.clone(),
            timeout: config.timeout,
            max_header_size: config.max_header_size,
            signer: JwtSigner::new(&config.jwt_secret, config.jwt_expiration),
        })
    }

    fn build_head(
        &self,
        method: &Method,
        path: &str,
        auth: Authorization<'_>,
        body_len: Option<usize>,
    ) -> Vec<u8> {
        let mut buf = Vec::<u8>::with_capacity(512);
        let _ = write!(
            buf,
            "{method} {}{path} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\n\
             Accept: application/json\r\nConnection: close\r\n",
            self.base_path, self.host_header, self.useragent
        );
        match auth {
            Authorization::Basic(token) => {
                let _ = write!(buf, "Proxy-Authorization: Basic {token}\r\n");
            }
            Authorization::Bearer => {
                let _ = write!(buf, "Authorization: Bearer {}\r\n", self.signer.sign());
            }
        }
        if let Some(len) = body_len {
            let _ = write!(
                buf,
                "Content-Type: application/json\r\nContent-Length: {len}\r\n"
            );
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }

    async fn exchange<S>(
        &self,
        mut stream: S,
        method: &Method,
        head: &[u8],
        body: &[u8],
    ) -> Result<(u16, Vec<u8>), ControlError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream
            .write_all(head)
            .await
            .map_err(|e| ControlError::RequestFailed(e.to_string()))?;
        if !body.is_empty() {
            stream
                .write_all(body)
                .await
                .map_err(|e| ControlError::RequestFailed(e.to_string()))?;
        }
        stream
            .flush()
            .await
            .map_err(|e| ControlError::RequestFailed(e.to_string()))?;

        let mut reader = BufReader::new(stream);
        let rsp = loop {
            let rsp = HttpUpstreamResponse::parse(&mut reader, self.max_header_size)
                .await
                .map_err(|e| ControlError::InvalidResponse(e.to_string()))?;
            if !rsp.is_informational() {
                break rsp;
            }
        };
        let body = match rsp.body_type(method) {
            Some(body_type) => read_body(
                &mut reader,
                body_type,
                BODY_LINE_MAX_LEN,
                MAX_RESPONSE_BODY_SIZE,
            )
            .await
            .map_err(|e| ControlError::InvalidResponse(e.to_string()))?,
            None => Vec::new(),
        };
        Ok((rsp.code, body))
    }

    async fn do_call(
        &self,
        method: Method,
        path: &str,
        auth: Authorization<'_>,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, ControlError> {
        let head = self.build_head(&method, path, auth, body.as_ref().map(|b| b.len()));
        let body = body.unwrap_or_default();

        let stream = tcp_connect_to(&self.addr)
            .await
            .map_err(|e| ControlError::ConnectFailed(e.to_string()))?;
        let (code, data) = match &self.tls {
            Some(config) => {
                let name = tls::server_name(self.addr.host())
                    .map_err(|e| ControlError::ConnectFailed(e.to_string()))?;
                let stream = TlsConnector::from(config.clone())
                    .connect(name, stream)
                    .await
                    .map_err(|e| {
                        ControlError::ConnectFailed(format!("tls handshake failed: {e}"))
                    })?;
                self.exchange(stream, &method, &head, &body).await?
            }
            None => self.exchange(stream, &method, &head, &body).await?,
        };

        if (200..300).contains(&code) {
            Ok(data)
        } else {
            let message = serde_json::from_slice::<ErrorBody>(&data)
                .ok()
                .map(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("unexpected status code {code}"));
            Err(ControlError::Rejected(message))
        }
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        auth: Authorization<'_>,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, ControlError> {
        tokio::time::timeout(self.timeout, self.do_call(method, path, auth, body))
            .await
            .map_err(|_| ControlError::Timeout)?
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ControlError> {
    serde_json::to_vec(value).map_err(|e| ControlError::RequestFailed(e.to_string()))
}

fn decode_json<'a, T: Deserialize<'a>>(data: &'a [u8]) -> Result<T, ControlError> {
    serde_json::from_slice(data).map_err(|e| ControlError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn get_project_to_connect(
        &self,
        token: &str,
        mode: ConnectMode,
        certificate_hostname: Option<&str>,
    ) -> Result<ProjectToConnect, ControlError> {
        let body = encode_json(&serde_json::json!({
            "mode": mode,
            "certificateHostname": certificate_hostname,
        }))?;
        let data = self
            .call(
                Method::POST,
                "/master/projects",
                Authorization::Basic(token),
                Some(body),
            )
            .await?;
        decode_json(&data)
    }

    async fn get_next_proxy_to_connect(
        &self,
        project_id: &str,
        proxyname: Option<&str>,
    ) -> Result<ProxyToConnect, ControlError> {
        let mut path = format!(
            "/master/projects/{}/proxy",
            utf8_percent_encode(project_id, NON_ALPHANUMERIC)
        );
        if let Some(name) = proxyname {
            path.push_str("?proxyname=");
            path.extend(utf8_percent_encode(name, NON_ALPHANUMERIC));
        }
        let data = self
            .call(Method::GET, &path, Authorization::Bearer, None)
            .await?;
        decode_json(&data)
    }

    async fn scale_up_project(&self, project_id: &str) -> Result<(), ControlError> {
        let path = format!(
            "/master/projects/{}/scaleup",
            utf8_percent_encode(project_id, NON_ALPHANUMERIC)
        );
        self.call(Method::POST, &path, Authorization::Bearer, Some(Vec::new()))
            .await?;
        Ok(())
    }

    async fn add_proxies_metrics(&self, metrics: Vec<ProxyMetricsAdd>) -> Result<(), ControlError> {
        let body = encode_json(&metrics)?;
        self.call(
            Method::POST,
            "/refresh/proxies/metrics",
            Authorization::Bearer,
            Some(body),
        )
        .await?;
        Ok(())
    }
}
