/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, header};
use rustls::ClientConfig;
use serde::Deserialize;

use super::connect::{http_tunnel, tcp_connect, tls_connect};
use super::{
    AddressConfig, BoxedStream, RequestArgs, Transport, TransportError, parse_config,
};
use crate::control::ProxyToConnect;
use crate::module::addr::{TargetUrl, UpstreamAddr};
use crate::module::http::proxy_authorization_basic;
use crate::module::socks::{socks4a_connect_to, socks5_connect_to};
use crate::module::tls;

pub(super) const TRANSPORT_TYPE: &str = "proxy";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum ProxyKind {
    Http,
    Https,
    Socks4,
    Socks5,
}

#[derive(Clone, Debug, Deserialize)]
struct AuthConfig {
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Clone, Debug, Deserialize)]
struct ProxyTransportConfig {
    #[serde(rename = "type")]
    kind: ProxyKind,
    address: AddressConfig,
    #[serde(default)]
    auth: Option<AuthConfig>,
}

impl ProxyTransportConfig {
    fn is_http(&self) -> bool {
        matches!(self.kind, ProxyKind::Http | ProxyKind::Https)
    }

    fn basic_auth(&self) -> Option<String> {
        self.auth
            .as_ref()
            .map(|a| proxy_authorization_basic(&a.username, &a.password))
    }
}

/// Reach the target through a plain HTTP, HTTPS or SOCKS proxy.
pub(super) struct ProxyTransport {
    tls_client: Arc<ClientConfig>,
}

impl ProxyTransport {
    pub(super) fn new() -> anyhow::Result<Self> {
        Ok(ProxyTransport {
            tls_client: tls::build_client_config(None)?,
        })
    }

    async fn open_proxy_stream(
        &self,
        config: &ProxyTransportConfig,
    ) -> Result<BoxedStream, TransportError> {
        let proxy_addr = config.address.to_upstream()?;
        let stream = tcp_connect(&proxy_addr).await?;
        if config.kind == ProxyKind::Https {
            let stream = tls_connect(&self.tls_client, stream, &proxy_addr).await?;
            Ok(Box::new(stream))
        } else {
            Ok(Box::new(stream))
        }
    }

    async fn tunnel(
        &self,
        config: &ProxyTransportConfig,
        target: &UpstreamAddr,
        headers: &HeaderMap,
    ) -> Result<BoxedStream, TransportError> {
        let proxy_addr = config.address.to_upstream()?;
        let mut stream = tcp_connect(&proxy_addr).await?;
        match config.kind {
            ProxyKind::Http => {
                let auth = config.basic_auth();
                let stream = http_tunnel(stream, auth.as_deref(), headers, target).await?;
                Ok(Box::new(stream))
            }
            ProxyKind::Https => {
                let auth = config.basic_auth();
                let stream = tls_connect(&self.tls_client, stream, &proxy_addr).await?;
                let stream = http_tunnel(stream, auth.as_deref(), headers, target).await?;
                Ok(Box::new(stream))
            }
            ProxyKind::Socks4 => {
                socks4a_connect_to(&mut stream, target).await?;
                Ok(Box::new(stream))
            }
            ProxyKind::Socks5 => {
                let auth = config
                    .auth
                    .as_ref()
                    .map(|a| (a.username.as_str(), a.password.as_str()));
                socks5_connect_to(&mut stream, auth, target).await?;
                Ok(Box::new(stream))
            }
        }
    }
}

#[async_trait]
impl Transport for ProxyTransport {
    fn type_name(&self) -> &'static str {
        TRANSPORT_TYPE
    }

    fn build_request_args(
        &self,
        proxy: &ProxyToConnect,
        target: &TargetUrl,
        headers: &mut HeaderMap,
    ) -> Result<RequestArgs, TransportError> {
        let config: ProxyTransportConfig = parse_config(proxy)?;

        let host = HeaderValue::from_str(&target.host_header())
            .map_err(|_| TransportError::InvalidConfig("invalid host header".to_string()))?;
        headers.insert(header::HOST, host);

        if config.is_http() && !target.is_https() {
            if let Some(auth) = config.basic_auth() {
                let value = HeaderValue::from_str(&auth).map_err(|_| {
                    TransportError::InvalidConfig("invalid proxy auth".to_string())
                })?;
                headers.insert(header::PROXY_AUTHORIZATION, value);
            }
            Ok(RequestArgs {
                target: target.absolute_form(),
                upstream: target.addr().clone(),
                https: false,
                forward: true,
            })
        } else {
            Ok(RequestArgs {
                target: target.path_and_query().to_string(),
                upstream: target.addr().clone(),
                https: target.is_https(),
                forward: false,
            })
        }
    }

    async fn open_request_stream(
        &self,
        proxy: &ProxyToConnect,
        args: &RequestArgs,
    ) -> Result<BoxedStream, TransportError> {
        let config: ProxyTransportConfig = parse_config(proxy)?;
        if args.forward {
            return self.open_proxy_stream(&config).await;
        }

        let stream = self.tunnel(&config, &args.upstream, &HeaderMap::new()).await?;
        if args.https {
            let stream = tls_connect(&self.tls_client, stream, &args.upstream).await?;
            Ok(Box::new(stream))
        } else {
            Ok(stream)
        }
    }

    async fn connect(
        &self,
        proxy: &ProxyToConnect,
        target: &UpstreamAddr,
        headers: &HeaderMap,
    ) -> Result<BoxedStream, TransportError> {
        let config: ProxyTransportConfig = parse_config(proxy)?;
        self.tunnel(&config, target, headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn proxy_to(kind: &str, port: u16, auth: bool) -> ProxyToConnect {
        let mut config = serde_json::json!({
            "type": kind,
            "address": {"hostname": "127.0.0.1", "port": port},
        });
        if auth {
            config["auth"] = serde_json::json!({"username": "user", "password": "pass"});
        }
        ProxyToConnect {
            id: "c1:k1".to_string(),
            transport_type: TRANSPORT_TYPE.to_string(),
            project_id: "p1".to_string(),
            connector_id: "c1".to_string(),
            key: "k1".to_string(),
            config,
            useragent: String::new(),
            timeout_disconnected: 10_000,
        }
    }

    async fn read_head(stream: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 1];
        while !data.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(n, 1);
            data.push(buf[0]);
        }
        String::from_utf8(data).unwrap()
    }

    #[test]
    fn forward_args() {
        let transport = ProxyTransport::new().unwrap();
        let proxy = proxy_to("HTTP", 3128, true);
        let target: TargetUrl = "http://example.com/a?b=1".parse().unwrap();
        let mut headers = HeaderMap::new();
        let args = transport
            .build_request_args(&proxy, &target, &mut headers)
            .unwrap();
        assert!(args.forward);
        assert_eq!(args.target, "http://example.com/a?b=1");
        assert_eq!(headers.get(header::HOST).unwrap(), "example.com:80");
        assert_eq!(
            headers.get(header::PROXY_AUTHORIZATION).unwrap(),
            "Basic dXNlcjpwYXNz"
        );
    }

    #[test]
    fn tunnel_args() {
        let transport = ProxyTransport::new().unwrap();
        let target: TargetUrl = "https://example.com/a".parse().unwrap();
        for kind in ["HTTP", "SOCKS5"] {
            let proxy = proxy_to(kind, 3128, true);
            let mut headers = HeaderMap::new();
            let args = transport
                .build_request_args(&proxy, &target, &mut headers)
                .unwrap();
            assert!(!args.forward);
            assert!(args.https);
            assert_eq!(args.target, "/a");
            assert!(headers.get(header::PROXY_AUTHORIZATION).is_none());
        }
    }

    #[test]
    fn invalid_config() {
        let transport = ProxyTransport::new().unwrap();
        let mut proxy = proxy_to("HTTP", 3128, false);
        proxy.config = serde_json::json!({"type": "FTP"});
        let target: TargetUrl = "http://example.com/".parse().unwrap();
        let r = transport.build_request_args(&proxy, &target, &mut HeaderMap::new());
        assert!(matches!(r, Err(TransportError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn connect_through_http_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let head = read_head(&mut stream).await;
            stream
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\nhello")
                .await
                .unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            head
        });

        let transport = ProxyTransport::new().unwrap();
        let proxy = proxy_to("HTTP", port, true);
        let target: UpstreamAddr = "example.com:443".parse().unwrap();
        let mut stream = transport
            .connect(&proxy, &target, &HeaderMap::new())
            .await
            .unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        stream.write_all(b"ping").await.unwrap();

        let head = server.await.unwrap();
        assert!(head.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(head.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
    }

    #[tokio::test]
    async fn connect_rejected_by_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_head(&mut stream).await;
            stream
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let transport = ProxyTransport::new().unwrap();
        let proxy = proxy_to("HTTP", port, false);
        let target: UpstreamAddr = "example.com:443".parse().unwrap();
        let e = transport
            .connect(&proxy, &target, &HeaderMap::new())
            .await
            .err()
            .unwrap();
        assert_eq!(e.status(), Some(407));
        assert_eq!(e.to_string(), "Proxy Authentication Required");
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = ProxyTransport::new().unwrap();
        let proxy = proxy_to("SOCKS5", port, false);
        let target: UpstreamAddr = "example.com:443".parse().unwrap();
        let e = transport
            .connect(&proxy, &target, &HeaderMap::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(e, TransportError::ConnectFailed(..)));
        assert!(e.to_string().to_lowercase().contains("refused"));
    }
}
