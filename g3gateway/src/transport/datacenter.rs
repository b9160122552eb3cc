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
use crate::control::{Certificate, ProxyToConnect};
use crate::module::addr::{TargetUrl, UpstreamAddr};
use crate::module::tls;

pub(super) const TRANSPORT_TYPE: &str = "datacenter";

#[derive(Clone, Debug, Deserialize)]
struct DatacenterTransportConfig {
    address: AddressConfig,
    #[serde(default)]
    certificate: Option<Certificate>,
}

/// Reach the target through the proxy running on a cloud instance.
///
/// Every connection is a `CONNECT` tunnel, over mutual TLS when the instance
/// has a certificate.
pub(super) struct DatacenterTransport {
    tls_client: Arc<ClientConfig>,
}

impl DatacenterTransport {
    pub(super) fn new() -> anyhow::Result<Self> {
        Ok(DatacenterTransport {
            tls_client: tls::build_client_config(None)?,
        })
    }

    async fn tunnel(
        &self,
        config: &DatacenterTransportConfig,
        target: &UpstreamAddr,
        headers: &HeaderMap,
    ) -> Result<BoxedStream, TransportError> {
        let proxy_addr = config.address.to_upstream()?;
        let stream = tcp_connect(&proxy_addr).await?;
        match &config.certificate {
            Some(cert) => {
                let tls_client = tls::build_client_config(Some((&cert.cert, &cert.key)))
                    .map_err(|e| TransportError::InvalidConfig(format!("{e:?}")))?;
                let stream = tls_connect(&tls_client, stream, &proxy_addr).await?;
                let stream = http_tunnel(stream, None, headers, target).await?;
                Ok(Box::new(stream))
            }
            None => {
                let stream = http_tunnel(stream, None, headers, target).await?;
                Ok(Box::new(stream))
            }
        }
    }
}

#[async_trait]
impl Transport for DatacenterTransport {
    fn type_name(&self) -> &'static str {
        TRANSPORT_TYPE
    }

    fn build_request_args(
        &self,
        proxy: &ProxyToConnect,
        target: &TargetUrl,
        headers: &mut HeaderMap,
    ) -> Result<RequestArgs, TransportError> {
        let _config: DatacenterTransportConfig = parse_config(proxy)?;

        let host = HeaderValue::from_str(&target.host_header())
            .map_err(|_| TransportError::InvalidConfig("invalid host header".to_string()))?;
        headers.insert(header::HOST, host);

        Ok(RequestArgs {
            target: target.path_and_query().to_string(),
            upstream: target.addr().clone(),
            https: target.is_https(),
            forward: false,
        })
    }

    async fn open_request_stream(
        &self,
        proxy: &ProxyToConnect,
        args: &RequestArgs,
    ) -> Result<BoxedStream, TransportError> {
        let config: DatacenterTransportConfig = parse_config(proxy)?;
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
        let config: DatacenterTransportConfig = parse_config(proxy)?;
        self.tunnel(&config, target, headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn proxy_to(port: u16) -> ProxyToConnect {
        ProxyToConnect {
            id: "c2:k1".to_string(),
            transport_type: TRANSPORT_TYPE.to_string(),
            project_id: "p1".to_string(),
            connector_id: "c2".to_string(),
            key: "k1".to_string(),
            config: serde_json::json!({"address": {"hostname": "127.0.0.1", "port": port}}),
            useragent: String::new(),
            timeout_disconnected: 10_000,
        }
    }

    #[test]
    fn request_args() {
        let transport = DatacenterTransport::new().unwrap();
        let target: TargetUrl = "http://example.com:8080/x".parse().unwrap();
        let mut headers = HeaderMap::new();
        let args = transport
            .build_request_args(&proxy_to(3128), &target, &mut headers)
            .unwrap();
        assert!(!args.forward);
        assert!(!args.https);
        assert_eq!(args.target, "/x");
        assert_eq!(args.upstream.to_string(), "example.com:8080");
        assert_eq!(headers.get(header::HOST).unwrap(), "example.com:8080");
    }

    #[tokio::test]
    async fn plain_request_over_tunnel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut data = Vec::new();
            let mut buf = [0u8; 1];
            while !data.ends_with(b"\r\n\r\n") {
                stream.read_exact(&mut buf).await.unwrap();
                data.push(buf[0]);
            }
            assert!(data.starts_with(b"CONNECT example.com:80 HTTP/1.1\r\n"));
            stream
                .write_all(b"HTTP/1.1 200 OK\r\n\r\n")
                .await
                .unwrap();
            let mut buf = [0u8; 3];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let transport = DatacenterTransport::new().unwrap();
        let proxy = proxy_to(port);
        let target: TargetUrl = "http://example.com/".parse().unwrap();
        let mut headers = HeaderMap::new();
        let args = transport
            .build_request_args(&proxy, &target, &mut headers)
            .unwrap();
        let mut stream = transport.open_request_stream(&proxy, &args).await.unwrap();
        stream.write_all(b"abc").await.unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
    }
}
