/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::control::ProxyToConnect;
use crate::module::addr::{Host, TargetUrl, UpstreamAddr};
use crate::module::http::HttpConnectError;
use crate::module::socks::SocksConnectError;

mod registry;
pub(crate) use registry::{add, foreach, get, load_default};

mod datacenter;
mod proxy;

mod connect;

pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub(crate) type BoxedStream = Box<dyn AsyncStream>;

#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error("unsupported transport type {0}")]
    Unsupported(String),
    #[error("invalid transport config: {0}")]
    InvalidConfig(String),
    #[error("connect to {0} failed: {1}")]
    ConnectFailed(UpstreamAddr, io::Error),
    #[error("tls handshake with {0} failed: {1}")]
    TlsHandshakeFailed(UpstreamAddr, io::Error),
    #[error("socks connect failed: {0}")]
    SocksConnectFailed(#[from] SocksConnectError),
    #[error("http connect failed: {0}")]
    HttpConnectFailed(HttpConnectError),
    #[error("{message}")]
    Http { status: u16, message: String },
}

impl TransportError {
    /// The status code reported by the upstream, if any.
    pub(crate) fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<HttpConnectError> for TransportError {
    fn from(e: HttpConnectError) -> Self {
        match e {
            HttpConnectError::UnexpectedStatusCode(status, message) => {
                TransportError::Http { status, message }
            }
            e => TransportError::HttpConnectFailed(e),
        }
    }
}

/// How a plain proxy request should be sent upstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RequestArgs {
    /// The request target to put in the request line.
    pub(crate) target: String,
    /// The origin server.
    pub(crate) upstream: UpstreamAddr,
    pub(crate) https: bool,
    /// Send the request to the proxy itself instead of through a tunnel.
    pub(crate) forward: bool,
}

/// A strategy to reach the outside world through one kind of upstream proxy.
#[async_trait]
pub(crate) trait Transport {
    fn type_name(&self) -> &'static str;

    /// Decide how to send the request, and add the headers needed by the upstream.
    fn build_request_args(
        &self,
        proxy: &ProxyToConnect,
        target: &TargetUrl,
        headers: &mut HeaderMap,
    ) -> Result<RequestArgs, TransportError>;

    /// Open the stream which will carry the request head and body.
    async fn open_request_stream(
        &self,
        proxy: &ProxyToConnect,
        args: &RequestArgs,
    ) -> Result<BoxedStream, TransportError>;

    /// Open a tunnel to `target`.
    async fn connect(
        &self,
        proxy: &ProxyToConnect,
        target: &UpstreamAddr,
        headers: &HeaderMap,
    ) -> Result<BoxedStream, TransportError>;
}

pub(crate) type ArcTransport = Arc<dyn Transport + Send + Sync>;

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct AddressConfig {
    pub(crate) hostname: String,
    pub(crate) port: u16,
}

impl AddressConfig {
    pub(crate) fn to_upstream(&self) -> Result<UpstreamAddr, TransportError> {
        if self.port == 0 {
            return Err(TransportError::InvalidConfig("port 0 is not allowed".to_string()));
        }
        let host: Host = self.hostname.parse().map_err(|_| {
            TransportError::InvalidConfig(format!("invalid hostname {}", self.hostname))
        })?;
        Ok(UpstreamAddr::new(host, self.port))
    }
}

pub(crate) fn parse_config<T>(proxy: &ProxyToConnect) -> Result<T, TransportError>
where
    T: for<'de> Deserialize<'de>,
{
    T::deserialize(&proxy.config).map_err(|e| TransportError::InvalidConfig(e.to_string()))
}
