/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use http::HeaderMap;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::TransportError;
use crate::module::addr::UpstreamAddr;
use crate::module::http::http_connect_to;
use crate::module::net::tcp_connect_to;
use crate::module::tls;

const CONNECT_RSP_MAX_HEADER_SIZE: usize = 8192;

pub(super) async fn tcp_connect(addr: &UpstreamAddr) -> Result<TcpStream, TransportError> {
    tcp_connect_to(addr)
        .await
        .map_err(|e| TransportError::ConnectFailed(addr.clone(), e))
}

pub(super) async fn tls_connect<S>(
    config: &Arc<ClientConfig>,
    stream: S,
    addr: &UpstreamAddr,
) -> Result<TlsStream<S>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = tls::server_name(addr.host())
        .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
    TlsConnector::from(config.clone())
        .connect(name, stream)
        .await
        .map_err(|e| TransportError::TlsHandshakeFailed(addr.clone(), e))
}

/// Send `CONNECT` over `stream`, the returned reader keeps what was read ahead.
pub(super) async fn http_tunnel<S>(
    stream: S,
    auth: Option<&str>,
    headers: &HeaderMap,
    target: &UpstreamAddr,
) -> Result<BufReader<S>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf_stream = BufReader::new(stream);
    http_connect_to(
        &mut buf_stream,
        auth,
        headers,
        target,
        CONNECT_RSP_MAX_HEADER_SIZE,
    )
    .await?;
    Ok(buf_stream)
}
