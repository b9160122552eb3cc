/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;

use http::{HeaderMap, header};
use tokio::io::{AsyncWriteExt, BufReader, ReadHalf, WriteHalf};

use super::{ServerTaskNotes, with_timeout};
use super::mitm::{build_acceptor, serve_mitm};
use super::resolve::{client_token, resolve_project, resolve_proxy};
use crate::control::{ConnectMode, ProjectToConnect, ProxyToConnect};
use crate::log::task::TaskLogForTunnel;
use crate::module::addr::UpstreamAddr;
use crate::module::affinity::{self, HEADER_MODE};
use crate::module::http::HttpProxyClientRequest;
use crate::module::stream::{CountingReader, CountingWriter, RelayError, RelayStats, relay};
use crate::serve::{
    ErrorId, ErrorScope, GatewayError, ServerContext, ServerTaskError, SocketKind, TrackedSocket,
    sanitize_header_value, write_socket_error,
};
use crate::stat::ConnectionMetrics;
use crate::transport::{self, BoxedStream};

type ClientReader = BufReader<ReadHalf<BoxedStream>>;
type ClientWriter = WriteHalf<BoxedStream>;

/// The client headers forwarded along the CONNECT request to the upstream proxy.
fn connect_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forward = headers.clone();
    forward.remove(header::HOST);
    forward.remove(header::PROXY_AUTHORIZATION);
    forward.remove(header::CONNECTION);
    forward.remove(header::CONTENT_LENGTH);
    forward.remove(header::TRANSFER_ENCODING);
    affinity::remove_reserved_headers(&mut forward);
    forward
}

fn connected_head(proxy_id: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nX-Scrapoxy-Proxyname: {}\r\n\r\n",
        sanitize_header_value(proxy_id)
    )
    .into_bytes()
}

enum TunnelStage {
    Mitm(ProjectToConnect, tokio_rustls::TlsAcceptor, UpstreamAddr),
    Tunnel(ProxyToConnect, BoxedStream, Arc<ConnectionMetrics>),
}

struct TunnelTask<'a> {
    ctx: &'a ServerContext,
    req: HttpProxyClientRequest,
    target: Option<UpstreamAddr>,
    proxy_id: Option<String>,
}

impl TunnelTask<'_> {
    async fn prepare(&mut self, socket: &TrackedSocket) -> Result<TunnelStage, GatewayError> {
        let mode = ConnectMode::from_header(
            self.req
                .headers
                .get(&HEADER_MODE)
                .and_then(|v| v.to_str().ok()),
        );
        let token = client_token(&self.req.headers)?;
        let target: UpstreamAddr = self
            .req
            .target
            .parse()
            .map_err(|_| GatewayError::new(ErrorId::WrongUrl, "Cannot parse CONNECT target"))?;
        self.target = Some(target.clone());
        let hostname = target.host().to_string();

        let project = resolve_project(self.ctx, token, mode, Some(&hostname)).await?;

        if mode != ConnectMode::Tunnel {
            if let Some(cert) = &project.certificate {
                let acceptor = build_acceptor(cert)?;
                return Ok(TunnelStage::Mitm(project, acceptor, target));
            }
        }

        let proxyname = affinity::proxyname_from_headers(&mut self.req.headers);
        let proxy = resolve_proxy(self.ctx, &project, proxyname.as_deref()).await?;
        self.proxy_id = Some(proxy.id.clone());

        let transport = transport::get(&proxy.transport_type)
            .map_err(|e| GatewayError::new(ErrorId::BuildConnect, e.to_string()))?;

        let metrics = ConnectionMetrics::new(self.ctx.metrics.clone(), &proxy);

        let headers = connect_headers(&self.req.headers);
        let connect = with_timeout(
            proxy.timeout_disconnected(),
            transport.connect(&proxy, &target, &headers),
        );
        let stream = tokio::select! {
            _ = socket.closed() => {
                return Err(GatewayError::new(ErrorId::BuildConnect, "canceled as server quit"));
            }
            r = connect => match r {
                Some(Ok(stream)) => stream,
                Some(Err(e)) => {
                    let status = e.status().unwrap_or(500);
                    metrics.set_status(status);
                    return Err(GatewayError::with_status(
                        ErrorId::BuildConnect,
                        status,
                        e.to_string(),
                    ));
                }
                None => {
                    return Err(GatewayError::new(
                        ErrorId::BuildConnect,
                        format!("Connection to {target} timed out"),
                    ));
                }
            },
        };
        metrics.set_status(200);
        Ok(TunnelStage::Tunnel(proxy, stream, metrics))
    }

    fn scope(&self) -> ErrorScope<'_> {
        ErrorScope {
            method: "CONNECT",
            url: &self.req.target,
            proxy_id: self.proxy_id.as_deref(),
        }
    }
}

async fn run_tunnel(
    ctx: &ServerContext,
    socket: &TrackedSocket,
    proxy: &ProxyToConnect,
    metrics: &Arc<ConnectionMetrics>,
    ups: BoxedStream,
    clt_r: &mut ClientReader,
    clt_w: &mut ClientWriter,
) -> Result<RelayStats, ServerTaskError> {
    let ups_socket = ctx
        .sockets
        .track_child(SocketKind::Upstream, proxy.id.clone(), socket);

    clt_w
        .write_all(&connected_head(&proxy.id))
        .await
        .map_err(|e| GatewayError::new(ErrorId::WriteError, e.to_string()))?;
    clt_w
        .flush()
        .await
        .map_err(|e| GatewayError::new(ErrorId::WriteError, e.to_string()))?;

    let (ups_r, ups_w) = tokio::io::split(ups);
    let (read_stats, write_stats) = metrics.upstream_pair();
    let mut ups_r = CountingReader::new(ups_r, read_stats);
    let mut ups_w = CountingWriter::new(ups_w, write_stats);

    let idle_timeout = proxy.timeout_disconnected();
    match relay(
        clt_r,
        clt_w,
        &mut ups_r,
        &mut ups_w,
        idle_timeout,
        ups_socket.token(),
    )
    .await
    {
        Ok(stats) => Ok(stats),
        Err(RelayError::Canceled) => Err(ServerTaskError::CanceledAsServerQuit),
        Err(RelayError::Idle(d)) => Err(ServerTaskError::Idle(d)),
        Err(e) => Err(GatewayError::new(ErrorId::SocketError, e.to_string()).into()),
    }
}

/// Handle a CONNECT request, the client connection is consumed.
pub(super) async fn dispatch(
    ctx: Arc<ServerContext>,
    socket: TrackedSocket,
    client_addr: SocketAddr,
    req: HttpProxyClientRequest,
    mut clt_r: ClientReader,
    mut clt_w: ClientWriter,
) {
    let task_notes = ServerTaskNotes::new(client_addr);
    let mut task = TunnelTask {
        ctx: &ctx,
        req,
        target: None,
        proxy_id: None,
    };

    let mut stats = RelayStats::default();
    let r = match task.prepare(&socket).await {
        Ok(TunnelStage::Mitm(project, acceptor, target)) => {
            let stream = tokio::io::join(clt_r, clt_w);
            serve_mitm(
                Arc::clone(&ctx),
                acceptor,
                stream,
                client_addr,
                &target,
                project,
                socket,
            )
            .await
        }
        Ok(TunnelStage::Tunnel(proxy, ups, metrics)) => {
            let r = run_tunnel(
                &ctx,
                &socket,
                &proxy,
                &metrics,
                ups,
                &mut clt_r,
                &mut clt_w,
            )
            .await;
            if let Err(ServerTaskError::Gateway(e)) = &r {
                task.scope().log(e);
            }
            let _ = clt_w.shutdown().await;
            r.map(|s| stats = s)
        }
        Err(e) => {
            let _ = write_socket_error(&mut clt_w, &e, &task.scope()).await;
            let _ = clt_w.shutdown().await;
            Err(e.into())
        }
    };

    let e = r.err().unwrap_or(ServerTaskError::Finished);
    if let Some(logger) = &ctx.task_logger {
        let upstream = task.target.as_ref().map(|t| t.to_string());
        TaskLogForTunnel {
            logger,
            task_notes: &task_notes,
            upstream: upstream.as_deref().unwrap_or(&task.req.target),
            proxy: task.proxy_id.as_deref(),
            client_rd_bytes: stats.client_to_upstream,
            client_wr_bytes: stats.upstream_to_client,
        }
        .log(&e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::affinity::HEADER_PROXYNAME;
    use http::HeaderValue;

    #[test]
    fn filter_connect_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("example.com:443"));
        headers.insert(
            header::PROXY_AUTHORIZATION,
            HeaderValue::from_static("Basic dG9rZW4="),
        );
        headers.insert(HEADER_MODE, HeaderValue::from_static("tunnel"));
        headers.insert(HEADER_PROXYNAME, HeaderValue::from_static("c1:k1"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        let forward = connect_headers(&headers);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward.get(header::USER_AGENT).unwrap(), "curl/8");
    }

    #[test]
    fn head() {
        assert_eq!(
            connected_head("c1:k1\r\nx"),
            b"HTTP/1.1 200 OK\r\nX-Scrapoxy-Proxyname: c1:k1x\r\n\r\n"
        );
    }
}
