/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;

use http::{HeaderMap, HeaderValue, header};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::resolve::{client_token, resolve_project, resolve_proxy};
use super::{MitmContext, ServerTaskNotes, with_timeout};
use crate::control::{ConnectMode, ProxyToConnect};
use crate::log::task::TaskLogForHttpForward;
use crate::module::addr::TargetUrl;
use crate::module::affinity::{self, HEADER_PROXYNAME};
use crate::module::http::{
    HttpBodyTransferError, HttpBodyType, HttpProxyClientRequest, HttpUpstreamResponse, copy_body,
};
use crate::module::stream::CountingWriter;
use crate::serve::{
    ErrorId, ErrorScope, GatewayError, ServerContext, ServerTaskError, ServerTaskResult,
    SocketKind, TrackedSocket, write_http_error,
};
use crate::stat::ConnectionMetrics;
use crate::transport::{self, ArcTransport, RequestArgs};

struct ForwardPlan {
    proxy: ProxyToConnect,
    requested: Option<String>,
    cookie_session: bool,
    transport: ArcTransport,
    target: TargetUrl,
    args: RequestArgs,
}

struct ForwardTask<'a> {
    ctx: &'a ServerContext,
    method: String,
    url: String,
    proxy_id: Option<String>,
    status: Option<u16>,
    head_sent: bool,
    metrics: Option<Arc<ConnectionMetrics>>,
}

fn add_affinity_cookies(headers: &mut HeaderMap, cookies: [String; 2]) {
    for cookie in cookies {
        if let Ok(v) = HeaderValue::from_str(&cookie) {
            headers.append(header::SET_COOKIE, v);
        }
    }
}

fn request_error<E: ToString>(e: E) -> ServerTaskError {
    GatewayError::new(ErrorId::RequestError, e.to_string()).into()
}

fn response_error<E: ToString>(e: E) -> ServerTaskError {
    GatewayError::new(ErrorId::ResponseError, e.to_string()).into()
}

impl ForwardTask<'_> {
    fn scope(&self) -> ErrorScope<'_> {
        ErrorScope {
            method: &self.method,
            url: &self.url,
            proxy_id: self.proxy_id.as_deref(),
        }
    }

    async fn plan(
        &mut self,
        mitm: Option<&MitmContext>,
        req: &mut HttpProxyClientRequest,
    ) -> Result<ForwardPlan, GatewayError> {
        if req.target.is_empty() {
            return Err(GatewayError::new(ErrorId::WrongUrl, "URL is empty"));
        }

        let origin_form = req.target.starts_with('/');
        let project = match mitm {
            Some(mitm) => {
                if origin_form {
                    self.url = mitm.absolute_url(&req.target);
                }
                mitm.project.clone()
            }
            None if origin_form => {
                return Err(GatewayError::new(ErrorId::WrongUrl, "URL has no hostname"));
            }
            None => {
                let token = client_token(&req.headers)?;
                resolve_project(self.ctx, token, ConnectMode::Tunnel, None).await?
            }
        };

        let requested = affinity::proxyname_from_headers(&mut req.headers);
        let proxy = resolve_proxy(self.ctx, &project, requested.as_deref()).await?;
        self.proxy_id = Some(proxy.id.clone());

        let target: TargetUrl = self
            .url
            .parse()
            .map_err(|_| GatewayError::new(ErrorId::BuildRequest, "Cannot parse URL"))?;
        let transport = transport::get(&proxy.transport_type)
            .map_err(|e| GatewayError::new(ErrorId::BuildRequest, e.to_string()))?;

        if project.useragent_override && !proxy.useragent.is_empty() {
            if let Ok(v) = HeaderValue::from_str(&proxy.useragent) {
                req.headers.insert(header::USER_AGENT, v);
            }
        }
        req.headers.remove(header::PROXY_AUTHORIZATION);
        req.headers.remove("proxy-connection");
        affinity::remove_reserved_headers(&mut req.headers);

        let args = transport
            .build_request_args(&proxy, &target, &mut req.headers)
            .map_err(|e| GatewayError::new(ErrorId::BuildRequest, e.to_string()))?;

        Ok(ForwardPlan {
            proxy,
            requested,
            cookie_session: project.cookie_session,
            transport,
            target,
            args,
        })
    }

    async fn forward<R, W>(
        &mut self,
        socket: &TrackedSocket,
        plan: ForwardPlan,
        req: &HttpProxyClientRequest,
        clt_r: &mut R,
        clt_w: &mut W,
    ) -> ServerTaskResult<bool>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let proxy = &plan.proxy;
        let metrics = ConnectionMetrics::new(self.ctx.metrics.clone(), proxy);
        self.metrics = Some(metrics.clone());
        let timeout = proxy.timeout_disconnected();
        let max_header_size = self.ctx.config.max_header_size;

        let open = with_timeout(
            timeout,
            plan.transport.open_request_stream(proxy, &plan.args),
        );
        let ups = tokio::select! {
            _ = socket.closed() => return Err(ServerTaskError::CanceledAsServerQuit),
            r = open => match r {
                Some(Ok(stream)) => stream,
                Some(Err(e)) => return Err(request_error(e)),
                None => {
                    return Err(request_error(format!(
                        "Connection to {} timed out",
                        plan.args.upstream
                    )));
                }
            },
        };
        let ups_socket = self
            .ctx
            .sockets
            .track_child(SocketKind::Upstream, proxy.id.clone(), socket);

        let (ups_r, mut ups_w) = tokio::io::split(ups);
        let mut ups_r = BufReader::new(ups_r);

        let head = req.serialize_for_upstream(&plan.args.target);
        ups_w.write_all(&head).await.map_err(request_error)?;
        metrics.add_request_head(req.method.as_str(), &plan.args.target, &req.headers);

        let (_, sent_stats) = metrics.upstream_pair();
        let mut ups_w = CountingWriter::new(ups_w, sent_stats);

        let (mut rsp, body_done) = {
            let recv_head = async {
                loop {
                    let rsp = HttpUpstreamResponse::parse(&mut ups_r, max_header_size)
                        .await
                        .map_err(request_error)?;
                    if !rsp.is_informational() {
                        return Ok::<_, ServerTaskError>(rsp);
                    }
                    clt_w
                        .write_all(&rsp.serialize_for_client(true))
                        .await
                        .map_err(ServerTaskError::ClientTcpWriteFailed)?;
                    clt_w
                        .flush()
                        .await
                        .map_err(ServerTaskError::ClientTcpWriteFailed)?;
                }
            };
            tokio::pin!(recv_head);

            // the response may come before the whole request body is sent
            let early_rsp = {
                let send_body = async {
                    match req.body_type() {
                        Some(body_type) => copy_body(clt_r, &mut ups_w, body_type, max_header_size)
                            .await
                            .map(|_| ())
                            .map_err(|e| match e {
                                HttpBodyTransferError::WriteFailed(e) => request_error(e),
                                e => ServerTaskError::ClientBodyTransferFailed(e),
                            }),
                        None => ups_w.flush().await.map_err(request_error),
                    }
                };
                tokio::pin!(send_body);

                tokio::select! {
                    biased;

                    _ = ups_socket.closed() => return Err(ServerTaskError::CanceledAsServerQuit),
                    r = &mut recv_head => Some(r?),
                    r = &mut send_body => {
                        r?;
                        None
                    }
                }
            };

            match early_rsp {
                Some(rsp) => (rsp, false),
                None => {
                    let wait_head = async {
                        let mut watch_client = true;
                        loop {
                            tokio::select! {
                                biased;

                                r = &mut recv_head => return r,
                                r = clt_r.fill_buf(), if watch_client => match r {
                                    Ok([]) | Err(_) => return Err(ServerTaskError::ClosedByClient),
                                    // pipelined request, left for the next round
                                    Ok(_) => watch_client = false,
                                },
                            }
                        }
                    };
                    tokio::select! {
                        biased;

                        _ = ups_socket.closed() => return Err(ServerTaskError::CanceledAsServerQuit),
                        r = with_timeout(timeout, wait_head) => match r {
                            Some(r) => (r?, true),
                            None => {
                                return Err(request_error("Timed out waiting for the response"));
                            }
                        },
                    }
                }
            }
        };

        self.status = Some(rsp.code);
        metrics.add_response_head(rsp.code, &rsp.reason, &rsp.headers);

        if let Ok(v) = HeaderValue::from_str(&proxy.id) {
            rsp.headers.insert(HEADER_PROXYNAME, v);
        }
        let domain = req
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .and_then(affinity::parse_domain);
        if let Some(domain) = domain {
            let secure = plan.target.is_https();
            if plan.cookie_session {
                add_affinity_cookies(
                    &mut rsp.headers,
                    affinity::affinity_set_cookies(&proxy.id, domain, secure),
                );
            } else if plan.requested.as_ref().is_some_and(|id| *id != proxy.id) {
                add_affinity_cookies(
                    &mut rsp.headers,
                    affinity::affinity_clear_cookies(domain, secure),
                );
            }
        }

        let body_type = rsp.body_type(&req.method);
        let keep_alive =
            req.keep_alive() && body_done && body_type != Some(HttpBodyType::ReadUntilEnd);

        self.head_sent = true;
        clt_w
            .write_all(&rsp.serialize_for_client(keep_alive))
            .await
            .map_err(ServerTaskError::ClientTcpWriteFailed)?;

        match body_type {
            Some(body_type) => {
                let mut clt_w = CountingWriter::new(&mut *clt_w, metrics.received_writer());
                let copy = copy_body(&mut ups_r, &mut clt_w, body_type, max_header_size);
                tokio::select! {
                    _ = ups_socket.closed() => return Err(ServerTaskError::CanceledAsServerQuit),
                    r = copy => match r {
                        Ok(_) => {}
                        Err(HttpBodyTransferError::WriteFailed(e)) => {
                            return Err(ServerTaskError::ClientTcpWriteFailed(e));
                        }
                        Err(e) => return Err(response_error(e)),
                    },
                }
            }
            None => clt_w
                .flush()
                .await
                .map_err(ServerTaskError::ClientTcpWriteFailed)?,
        }

        Ok(keep_alive)
    }
}

/// Forward one plain proxy request, returns whether the client connection could be reused.
pub(super) async fn dispatch<R, W>(
    ctx: &ServerContext,
    socket: &TrackedSocket,
    client_addr: SocketAddr,
    mitm: Option<&MitmContext>,
    mut req: HttpProxyClientRequest,
    clt_r: &mut R,
    clt_w: &mut W,
) -> bool
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let task_notes = ServerTaskNotes::new(client_addr);
    let mut task = ForwardTask {
        ctx,
        method: req.method.to_string(),
        url: req.target.clone(),
        proxy_id: None,
        status: None,
        head_sent: false,
        metrics: None,
    };

    let r = match task.plan(mitm, &mut req).await {
        Ok(plan) => task.forward(socket, plan, &req, clt_r, clt_w).await,
        Err(e) => Err(e.into()),
    };

    let (keep_alive, e) = match r {
        Ok(keep_alive) => (keep_alive, ServerTaskError::Finished),
        Err(e) => {
            if let ServerTaskError::Gateway(e) = &e {
                if task.head_sent {
                    task.scope().log(e);
                } else {
                    let _ = write_http_error(clt_w, e, &task.scope()).await;
                }
            }
            (false, e)
        }
    };

    if let Some(logger) = &ctx.task_logger {
        let snapshot = task.metrics.as_ref().map(|m| m.snapshot());
        TaskLogForHttpForward {
            logger,
            task_notes: &task_notes,
            method: &task.method,
            url: &task.url,
            proxy: task.proxy_id.as_deref(),
            mitm: mitm.is_some(),
            status: task.status,
            bytes_sent: snapshot.as_ref().map(|s| s.bytes_sent).unwrap_or_default(),
            bytes_received: snapshot
                .as_ref()
                .map(|s| s.bytes_received)
                .unwrap_or_default(),
        }
        .log(&e);
    }

    keep_alive
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookies_appended() {
        let mut headers = HeaderMap::new();
        add_affinity_cookies(
            &mut headers,
            affinity::affinity_set_cookies("c1:k1", "example.com", false),
        );
        let values: Vec<_> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values[0].contains("Domain=.example.com"));
        assert!(values[1].starts_with("scrapoxy-proxyname=c1:k1"));
    }

    #[test]
    fn error_kinds() {
        match request_error("refused") {
            ServerTaskError::Gateway(e) => {
                assert_eq!(e.id, ErrorId::RequestError);
                assert_eq!(e.status, 500);
            }
            _ => panic!("not a gateway error"),
        }
        match response_error("reset") {
            ServerTaskError::Gateway(e) => assert_eq!(e.id, ErrorId::ResponseError),
            _ => panic!("not a gateway error"),
        }
    }
}
