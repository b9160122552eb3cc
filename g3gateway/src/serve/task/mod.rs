/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::debug;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::time::Instant;
use uuid::Uuid;

use super::{ServerContext, TrackedSocket, write_bad_request};
use crate::module::http::{HttpProxyClientRequest, HttpRequestParseError};
use crate::transport::BoxedStream;

mod resolve;

mod mitm;
pub(crate) use mitm::MitmContext;

mod request;
mod tunnel;

/// Notes of a single request or tunnel on a client connection.
pub(crate) struct ServerTaskNotes {
    pub(crate) id: Uuid,
    pub(crate) client_addr: SocketAddr,
    pub(crate) start_at: DateTime<Local>,
    create_ins: Instant,
}

impl ServerTaskNotes {
    pub(crate) fn new(client_addr: SocketAddr) -> Self {
        ServerTaskNotes {
            id: Uuid::new_v4(),
            client_addr,
            start_at: Local::now(),
            create_ins: Instant::now(),
        }
    }

    #[inline]
    pub(crate) fn time_elapsed(&self) -> Duration {
        self.create_ins.elapsed()
    }
}

/// Run `fut` under an optional timeout, `None` is returned if it timed out.
async fn with_timeout<F: Future>(timeout: Option<Duration>, fut: F) -> Option<F::Output> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Serve the HTTP/1.1 proxy requests on a client connection, one at a time.
///
/// `mitm` is set when the connection is the decrypted stream of a tunnel.
pub(crate) fn serve_client_boxed(
    ctx: Arc<ServerContext>,
    stream: BoxedStream,
    client_addr: SocketAddr,
    mitm: Option<Arc<MitmContext>>,
    socket: TrackedSocket,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(serve_client(ctx, stream, client_addr, mitm, socket))
}

async fn serve_client(
    ctx: Arc<ServerContext>,
    stream: BoxedStream,
    client_addr: SocketAddr,
    mitm: Option<Arc<MitmContext>>,
    socket: TrackedSocket,
) {
    let (clt_r, mut clt_w) = tokio::io::split(stream);
    let mut clt_r = BufReader::new(clt_r);

    loop {
        let parse = tokio::time::timeout(
            ctx.config.request_timeout,
            HttpProxyClientRequest::parse(&mut clt_r, ctx.config.max_header_size),
        );
        let req = tokio::select! {
            biased;

            _ = socket.closed() => {
                debug!("connection from {client_addr} closed as server quit");
                break;
            }
            r = parse => match r {
                Ok(Ok(req)) => req,
                Ok(Err(HttpRequestParseError::ClientClosed)) => break,
                Ok(Err(e)) => {
                    debug!("invalid request from {client_addr}: {e}");
                    if let Some(status) = e.status_code() {
                        let _ = write_bad_request(&mut clt_w, status).await;
                    }
                    break;
                }
                Err(_) => {
                    debug!("timed out reading request header from {client_addr}");
                    break;
                }
            },
        };

        if req.is_connect() {
            if mitm.is_some() {
                let _ = write_bad_request(&mut clt_w, http::StatusCode::BAD_REQUEST).await;
                break;
            }
            tunnel::dispatch(ctx, socket, client_addr, req, clt_r, clt_w).await;
            return;
        }

        let keep_alive = request::dispatch(
            &ctx,
            &socket,
            client_addr,
            mitm.as_deref(),
            req,
            &mut clt_r,
            &mut clt_w,
        )
        .await;
        if !keep_alive {
            break;
        }
    }

    let _ = clt_w.shutdown().await;
}
