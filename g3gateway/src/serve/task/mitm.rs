/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_rustls::TlsAcceptor;

use super::serve_client_boxed;
use crate::control::{Certificate, ProjectToConnect};
use crate::module::addr::UpstreamAddr;
use crate::module::tls;
use crate::serve::{
    ErrorId, GatewayError, ServerContext, ServerTaskError, SocketKind, TrackedSocket,
};

const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// The tunnel a decrypted client connection comes from.
pub(crate) struct MitmContext {
    pub(crate) hostname: String,
    pub(crate) port: u16,
    pub(crate) project: ProjectToConnect,
}

impl MitmContext {
    /// Rewrite an origin-form target into the absolute https url.
    pub(crate) fn absolute_url(&self, path: &str) -> String {
        if self.port == 443 {
            format!("https://{}{path}", self.hostname)
        } else {
            format!("https://{}:{}{path}", self.hostname, self.port)
        }
    }
}

pub(super) fn build_acceptor(cert: &Certificate) -> Result<TlsAcceptor, GatewayError> {
    tls::build_server_config(&cert.cert, &cert.key)
        .map(TlsAcceptor::from)
        .map_err(|e| GatewayError::new(ErrorId::BuildConnect, format!("{e:#}")))
}

/// Terminate the TLS session of the client inside the tunnel and serve the
/// requests carried by it.
pub(super) async fn serve_mitm<S>(
    ctx: Arc<ServerContext>,
    acceptor: TlsAcceptor,
    mut stream: S,
    client_addr: SocketAddr,
    target: &UpstreamAddr,
    project: ProjectToConnect,
    socket: TrackedSocket,
) -> Result<(), ServerTaskError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    stream
        .write_all(CONNECT_ESTABLISHED)
        .await
        .map_err(ServerTaskError::ClientTcpWriteFailed)?;
    stream
        .flush()
        .await
        .map_err(ServerTaskError::ClientTcpWriteFailed)?;

    let accept = tokio::time::timeout(ctx.config.tls_accept_timeout, acceptor.accept(stream));
    let tls_stream = tokio::select! {
        _ = socket.closed() => return Err(ServerTaskError::CanceledAsServerQuit),
        r = accept => match r {
            Ok(Ok(tls_stream)) => tls_stream,
            Ok(Err(e)) => return Err(ServerTaskError::ClientTlsHandshakeFailed(e)),
            Err(_) => return Err(ServerTaskError::ClientTlsHandshakeTimeout),
        },
    };
    debug!("mitm session with {client_addr} for {target} established");

    let mitm = MitmContext {
        hostname: target.host_str(),
        port: target.port(),
        project,
    };
    let mitm_socket = ctx
        .sockets
        .track_child(SocketKind::Mitm, client_addr.to_string(), &socket);
    serve_client_boxed(
        Arc::clone(&ctx),
        Box::new(tls_stream),
        client_addr,
        Some(Arc::new(mitm)),
        mitm_socket,
    )
    .await;
    Ok(())
}
