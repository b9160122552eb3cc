/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

use bytes::BufMut;
use log::info;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::module::http::HttpBodyTransferError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ErrorId {
    WrongUrl,
    NoToken,
    NoProject,
    NoProxy,
    CannotScaleup,
    BuildRequest,
    BuildConnect,
    RequestError,
    ResponseError,
    SocketError,
    WriteError,
}

impl ErrorId {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ErrorId::WrongUrl => "wrong_url",
            ErrorId::NoToken => "no_token",
            ErrorId::NoProject => "no_project",
            ErrorId::NoProxy => "no_proxy",
            ErrorId::CannotScaleup => "cannot_scaleup",
            ErrorId::BuildRequest => "build_request",
            ErrorId::BuildConnect => "build_connect",
            ErrorId::RequestError => "request_error",
            ErrorId::ResponseError => "response_error",
            ErrorId::SocketError => "socket_error",
            ErrorId::WriteError => "write_error",
        }
    }

    fn default_status(&self) -> u16 {
        match self {
            ErrorId::WrongUrl => 400,
            ErrorId::NoToken | ErrorId::NoProject => 407,
            ErrorId::NoProxy | ErrorId::CannotScaleup => 557,
            _ => 500,
        }
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported to the proxy client.
#[derive(Clone, Debug, Error)]
#[error("{id}({status}): {message}")]
pub(crate) struct GatewayError {
    pub(crate) id: ErrorId,
    pub(crate) status: u16,
    pub(crate) message: String,
}

impl GatewayError {
    pub(crate) fn new<T: Into<String>>(id: ErrorId, message: T) -> Self {
        GatewayError {
            id,
            status: id.default_status(),
            message: message.into(),
        }
    }

    pub(crate) fn with_status<T: Into<String>>(id: ErrorId, status: u16, message: T) -> Self {
        GatewayError {
            id,
            status,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub(crate) enum ServerTaskError {
    #[error("tcp write to client: {0:?}")]
    ClientTcpWriteFailed(io::Error),
    #[error("client tls handshake failed: {0:?}")]
    ClientTlsHandshakeFailed(io::Error),
    #[error("client tls handshake timeout")]
    ClientTlsHandshakeTimeout,
    #[error("client body transfer: {0}")]
    ClientBodyTransferFailed(HttpBodyTransferError),
    #[error("{0}")]
    Gateway(#[from] GatewayError),
    #[error("closed by client")]
    ClosedByClient,
    #[error("canceled as server quit")]
    CanceledAsServerQuit,
    #[error("idle after {0:?}")]
    Idle(Duration),
    #[error("finished")]
    Finished, // this isn't an error, for log only
}

impl ServerTaskError {
    pub(crate) fn brief(&self) -> &'static str {
        match self {
            ServerTaskError::ClientTcpWriteFailed(_) => "ClientTcpWriteFailed",
            ServerTaskError::ClientTlsHandshakeFailed(_) => "ClientTlsHandshakeFailed",
            ServerTaskError::ClientTlsHandshakeTimeout => "ClientTlsHandshakeTimeout",
            ServerTaskError::ClientBodyTransferFailed(_) => "ClientBodyTransferFailed",
            ServerTaskError::Gateway(e) => e.id.as_str(),
            ServerTaskError::ClosedByClient => "ClosedByClient",
            ServerTaskError::CanceledAsServerQuit => "CanceledAsServerQuit",
            ServerTaskError::Idle(_) => "Idle",
            ServerTaskError::Finished => "Finished",
        }
    }
}

pub(crate) type ServerTaskResult<T> = Result<T, ServerTaskError>;

/// What the client asked for, used when reporting an error.
pub(crate) struct ErrorScope<'a> {
    pub(crate) method: &'a str,
    pub(crate) url: &'a str,
    pub(crate) proxy_id: Option<&'a str>,
}

impl ErrorScope<'_> {
    pub(crate) fn log(&self, err: &GatewayError) {
        info!(
            "{} {} via proxy {}: {err}",
            self.method,
            self.url,
            self.proxy_id.unwrap_or("-"),
        );
    }
}

/// Remove the characters which could break the header block.
pub(crate) fn sanitize_header_value(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

fn put_error_head(buf: &mut Vec<u8>, err: &GatewayError, proxy_id: Option<&str>) {
    let _ = write!(buf, "HTTP/1.1 {} {}\r\n", err.status, err.id);
    let _ = write!(
        buf,
        "X-Scrapoxy-Proxyerror: {}\r\n",
        sanitize_header_value(&err.message)
    );
    if err.status == 407 {
        buf.put_slice(b"Proxy-Authenticate: Basic\r\n");
    }
    if let Some(id) = proxy_id {
        let _ = write!(buf, "X-Scrapoxy-Proxyname: {}\r\n", sanitize_header_value(id));
    }
}

fn error_body(err: &GatewayError, scope: &ErrorScope<'_>) -> Vec<u8> {
    let mut body = serde_json::json!({
        "id": err.id.as_str(),
        "message": err.message,
        "method": scope.method,
        "url": scope.url,
    });
    if let Some(id) = scope.proxy_id {
        body["proxyId"] = serde_json::Value::String(id.to_string());
    }
    serde_json::to_vec(&body).unwrap_or_default()
}

/// Reply a JSON error response on a HTTP connection, which should be closed after this.
pub(crate) async fn write_http_error<W>(
    writer: &mut W,
    err: &GatewayError,
    scope: &ErrorScope<'_>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    scope.log(err);

    let body = error_body(err, scope);
    let mut buf = Vec::<u8>::with_capacity(512 + body.len());
    put_error_head(&mut buf, err, scope.proxy_id);
    buf.put_slice(b"Content-Type: application/json\r\n");
    let _ = write!(buf, "Content-Length: {}\r\n", body.len());
    buf.put_slice(b"Connection: close\r\n\r\n");
    buf.put_slice(&body);

    writer.write_all(&buf).await?;
    writer.flush().await
}

/// Reply a bodyless error response on a raw socket, which should be closed after this.
pub(crate) async fn write_socket_error<W>(
    writer: &mut W,
    err: &GatewayError,
    scope: &ErrorScope<'_>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    scope.log(err);

    let mut buf = Vec::<u8>::with_capacity(256);
    put_error_head(&mut buf, err, scope.proxy_id);
    buf.put_slice(b"\r\n");

    writer.write_all(&buf).await?;
    writer.flush().await
}

/// Reply a plain error for a request head that could not be parsed.
pub(crate) async fn write_bad_request<W>(writer: &mut W, status: http::StatusCode) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let reason = status.canonical_reason().unwrap_or("Bad Request");
    let mut buf = Vec::<u8>::with_capacity(128);
    let _ = write!(
        buf,
        "HTTP/1.1 {} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status.as_u16()
    );
    writer.write_all(&buf).await?;
    writer.flush().await
}
