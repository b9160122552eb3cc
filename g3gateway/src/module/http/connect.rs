/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{self, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::BufMut;
use http::{HeaderMap, header};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use super::{HttpResponseParseError, HttpUpstreamResponse};
use crate::module::addr::UpstreamAddr;
use crate::module::affinity::HEADER_PROXYERROR;

#[derive(Debug, Error)]
pub(crate) enum HttpConnectError {
    #[error("write failed: {0:?}")]
    WriteFailed(io::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(#[from] HttpResponseParseError),
    #[error("unexpected status code {0}: {1}")]
    UnexpectedStatusCode(u16, String),
}

/// The value of a `Proxy-Authorization` header with basic auth.
pub(crate) fn proxy_authorization_basic(username: &str, password: &str) -> String {
    let token = STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {token}")
}

fn build_connect_request(addr: &UpstreamAddr, auth: Option<&str>, headers: &HeaderMap) -> Vec<u8> {
    let mut buf = Vec::<u8>::with_capacity(256);
    let _ = write!(buf, "CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\n");
    if let Some(auth) = auth {
        let _ = write!(buf, "Proxy-Authorization: {auth}\r\n");
    }
    for (name, value) in headers.iter() {
        if name == header::HOST
            || name == header::PROXY_AUTHORIZATION
            || name == header::CONNECTION
            || name == header::CONTENT_LENGTH
            || name == header::TRANSFER_ENCODING
        {
            continue;
        }
        buf.put_slice(name.as_ref());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
    buf
}

/// Open a tunnel to `addr` with a `CONNECT` request.
///
/// The buffered reader is kept by the caller, as the peer may send data right
/// after the response head.
pub(crate) async fn http_connect_to<S>(
    buf_stream: &mut S,
    auth: Option<&str>,
    headers: &HeaderMap,
    addr: &UpstreamAddr,
    max_header_size: usize,
) -> Result<(), HttpConnectError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let req = build_connect_request(addr, auth, headers);
    buf_stream
        .write_all(&req)
        .await
        .map_err(HttpConnectError::WriteFailed)?;
    buf_stream
        .flush()
        .await
        .map_err(HttpConnectError::WriteFailed)?;

    let rsp = HttpUpstreamResponse::parse(buf_stream, max_header_size).await?;
    if rsp.code == 200 {
        return Ok(());
    }
    let message = rsp
        .header_str(HEADER_PROXYERROR.as_str())
        .filter(|v| !v.is_empty())
        .unwrap_or(rsp.reason.as_str())
        .to_string();
    Err(HttpConnectError::UnexpectedStatusCode(rsp.code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn basic_auth() {
        assert_eq!(
            proxy_authorization_basic("user", "pass"),
            "Basic dXNlcjpwYXNz"
        );
    }

    #[tokio::test]
    async fn connect_ok() {
        let addr: UpstreamAddr = "example.com:443".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, "curl/8".parse().unwrap());
        let stream = tokio_test::io::Builder::new()
            .write(
                b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\
                  Proxy-Authorization: Basic dXNlcjpwYXNz\r\nuser-agent: curl/8\r\n\r\n",
            )
            .read(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .build();
        let mut buf_stream = BufReader::new(stream);
        let auth = proxy_authorization_basic("user", "pass");
        http_connect_to(&mut buf_stream, Some(&auth), &headers, &addr, 4096)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn connect_rejected() {
        let addr: UpstreamAddr = "example.com:443".parse().unwrap();
        let stream = tokio_test::io::Builder::new()
            .write(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
            .read(b"HTTP/1.1 502 Bad Gateway\r\nX-Scrapoxy-Proxyerror: ECONNREFUSED\r\n\r\n")
            .build();
        let mut buf_stream = BufReader::new(stream);
        let e = http_connect_to(&mut buf_stream, None, &HeaderMap::new(), &addr, 4096)
            .await
            .unwrap_err();
        assert!(matches!(
            e,
            HttpConnectError::UnexpectedStatusCode(502, ref m) if m == "ECONNREFUSED"
        ));
    }
}
