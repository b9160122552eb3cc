/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::Write;
use std::str::FromStr;

use bytes::BufMut;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Version, header};
use tokio::io::AsyncBufRead;

use super::{HttpBodyType, HttpHeaderLine, HttpLineParseError, HttpMethodLine};
use super::HttpRequestParseError;
use crate::module::io::limited_read_until;

/// A request head received from a proxy client.
///
/// Connection management headers are consumed while parsing, all other
/// headers, including the body framing ones, are kept in `headers`.
pub(crate) struct HttpProxyClientRequest {
    pub(crate) version: Version,
    pub(crate) method: Method,
    pub(crate) target: String,
    pub(crate) headers: HeaderMap,
    origin_header_size: usize,
    keep_alive: bool,
    content_length: u64,
    chunked_transfer: bool,
    has_transfer_encoding: bool,
    has_content_length: bool,
}

impl HttpProxyClientRequest {
    fn new(method: Method, target: String, version: Version) -> Self {
        HttpProxyClientRequest {
            version,
            method,
            target,
            headers: HeaderMap::new(),
            origin_header_size: 0,
            keep_alive: false,
            content_length: 0,
            chunked_transfer: false,
            has_transfer_encoding: false,
            has_content_length: false,
        }
    }

    #[inline]
    pub(crate) fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[inline]
    pub(crate) fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }

    pub(crate) fn body_type(&self) -> Option<HttpBodyType> {
        if self.chunked_transfer {
            Some(HttpBodyType::Chunked)
        } else if self.content_length > 0 {
            Some(HttpBodyType::ContentLength(self.content_length))
        } else {
            None
        }
    }

    pub(crate) async fn parse<R>(
        reader: &mut R,
        max_header_size: usize,
    ) -> Result<Self, HttpRequestParseError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line_buf = Vec::<u8>::with_capacity(1024);
        let mut header_size: usize = 0;

        let (found, nr) = limited_read_until(reader, b'\n', max_header_size, &mut line_buf).await?;
        if nr == 0 {
            return Err(HttpRequestParseError::ClientClosed);
        }
        if !found {
            return if nr < max_header_size {
                Err(HttpRequestParseError::ClientClosed)
            } else {
                Err(HttpRequestParseError::TooLargeHeader(max_header_size))
            };
        }
        header_size += nr;

        let mut req = HttpProxyClientRequest::build_from_method_line(line_buf.as_ref())?;
        req.keep_alive = req.version == Version::HTTP_11;

        loop {
            if header_size >= max_header_size {
                return Err(HttpRequestParseError::TooLargeHeader(max_header_size));
            }
            line_buf.clear();
            let max_len = max_header_size - header_size;
            let (found, nr) = limited_read_until(reader, b'\n', max_len, &mut line_buf).await?;
            if nr == 0 {
                return Err(HttpRequestParseError::ClientClosed);
            }
            if !found {
                return if nr < max_len {
                    Err(HttpRequestParseError::ClientClosed)
                } else {
                    Err(HttpRequestParseError::TooLargeHeader(max_header_size))
                };
            }
            header_size += nr;
            if (line_buf.len() == 1 && line_buf[0] == b'\n')
                || (line_buf.len() == 2 && line_buf[0] == b'\r' && line_buf[1] == b'\n')
            {
                // header end line
                break;
            }

            let header = HttpHeaderLine::parse(line_buf.as_ref())
                .map_err(HttpRequestParseError::InvalidHeaderLine)?;
            req.handle_header(header)?;
        }
        req.origin_header_size = header_size;

        Ok(req)
    }

    fn build_from_method_line(line_buf: &[u8]) -> Result<Self, HttpRequestParseError> {
        let req =
            HttpMethodLine::parse(line_buf).map_err(HttpRequestParseError::InvalidMethodLine)?;

        let version = match req.version {
            0 => Version::HTTP_10,
            1 => Version::HTTP_11,
            _ => return Err(HttpRequestParseError::UnsupportedVersion),
        };

        let method = Method::from_str(req.method)
            .map_err(|_| HttpRequestParseError::UnsupportedMethod(req.method.to_string()))?;
        Ok(HttpProxyClientRequest::new(
            method,
            req.target.to_string(),
            version,
        ))
    }

    fn parse_header_connection(&mut self, value: &str) {
        for v in value.split(',') {
            let v = v.trim();
            if v.eq_ignore_ascii_case("keep-alive") {
                self.keep_alive = true;
            } else if v.eq_ignore_ascii_case("close") {
                self.keep_alive = false;
            }
        }
    }

    fn append_header(
        &mut self,
        name: HeaderName,
        value: &str,
    ) -> Result<(), HttpRequestParseError> {
        let value = HeaderValue::from_str(value).map_err(|_| {
            HttpRequestParseError::InvalidHeaderLine(HttpLineParseError::InvalidHeaderValue)
        })?;
        self.headers.append(name, value);
        Ok(())
    }

    fn handle_header(&mut self, header: HttpHeaderLine) -> Result<(), HttpRequestParseError> {
        let name = HeaderName::from_str(header.name).map_err(|_| {
            HttpRequestParseError::InvalidHeaderLine(HttpLineParseError::InvalidHeaderName)
        })?;

        match name.as_str() {
            "connection" | "proxy-connection" => {
                self.parse_header_connection(header.value);
                return Ok(());
            }
            "keep-alive" => return Ok(()),
            "upgrade" => return Err(HttpRequestParseError::UpgradeIsNotSupported),
            "transfer-encoding" => {
                self.has_transfer_encoding = true;
                if self.has_content_length {
                    self.headers.remove(header::CONTENT_LENGTH);
                    self.content_length = 0;
                    self.keep_alive = false; // according to rfc9112 Section 6.1
                }

                let v = header.value.to_lowercase();
                if v.ends_with("chunked") {
                    self.chunked_transfer = true;
                } else {
                    return Err(HttpRequestParseError::InvalidChunkedTransferEncoding);
                }
            }
            "content-length" => {
                if self.has_transfer_encoding {
                    self.keep_alive = false; // according to rfc9112 Section 6.1
                    return Ok(());
                }

                let content_length = u64::from_str(header.value)
                    .map_err(|_| HttpRequestParseError::InvalidContentLength)?;

                if self.has_content_length {
                    if self.content_length != content_length {
                        return Err(HttpRequestParseError::InvalidContentLength);
                    }
                    return Ok(());
                }
                self.has_content_length = true;
                self.content_length = content_length;
            }
            _ => {}
        }

        self.append_header(name, header.value)
    }

    /// Serialize the head for the next hop, with `target` as the request target.
    ///
    /// The upstream connection is never reused, so `Connection: close` is always set.
    pub(crate) fn serialize_for_upstream(&self, target: &str) -> Vec<u8> {
        const RESERVED_LEN_FOR_EXTRA_HEADERS: usize = 256;
        let mut buf =
            Vec::<u8>::with_capacity(self.origin_header_size + RESERVED_LEN_FOR_EXTRA_HEADERS);
        let _ = write!(buf, "{} {} {:?}\r\n", self.method, target, self.version);
        for (name, value) in self.headers.iter() {
            buf.put_slice(name.as_ref());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"Connection: close\r\n\r\n");
        buf
    }
}

/// Extract the token from a `Basic` proxy authorization value.
pub(crate) fn parse_basic_token(value: &str) -> Option<&str> {
    let value = value.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn read_get() {
        let content = b"GET http://example.com/v/a/x HTTP/1.1\r\n\
            Host: example.com\r\n\
            Proxy-Connection: Keep-Alive\r\n\
            Proxy-Authorization: Basic dG9rZW4=\r\n\
            Accept: */*\r\n\r\n";
        let stream = tokio_test::io::Builder::new().read(content).build();
        let mut buf_stream = BufReader::new(stream);
        let request = HttpProxyClientRequest::parse(&mut buf_stream, 4096)
            .await
            .unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.target, "http://example.com/v/a/x");
        assert!(request.keep_alive());
        assert!(request.body_type().is_none());
        assert!(request.headers.get("proxy-connection").is_none());
        assert_eq!(
            request.headers.get("proxy-authorization").unwrap(),
            "Basic dG9rZW4="
        );

        let result = HttpProxyClientRequest::parse(&mut buf_stream, 4096).await;
        assert!(matches!(result, Err(HttpRequestParseError::ClientClosed)));
    }

    #[tokio::test]
    async fn connection_close() {
        let content = b"GET http://api.example.com/v1/files HTTP/1.1\r\n\
            Host: api.example.com\r\n\
            Connection: close\r\n\r\n";
        let stream = tokio_test::io::Builder::new().read(content).build();
        let mut buf_stream = BufReader::new(stream);
        let request = HttpProxyClientRequest::parse(&mut buf_stream, 4096)
            .await
            .unwrap();
        assert!(!request.keep_alive());
    }

    #[tokio::test]
    async fn read_post_chunked() {
        let content = b"POST http://example.com/upload HTTP/1.1\r\n\
            Host: example.com\r\n\
            Content-Length: 10\r\n\
            Transfer-Encoding: chunked\r\n\r\n";
        let stream = tokio_test::io::Builder::new().read(content).build();
        let mut buf_stream = BufReader::new(stream);
        let request = HttpProxyClientRequest::parse(&mut buf_stream, 4096)
            .await
            .unwrap();
        assert_eq!(request.body_type(), Some(HttpBodyType::Chunked));
        assert!(request.headers.get("content-length").is_none());
        assert!(!request.keep_alive());
    }

    #[tokio::test]
    async fn read_connect() {
        let content = b"CONNECT example.com:443 HTTP/1.1\r\n\
            Host: example.com:443\r\n\
            X-Scrapoxy-Mode: tunnel\r\n\r\n";
        let stream = tokio_test::io::Builder::new().read(content).build();
        let mut buf_stream = BufReader::new(stream);
        let request = HttpProxyClientRequest::parse(&mut buf_stream, 4096)
            .await
            .unwrap();
        assert!(request.is_connect());
        assert_eq!(request.target, "example.com:443");
        assert_eq!(request.headers.get("x-scrapoxy-mode").unwrap(), "tunnel");
    }

    #[tokio::test]
    async fn too_large_header() {
        let content = b"GET http://example.com/ HTTP/1.1\r\n\
            Host: example.com\r\n\
            Accept: */*\r\n\r\n";
        let stream = tokio_test::io::Builder::new().read(content).build();
        let mut buf_stream = BufReader::new(stream);
        let result = HttpProxyClientRequest::parse(&mut buf_stream, 40).await;
        assert!(matches!(
            result,
            Err(HttpRequestParseError::TooLargeHeader(40))
        ));
    }

    #[test]
    fn serialize() {
        let mut req = HttpProxyClientRequest::new(
            Method::GET,
            "http://example.com/a?b=c".to_string(),
            Version::HTTP_11,
        );
        req.headers
            .append(header::HOST, HeaderValue::from_static("example.com"));
        let buf = req.serialize_for_upstream("/a?b=c");
        assert_eq!(
            buf.as_slice(),
            b"GET /a?b=c HTTP/1.1\r\nhost: example.com\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn basic_token() {
        assert_eq!(parse_basic_token("Basic dG9rZW4="), Some("dG9rZW4="));
        assert_eq!(parse_basic_token("basic  abc "), Some("abc"));
        assert_eq!(parse_basic_token("Bearer abc"), None);
        assert_eq!(parse_basic_token("Basic "), None);
    }
}
