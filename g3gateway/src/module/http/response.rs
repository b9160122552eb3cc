/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::Write;
use std::str::FromStr;

use bytes::BufMut;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Version, header};
use tokio::io::AsyncBufRead;

use super::{HttpBodyType, HttpHeaderLine, HttpLineParseError, HttpStatusLine};
use super::HttpResponseParseError;
use crate::module::io::limited_read_until;

/// A response head received from the next hop.
pub(crate) struct HttpUpstreamResponse {
    pub(crate) version: Version,
    pub(crate) code: u16,
    pub(crate) reason: String,
    pub(crate) headers: HeaderMap,
    origin_header_size: usize,
    content_length: u64,
    chunked_transfer: bool,
    has_transfer_encoding: bool,
    has_content_length: bool,
}

impl HttpUpstreamResponse {
    fn new(version: Version, code: u16, reason: String) -> Self {
        HttpUpstreamResponse {
            version,
            code,
            reason,
            headers: HeaderMap::new(),
            origin_header_size: 0,
            content_length: 0,
            chunked_transfer: false,
            has_transfer_encoding: false,
            has_content_length: false,
        }
    }

    #[inline]
    pub(crate) fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub(crate) fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn expect_no_body(&self, method: &Method) -> bool {
        self.code < 200 || self.code == 204 || self.code == 304 || method == Method::HEAD
    }

    pub(crate) fn body_type(&self, method: &Method) -> Option<HttpBodyType> {
        if self.expect_no_body(method) {
            None
        } else if self.chunked_transfer {
            Some(HttpBodyType::Chunked)
        } else if self.has_content_length {
            if self.content_length > 0 {
                Some(HttpBodyType::ContentLength(self.content_length))
            } else {
                None
            }
        } else {
            Some(HttpBodyType::ReadUntilEnd)
        }
    }

    pub(crate) async fn parse<R>(
        reader: &mut R,
        max_header_size: usize,
    ) -> Result<Self, HttpResponseParseError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line_buf = Vec::<u8>::with_capacity(1024);
        let mut header_size: usize = 0;

        let (found, nr) = limited_read_until(reader, b'\n', max_header_size, &mut line_buf).await?;
        if nr == 0 {
            return Err(HttpResponseParseError::RemoteClosed);
        }
        if !found {
            return if nr < max_header_size {
                Err(HttpResponseParseError::RemoteClosed)
            } else {
                Err(HttpResponseParseError::TooLargeHeader(max_header_size))
            };
        }
        header_size += nr;

        let mut rsp = HttpUpstreamResponse::build_from_status_line(line_buf.as_ref())?;

        loop {
            if header_size >= max_header_size {
                return Err(HttpResponseParseError::TooLargeHeader(max_header_size));
            }
            line_buf.clear();
            let max_len = max_header_size - header_size;
            let (found, nr) = limited_read_until(reader, b'\n', max_len, &mut line_buf).await?;
            if nr == 0 {
                return Err(HttpResponseParseError::RemoteClosed);
            }
            if !found {
                return if nr < max_len {
                    Err(HttpResponseParseError::RemoteClosed)
                } else {
                    Err(HttpResponseParseError::TooLargeHeader(max_header_size))
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
                .map_err(HttpResponseParseError::InvalidHeaderLine)?;
            rsp.handle_header(header)?;
        }
        rsp.origin_header_size = header_size;
        Ok(rsp)
    }

    fn build_from_status_line(line_buf: &[u8]) -> Result<Self, HttpResponseParseError> {
        let rsp =
            HttpStatusLine::parse(line_buf).map_err(HttpResponseParseError::InvalidStatusLine)?;
        let version = match rsp.version {
            0 => Version::HTTP_10,
            1 => Version::HTTP_11,
            _ => return Err(HttpResponseParseError::InvalidVersion),
        };
        Ok(HttpUpstreamResponse::new(
            version,
            rsp.code,
            rsp.reason.to_string(),
        ))
    }

    fn handle_header(&mut self, header: HttpHeaderLine) -> Result<(), HttpResponseParseError> {
        let name = HeaderName::from_str(header.name).map_err(|_| {
            HttpResponseParseError::InvalidHeaderLine(HttpLineParseError::InvalidHeaderName)
        })?;

        match name.as_str() {
            // hop-by-hop, the gateway decides the client connection persistence
            "connection" | "proxy-connection" | "keep-alive" => return Ok(()),
            "transfer-encoding" => {
                self.has_transfer_encoding = true;
                if self.has_content_length {
                    self.headers.remove(header::CONTENT_LENGTH);
                    self.content_length = 0;
                }

                let v = header.value.to_lowercase();
                if v.ends_with("chunked") {
                    self.chunked_transfer = true;
                } else if v.contains("chunked") {
                    return Err(HttpResponseParseError::InvalidChunkedTransferEncoding);
                }
            }
            "content-length" => {
                if self.has_transfer_encoding {
                    return Ok(());
                }

                let content_length = u64::from_str(header.value)
                    .map_err(|_| HttpResponseParseError::InvalidContentLength)?;
                if self.has_content_length {
                    if self.content_length != content_length {
                        return Err(HttpResponseParseError::InvalidContentLength);
                    }
                    return Ok(());
                }
                self.has_content_length = true;
                self.content_length = content_length;
            }
            _ => {}
        }

        let value = HeaderValue::from_str(header.value).map_err(|_| {
            HttpResponseParseError::InvalidHeaderLine(HttpLineParseError::InvalidHeaderValue)
        })?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Serialize the head for the proxy client.
    pub(crate) fn serialize_for_client(&self, keep_alive: bool) -> Vec<u8> {
        const RESERVED_LEN_FOR_EXTRA_HEADERS: usize = 256;
        let mut buf =
            Vec::<u8>::with_capacity(self.origin_header_size + RESERVED_LEN_FOR_EXTRA_HEADERS);
        let _ = write!(buf, "{:?} {} {}\r\n", self.version, self.code, self.reason);
        for (name, value) in self.headers.iter() {
            buf.put_slice(name.as_ref());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
        if !self.is_informational() {
            if keep_alive {
                buf.put_slice(b"Connection: keep-alive\r\n");
            } else {
                buf.put_slice(b"Connection: close\r\n");
            }
        }
        buf.put_slice(b"\r\n");
        buf
    }
}
