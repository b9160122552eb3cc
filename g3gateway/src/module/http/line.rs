/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::Utf8Error;

use atoi::{FromRadix10, FromRadix16};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum HttpLineParseError {
    #[error("not long enough")]
    NotLongEnough,
    #[error("invalid utf-8 encoding: {0}")]
    InvalidUtf8Encoding(#[from] Utf8Error),
    #[error("no delimiter '{0}' found")]
    NoDelimiterFound(char),
    #[error("invalid header name")]
    InvalidHeaderName,
    #[error("invalid header value")]
    InvalidHeaderValue,
    #[error("invalid version")]
    InvalidVersion,
    #[error("invalid status code")]
    InvalidStatusCode,
    #[error("invalid chunk size")]
    InvalidChunkSize,
}

fn parse_version(buf: &[u8]) -> Result<u8, HttpLineParseError> {
    match buf {
        b"HTTP/1.0" => Ok(0),
        b"HTTP/1.1" => Ok(1),
        b"HTTP/2.0" | b"HTTP/2" => Ok(2),
        _ => Err(HttpLineParseError::InvalidVersion),
    }
}

/// The request line, the target may be empty.
pub(crate) struct HttpMethodLine<'a> {
    pub(crate) method: &'a str,
    pub(crate) target: &'a str,
    pub(crate) version: u8,
}

impl<'a> HttpMethodLine<'a> {
    pub(crate) fn parse(buf: &'a [u8]) -> Result<HttpMethodLine<'a>, HttpLineParseError> {
        let line = std::str::from_utf8(buf)?.trim_end();

        let Some(first) = memchr::memchr(b' ', line.as_bytes()) else {
            return Err(HttpLineParseError::NoDelimiterFound(' '));
        };
        let Some(last) = memchr::memrchr(b' ', line.as_bytes()) else {
            return Err(HttpLineParseError::NoDelimiterFound(' '));
        };
        if first == last {
            return Err(HttpLineParseError::NotLongEnough);
        }

        let method = &line[0..first];
        if method.is_empty() {
            return Err(HttpLineParseError::NotLongEnough);
        }
        let version = parse_version(line[last + 1..].as_bytes())?;
        let target = line[first + 1..last].trim();

        Ok(HttpMethodLine {
            method,
            target,
            version,
        })
    }
}

pub(crate) struct HttpStatusLine<'a> {
    pub(crate) version: u8,
    pub(crate) code: u16,
    pub(crate) reason: &'a str,
}

impl<'a> HttpStatusLine<'a> {
    pub(crate) fn parse(buf: &'a [u8]) -> Result<HttpStatusLine<'a>, HttpLineParseError> {
        const MINIMAL_LENGTH: usize = 13; // HTTP/1.x XYZ\n

        if buf.len() < MINIMAL_LENGTH {
            return Err(HttpLineParseError::NotLongEnough);
        }

        let Some(p) = memchr::memchr(b' ', buf) else {
            return Err(HttpLineParseError::NoDelimiterFound(' '));
        };
        let version = parse_version(&buf[0..p])?;

        let left = &buf[p + 1..];
        let (code, len) = u16::from_radix_10(left);
        if len != 3 {
            return Err(HttpLineParseError::InvalidStatusCode);
        }

        if left.len() < len + 1 {
            return Err(HttpLineParseError::NotLongEnough);
        }
        let reason = std::str::from_utf8(&left[len + 1..])?.trim();

        Ok(HttpStatusLine {
            version,
            code,
            reason,
        })
    }
}

pub(crate) struct HttpHeaderLine<'a> {
    pub(crate) name: &'a str,
    pub(crate) value: &'a str,
}

impl<'a> HttpHeaderLine<'a> {
    pub(crate) fn parse(buf: &'a [u8]) -> Result<HttpHeaderLine<'a>, HttpLineParseError> {
        let line = std::str::from_utf8(buf)?;
        let Some(p) = memchr::memchr(b':', line.as_bytes()) else {
            return Err(HttpLineParseError::NoDelimiterFound(':'));
        };

        let name = line[0..p].trim();
        let value = line[p + 1..].trim();

        Ok(HttpHeaderLine { name, value })
    }
}

pub(crate) struct HttpChunkedLine {
    pub(crate) chunk_size: u64,
}

impl HttpChunkedLine {
    pub(crate) fn parse(buf: &[u8]) -> Result<HttpChunkedLine, HttpLineParseError> {
        let (chunk_size, offset) = u64::from_radix_16(buf);
        if offset == 0 {
            return Err(HttpLineParseError::InvalidChunkSize);
        }

        if buf.len() == offset {
            return Err(HttpLineParseError::NotLongEnough);
        }

        match buf[offset] {
            b'\r' | b'\n' | b';' | b' ' | b'\t' => Ok(HttpChunkedLine { chunk_size }),
            _ => Err(HttpLineParseError::InvalidChunkSize),
        }
    }
}
