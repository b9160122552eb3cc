/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use http::StatusCode;
use thiserror::Error;

use super::HttpLineParseError;

#[derive(Debug, Error)]
pub(crate) enum HttpRequestParseError {
    #[error("client closed the connection")]
    ClientClosed,
    #[error("request header exceeds {0} bytes")]
    TooLargeHeader(usize),
    #[error("invalid method line: {0}")]
    InvalidMethodLine(HttpLineParseError),
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("only HTTP/1.x requests are accepted")]
    UnsupportedVersion,
    #[error("invalid header line: {0}")]
    InvalidHeaderLine(HttpLineParseError),
    #[error("chunked is not the final transfer-encoding")]
    InvalidChunkedTransferEncoding,
    #[error("bad content-length header")]
    InvalidContentLength,
    #[error("connection upgrade is not supported")]
    UpgradeIsNotSupported,
    #[error("client read failed: {0:?}")]
    IoFailed(#[from] io::Error),
}

impl HttpRequestParseError {
    pub(crate) fn status_code(&self) -> Option<StatusCode> {
        match self {
            HttpRequestParseError::IoFailed(_) | HttpRequestParseError::ClientClosed => None,
            HttpRequestParseError::TooLargeHeader(_) => {
                Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE)
            }
            HttpRequestParseError::UpgradeIsNotSupported
            | HttpRequestParseError::UnsupportedMethod(_) => Some(StatusCode::NOT_IMPLEMENTED),
            HttpRequestParseError::UnsupportedVersion => {
                Some(StatusCode::HTTP_VERSION_NOT_SUPPORTED)
            }
            _ => Some(StatusCode::BAD_REQUEST),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum HttpResponseParseError {
    #[error("upstream closed the connection")]
    RemoteClosed,
    #[error("response header exceeds {0} bytes")]
    TooLargeHeader(usize),
    #[error("invalid status line: {0}")]
    InvalidStatusLine(HttpLineParseError),
    #[error("not an HTTP/1.x response")]
    InvalidVersion,
    #[error("invalid header line: {0}")]
    InvalidHeaderLine(HttpLineParseError),
    #[error("chunked is not the final transfer-encoding")]
    InvalidChunkedTransferEncoding,
    #[error("bad content-length header")]
    InvalidContentLength,
    #[error("upstream read failed: {0:?}")]
    ReadFailed(#[from] io::Error),
}

#[derive(Debug, Error)]
pub(crate) enum HttpBodyTransferError {
    #[error("read failed: {0:?}")]
    ReadFailed(io::Error),
    #[error("write failed: {0:?}")]
    WriteFailed(io::Error),
    #[error("body ended early")]
    ReaderClosed,
    #[error("invalid chunked body: {0}")]
    InvalidChunked(&'static str),
    #[error("body exceeds the {0} bytes limit")]
    TooLarge(usize),
}
