/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod line;
pub(crate) use line::{
    HttpChunkedLine, HttpHeaderLine, HttpLineParseError, HttpMethodLine, HttpStatusLine,
};

mod error;
pub(crate) use error::{HttpBodyTransferError, HttpRequestParseError, HttpResponseParseError};

mod body;
pub(crate) use body::{HttpBodyType, copy_body, read_body};

mod request;
pub(crate) use request::{HttpProxyClientRequest, parse_basic_token};

mod response;
pub(crate) use response::HttpUpstreamResponse;

mod connect;
pub(crate) use connect::{HttpConnectError, http_connect_to, proxy_authorization_basic};
