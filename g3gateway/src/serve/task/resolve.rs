/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use http::{HeaderMap, header};
use log::debug;

use crate::control::{ConnectMode, ProjectStatus, ProjectToConnect, ProxyToConnect};
use crate::module::http::parse_basic_token;
use crate::serve::{ErrorId, GatewayError, ServerContext};

/// The project token in the proxy authorization header of the client.
pub(super) fn client_token(headers: &HeaderMap) -> Result<&str, GatewayError> {
    headers
        .get(header::PROXY_AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic_token)
        .ok_or_else(|| GatewayError::new(ErrorId::NoToken, "No token found"))
}

/// Find the project of the client from its token.
pub(super) async fn resolve_project(
    ctx: &ServerContext,
    token: &str,
    mode: ConnectMode,
    certificate_hostname: Option<&str>,
) -> Result<ProjectToConnect, GatewayError> {
    ctx.control
        .get_project_to_connect(token, mode, certificate_hostname)
        .await
        .map_err(|e| GatewayError::new(ErrorId::NoProject, e.to_string()))
}

/// Pick the next proxy of the project, and scale the project up if needed.
pub(super) async fn resolve_proxy(
    ctx: &ServerContext,
    project: &ProjectToConnect,
    proxyname: Option<&str>,
) -> Result<ProxyToConnect, GatewayError> {
    let proxy = ctx
        .control
        .get_next_proxy_to_connect(&project.id, proxyname)
        .await
        .map_err(|e| GatewayError::new(ErrorId::NoProxy, e.to_string()))?;

    if project.auto_scale_up && project.status == ProjectStatus::Calm {
        debug!("scaling up project {}", project.id);
        ctx.control
            .scale_up_project(&project.id)
            .await
            .map_err(|e| {
                GatewayError::new(
                    ErrorId::CannotScaleup,
                    format!("Cannot change project status: {e}"),
                )
            })?;
    }

    Ok(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn token_from_headers() {
        let mut headers = HeaderMap::new();
        let e = client_token(&headers).unwrap_err();
        assert_eq!(e.id, ErrorId::NoToken);
        assert_eq!(e.status, 407);

        headers.insert(
            header::PROXY_AUTHORIZATION,
            HeaderValue::from_static("Basic dG9rZW4="),
        );
        assert!(client_token(&headers).is_ok());
    }
}
