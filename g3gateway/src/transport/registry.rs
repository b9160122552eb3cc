/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use foldhash::fast::FixedState;
use once_cell::sync::Lazy;

use super::datacenter::DatacenterTransport;
use super::proxy::ProxyTransport;
use super::{ArcTransport, TransportError};

static RUNTIME_TRANSPORT_REGISTRY: Lazy<Mutex<HashMap<String, ArcTransport, FixedState>>> =
    Lazy::new(|| Mutex::new(HashMap::with_hasher(FixedState::default())));

pub(crate) fn add(transport: ArcTransport) {
    let mut ht = RUNTIME_TRANSPORT_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let name = transport.type_name().to_string();
    if let Some(_old_transport) = ht.insert(name, transport) {}
}

pub(crate) fn get(type_name: &str) -> Result<ArcTransport, TransportError> {
    let ht = RUNTIME_TRANSPORT_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    ht.get(type_name)
        .map(Arc::clone)
        .ok_or_else(|| TransportError::Unsupported(type_name.to_string()))
}

#[cfg(test)]
fn del(type_name: &str) {
    let mut ht = RUNTIME_TRANSPORT_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(_old_transport) = ht.remove(type_name) {}
}

pub(crate) fn foreach<F>(mut f: F)
where
    F: FnMut(&str, &ArcTransport),
{
    let ht = RUNTIME_TRANSPORT_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    for (name, transport) in ht.iter() {
        f(name, transport)
    }
}

/// Register all built-in transports.
pub(crate) fn load_default() -> anyhow::Result<()> {
    add(Arc::new(ProxyTransport::new()?));
    add(Arc::new(DatacenterTransport::new()?));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ProxyToConnect;
    use crate::module::addr::{TargetUrl, UpstreamAddr};
    use crate::transport::{BoxedStream, RequestArgs, Transport};
    use async_trait::async_trait;
    use http::HeaderMap;

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        fn type_name(&self) -> &'static str {
            "noop-for-registry-test"
        }

        fn build_request_args(
            &self,
            _proxy: &ProxyToConnect,
            target: &TargetUrl,
            _headers: &mut HeaderMap,
        ) -> Result<RequestArgs, TransportError> {
            Ok(RequestArgs {
                target: target.path_and_query().to_string(),
                upstream: target.addr().clone(),
                https: target.is_https(),
                forward: false,
            })
        }

        async fn open_request_stream(
            &self,
            _proxy: &ProxyToConnect,
            _args: &RequestArgs,
        ) -> Result<BoxedStream, TransportError> {
            Err(TransportError::Unsupported("noop".to_string()))
        }

        async fn connect(
            &self,
            _proxy: &ProxyToConnect,
            _target: &UpstreamAddr,
            _headers: &HeaderMap,
        ) -> Result<BoxedStream, TransportError> {
            Err(TransportError::Unsupported("noop".to_string()))
        }
    }

    #[test]
    fn add_get_del() {
        load_default().unwrap();
        assert!(get("proxy").is_ok());
        assert!(get("datacenter").is_ok());

        add(Arc::new(NoopTransport));
        assert!(get("noop-for-registry-test").is_ok());
        let mut found = false;
        foreach(|name, _| {
            if name == "noop-for-registry-test" {
                found = true;
            }
        });
        assert!(found);

        del("noop-for-registry-test");
        let r = get("noop-for-registry-test");
        assert!(matches!(r, Err(TransportError::Unsupported(_))));
    }
}
