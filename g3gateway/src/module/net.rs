/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;

use super::addr::{Host, UpstreamAddr};

/// Open a tcp connection, domains are resolved by the system resolver.
pub(crate) async fn tcp_connect_to(addr: &UpstreamAddr) -> io::Result<TcpStream> {
    let stream = match addr.host() {
        Host::Ip(ip) => TcpStream::connect(SocketAddr::new(*ip, addr.port())).await?,
        Host::Domain(domain) => TcpStream::connect((domain.as_str(), addr.port())).await?,
    };
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let addr: UpstreamAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let (r1, r2) = tokio::join!(tcp_connect_to(&addr), listener.accept());
        assert!(r1.is_ok());
        assert!(r2.is_ok());
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let addr: UpstreamAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let e = tcp_connect_to(&addr).await.unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused);
    }
}
