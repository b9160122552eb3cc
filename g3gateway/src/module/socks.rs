/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::IpAddr;

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::addr::{Host, UpstreamAddr};

#[derive(Debug, Error)]
pub(crate) enum SocksConnectError {
    #[error("write failed: {0:?}")]
    WriteFailed(io::Error),
    #[error("read failed: {0:?}")]
    ReadFailed(io::Error),
    #[error("invalid version code")]
    InvalidVersion,
    #[error("invalid addr type")]
    InvalidAddrType,
    #[error("no auth method available")]
    NoAuthMethodAvailable,
    #[error("auth failed")]
    AuthFailed,
    #[error("invalid target address: {0}")]
    InvalidTarget(&'static str),
    #[error("request failed: {0}")]
    RequestFailed(&'static str),
}

impl From<io::Error> for SocksConnectError {
    fn from(e: io::Error) -> Self {
        SocksConnectError::ReadFailed(e)
    }
}

async fn write_all_flush<W>(writer: &mut W, buf: &[u8]) -> Result<(), SocksConnectError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(buf)
        .await
        .map_err(SocksConnectError::WriteFailed)?;
    writer.flush().await.map_err(SocksConnectError::WriteFailed)
}

fn socks4_reply_message(code: u8) -> &'static str {
    match code {
        91 => "request rejected or failed",
        92 => "request rejected because SOCKS server cannot connect to identd on the client",
        93 => "request rejected because the client program and identd report different user-ids",
        _ => "unassigned reply code",
    }
}

/// tcp connect through a socks4a proxy
pub(crate) async fn socks4a_connect_to<S>(
    stream: &mut S,
    addr: &UpstreamAddr,
) -> Result<(), SocksConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(0x04);
    buf.put_u8(0x01);
    buf.put_u16(addr.port());
    match addr.host() {
        Host::Ip(IpAddr::V4(ip4)) => {
            buf.put_slice(&ip4.octets());
            buf.put_u8(0x00);
        }
        Host::Ip(IpAddr::V6(_)) => {
            return Err(SocksConnectError::InvalidTarget(
                "ipv6 address is not supported by socks4",
            ));
        }
        Host::Domain(domain) => {
            buf.put_slice(&[0, 0, 0, 1]);
            buf.put_u8(0x00);
            buf.put_slice(domain.as_bytes());
            buf.put_u8(0x00);
        }
    }
    write_all_flush(stream, buf.as_ref()).await?;

    let mut rsp = [0u8; 8];
    stream.read_exact(&mut rsp).await?;
    if rsp[0] != 0x00 {
        return Err(SocksConnectError::InvalidVersion);
    }
    match rsp[1] {
        90 => Ok(()),
        code => Err(SocksConnectError::RequestFailed(socks4_reply_message(code))),
    }
}

async fn socks5_login<S>(
    stream: &mut S,
    auth: Option<(&str, &str)>,
) -> Result<(), SocksConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let methods: &[u8] = if auth.is_some() {
        &[0x05, 0x02, 0x00, 0x02]
    } else {
        &[0x05, 0x01, 0x00]
    };
    write_all_flush(stream, methods).await?;

    let mut rsp = [0u8; 2];
    stream.read_exact(&mut rsp).await?;
    if rsp[0] != 0x05 {
        return Err(SocksConnectError::InvalidVersion);
    }
    match (rsp[1], auth) {
        (0x00, _) => Ok(()),
        (0x02, Some((username, password))) => {
            if username.len() > 255 || password.len() > 255 {
                return Err(SocksConnectError::AuthFailed);
            }
            let mut buf = BytesMut::with_capacity(3 + username.len() + password.len());
            buf.put_u8(0x01);
            buf.put_u8(username.len() as u8);
            buf.put_slice(username.as_bytes());
            buf.put_u8(password.len() as u8);
            buf.put_slice(password.as_bytes());
            write_all_flush(stream, buf.as_ref()).await?;

            let mut rsp = [0u8; 2];
            stream.read_exact(&mut rsp).await?;
            if rsp[1] == 0x00 {
                Ok(())
            } else {
                Err(SocksConnectError::AuthFailed)
            }
        }
        _ => Err(SocksConnectError::NoAuthMethodAvailable),
    }
}

fn socks5_reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "General SOCKS server failure",
        0x02 => "Connection not allowed by ruleset",
        0x03 => "Network unreachable",
        0x04 => "Host unreachable",
        0x05 => "Connection refused",
        0x06 => "TTL expired",
        0x07 => "Command not supported",
        0x08 => "Address type not supported",
        0x09 => "Connection attempt timed out",
        _ => "unassigned reply code",
    }
}

/// tcp connect through a socks5 proxy
pub(crate) async fn socks5_connect_to<S>(
    stream: &mut S,
    auth: Option<(&str, &str)>,
    addr: &UpstreamAddr,
) -> Result<(), SocksConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    socks5_login(stream, auth).await?;

    let mut buf = BytesMut::with_capacity(256);
    buf.put_slice(&[0x05, 0x01, 0x00]);
    match addr.host() {
        Host::Domain(domain) => {
            if domain.len() > 255 {
                return Err(SocksConnectError::InvalidTarget("too long domain"));
            }
            buf.put_u8(0x03);
            buf.put_u8(domain.len() as u8);
            buf.put_slice(domain.as_bytes());
        }
        Host::Ip(IpAddr::V4(ip4)) => {
            buf.put_u8(0x01);
            buf.put_slice(&ip4.octets());
        }
        Host::Ip(IpAddr::V6(ip6)) => {
            buf.put_u8(0x04);
            buf.put_slice(&ip6.octets());
        }
    }
    buf.put_u16(addr.port());
    write_all_flush(stream, buf.as_ref()).await?;

    let mut rsp = [0u8; 4];
    stream.read_exact(&mut rsp).await?;
    if rsp[0] != 0x05 {
        return Err(SocksConnectError::InvalidVersion);
    }
    // skip the bind address
    let left = match rsp[3] {
        0x01 => 6,
        0x03 => stream.read_u8().await? as usize + 2,
        0x04 => 18,
        _ => return Err(SocksConnectError::InvalidAddrType),
    };
    let mut bind = [0u8; 257];
    stream.read_exact(&mut bind[..left]).await?;

    match rsp[1] {
        0x00 => Ok(()),
        code => Err(SocksConnectError::RequestFailed(socks5_reply_message(code))),
    }
}
