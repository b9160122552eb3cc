/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

use anyhow::anyhow;
use url::Url;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

impl Host {
    fn from_maybe_mapped_ip6(ip6: Ipv6Addr) -> Self {
        if let Some(ip4) = ip6.to_ipv4_mapped() {
            Host::Ip(IpAddr::V4(ip4))
        } else {
            Host::Ip(IpAddr::V6(ip6))
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(ip) => write!(f, "{ip}"),
            Host::Domain(domain) => write!(f, "{domain}"),
        }
    }
}

impl From<url::Host> for Host {
    fn from(v: url::Host) -> Self {
        match v {
            url::Host::Ipv4(ip4) => Host::Ip(IpAddr::V4(ip4)),
            url::Host::Ipv6(ip6) => Host::from_maybe_mapped_ip6(ip6),
            url::Host::Domain(domain) => Host::Domain(domain),
        }
    }
}

impl FromStr for Host {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(anyhow!("empty string"));
        }
        if let Some(v) = s.strip_prefix('[') {
            let Some(v) = v.strip_suffix(']') else {
                return Err(anyhow!("invalid ipv6 ip in squared brackets"));
            };
            let ip6 = Ipv6Addr::from_str(v).map_err(|_| anyhow!("invalid ipv6 ip"))?;
            return Ok(Host::from_maybe_mapped_ip6(ip6));
        }
        if let Ok(ip) = IpAddr::from_str(s) {
            return match ip {
                IpAddr::V4(_) => Ok(Host::Ip(ip)),
                IpAddr::V6(ip6) => Ok(Host::from_maybe_mapped_ip6(ip6)),
            };
        }
        if s.bytes().any(|c| c.is_ascii_whitespace() || c == b'/' || c == b'@') {
            return Err(anyhow!("invalid domain {s}"));
        }
        Ok(Host::Domain(s.to_ascii_lowercase()))
    }
}

/// A `host:port` pair.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct UpstreamAddr {
    host: Host,
    port: u16,
}

impl UpstreamAddr {
    pub fn new(host: Host, port: u16) -> Self {
        UpstreamAddr { host, port }
    }

    #[inline]
    pub fn host(&self) -> &Host {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The host part as used in URLs, IPv6 addresses in brackets.
    pub fn host_str(&self) -> String {
        match &self.host {
            Host::Ip(IpAddr::V6(ip6)) => format!("[{ip6}]"),
            host => host.to_string(),
        }
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ip(IpAddr::V6(ip6)) => write!(f, "[{ip6}]:{}", self.port),
            host => write!(f, "{host}:{}", self.port),
        }
    }
}

impl FromStr for UpstreamAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(p) = s.rfind(':') else {
            return Err(anyhow!("no port found"));
        };
        let host_part = &s[..p];
        if host_part.starts_with(':') || (host_part.contains(':') && !host_part.starts_with('[')) {
            return Err(anyhow!("ipv6 address should be in squared brackets"));
        }
        let host = Host::from_str(host_part)?;
        let port = u16::from_str(&s[p + 1..]).map_err(|e| anyhow!("invalid port: {e}"))?;
        if port == 0 {
            return Err(anyhow!("invalid port 0"));
        }
        Ok(UpstreamAddr { host, port })
    }
}

/// An absolute `http` or `https` request target.
#[derive(Debug, Clone)]
pub struct TargetUrl {
    https: bool,
    addr: UpstreamAddr,
    path_and_query: String,
}

impl TargetUrl {
    pub fn new(https: bool, addr: UpstreamAddr, path_and_query: &str) -> Self {
        let path_and_query = if path_and_query.is_empty() {
            "/".to_string()
        } else {
            path_and_query.to_string()
        };
        TargetUrl {
            https,
            addr,
            path_and_query,
        }
    }

    #[inline]
    pub fn is_https(&self) -> bool {
        self.https
    }

    #[inline]
    pub fn addr(&self) -> &UpstreamAddr {
        &self.addr
    }

    #[inline]
    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    #[inline]
    fn default_port(&self) -> u16 {
        if self.https { 443 } else { 80 }
    }

    /// The `Host` header value sent to the next hop.
    pub fn host_header(&self) -> String {
        self.addr.to_string()
    }

    /// The absolute-form request target.
    pub fn absolute_form(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        if self.addr.port == self.default_port() {
            format!("{scheme}://{}{}", self.addr.host_str(), self.path_and_query)
        } else {
            format!("{scheme}://{}{}", self.addr, self.path_and_query)
        }
    }
}

impl FromStr for TargetUrl {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s).map_err(|e| anyhow!("invalid url: {e}"))?;
        let https = match url.scheme() {
            "http" => false,
            "https" => true,
            scheme => return Err(anyhow!("unsupported scheme {scheme}")),
        };
        let Some(host) = url.host() else {
            return Err(anyhow!("no host found"));
        };
        let host = Host::from(host.to_owned());
        let Some(port) = url.port_or_known_default() else {
            return Err(anyhow!("no port found"));
        };
        let path_and_query = match url.query() {
            Some(q) => format!("{}?{q}", url.path()),
            None => url.path().to_string(),
        };
        Ok(TargetUrl::new(
            https,
            UpstreamAddr::new(host, port),
            &path_and_query,
        ))
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.absolute_form())
    }
}
