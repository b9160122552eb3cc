/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, yaml};

use super::value;

const DEFAULT_LISTEN_PORT: u16 = 8888;
const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TLS_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ServerTlsConfig {
    pub(crate) certificate: String,
    pub(crate) private_key: String,
}

#[derive(Clone, Debug)]
pub(crate) struct ServerConfig {
    pub(crate) listen: SocketAddr,
    pub(crate) tls: Option<ServerTlsConfig>,
    pub(crate) max_header_size: usize,
    pub(crate) request_timeout: Duration,
    pub(crate) tls_accept_timeout: Duration,
    pub(crate) track_sockets: bool,
    pub(crate) task_log: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), DEFAULT_LISTEN_PORT),
            tls: None,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tls_accept_timeout: DEFAULT_TLS_ACCEPT_TIMEOUT,
            track_sockets: true,
            task_log: true,
        }
    }
}

impl ServerConfig {
    pub(super) fn parse(map: &yaml::Hash, lookup_dir: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = ServerConfig::default();
        value::foreach_kv(map, |k, v| config.set(k, v, lookup_dir))?;
        config.check()?;
        Ok(config)
    }

    fn set(&mut self, k: &str, v: &Yaml, lookup_dir: Option<&Path>) -> anyhow::Result<()> {
        match value::normalize(k).as_str() {
            "listen" => {
                self.listen = match v {
                    Yaml::Integer(_) => {
                        let port = value::as_u64(v)?;
                        let port = u16::try_from(port).map_err(|_| anyhow!("invalid port"))?;
                        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)
                    }
                    _ => value::as_socket_addr(v)?,
                };
                Ok(())
            }
            "tls" | "tls_server" => {
                let Yaml::Hash(map) = v else {
                    return Err(anyhow!("yaml value type for key {k} should be 'map'"));
                };
                self.tls = Some(parse_tls(map, lookup_dir)?);
                Ok(())
            }
            "max_header_size" => {
                self.max_header_size = value::as_usize(v)?;
                Ok(())
            }
            "request_timeout" | "header_timeout" => {
                self.request_timeout = value::as_duration(v)?;
                Ok(())
            }
            "tls_accept_timeout" | "handshake_timeout" => {
                self.tls_accept_timeout = value::as_duration(v)?;
                Ok(())
            }
            "track_sockets" => {
                self.track_sockets = value::as_bool(v)?;
                Ok(())
            }
            "task_log" => {
                self.task_log = value::as_bool(v)?;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.listen.port() == 0 {
            return Err(anyhow!("no valid listen port set"));
        }
        if self.max_header_size < 1024 {
            return Err(anyhow!("max header size should be at least 1KiB"));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("request timeout should not be zero"));
        }
        Ok(())
    }
}

fn parse_tls(map: &yaml::Hash, lookup_dir: Option<&Path>) -> anyhow::Result<ServerTlsConfig> {
    let mut certificate = None;
    let mut private_key = None;
    value::foreach_kv(map, |k, v| match value::normalize(k).as_str() {
        "certificate" | "cert" => {
            let pem = value::as_pem_content(v, lookup_dir)
                .context(format!("invalid certificate value for key {k}"))?;
            certificate = Some(pem);
            Ok(())
        }
        "private_key" | "key" => {
            let pem = value::as_pem_content(v, lookup_dir)
                .context(format!("invalid private key value for key {k}"))?;
            private_key = Some(pem);
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k}")),
    })?;

    let Some(certificate) = certificate else {
        return Err(anyhow!("no certificate set"));
    };
    let Some(private_key) = private_key else {
        return Err(anyhow!("no private key set"));
    };
    Ok(ServerTlsConfig {
        certificate,
        private_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use yaml_rust::YamlLoader;

    fn parse(s: &str) -> anyhow::Result<ServerConfig> {
        let doc = YamlLoader::load_from_str(s).unwrap().remove(0);
        let Yaml::Hash(map) = doc else {
            panic!("not a map");
        };
        ServerConfig::parse(&map, None)
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen.port(), 8888);
        assert_eq!(config.max_header_size, 65536);
        assert_eq!(config.tls_accept_timeout, Duration::from_secs(10));
        assert!(config.track_sockets);
    }

    #[test]
    fn parse_keys() {
        let config = parse(
            "listen: 127.0.0.1:9090\nmax-header-size: 16KiB\nrequest_timeout: 5s\ntrack_sockets: off",
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.max_header_size, 16384);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(!config.track_sockets);

        let config = parse("listen: 3128").unwrap();
        assert_eq!(config.listen.port(), 3128);
    }

    #[test]
    fn reject_invalid() {
        assert!(parse("unknown: 1").is_err());
        assert!(parse("max_header_size: 10").is_err());
        assert!(parse("tls:\n  certificate: /nonexistent/cert.pem").is_err());
    }
}
