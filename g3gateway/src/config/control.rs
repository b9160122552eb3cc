/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use url::Url;
use yaml_rust::{Yaml, yaml};

use super::value;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_JWT_EXPIRATION: Duration = Duration::from_secs(60);

/// Where and how to reach the remote control plane.
#[derive(Clone, Debug)]
pub(crate) struct ControlConfig {
    pub(crate) url: Url,
    pub(crate) useragent: String,
    pub(crate) timeout: Duration,
    pub(crate) jwt_secret: String,
    pub(crate) jwt_expiration: Duration,
    pub(crate) ca_certificate: Option<String>,
    pub(crate) max_header_size: usize,
}

impl ControlConfig {
    fn new(url: Url) -> Self {
        ControlConfig {
            url,
            useragent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            timeout: DEFAULT_TIMEOUT,
            jwt_secret: String::new(),
            jwt_expiration: DEFAULT_JWT_EXPIRATION,
            ca_certificate: None,
            max_header_size: 64 * 1024,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(url: Url, jwt_secret: &str) -> Self {
        let mut config = ControlConfig::new(url);
        config.jwt_secret = jwt_secret.to_string();
        config
    }

    pub(super) fn parse(map: &yaml::Hash, lookup_dir: Option<&Path>) -> anyhow::Result<Self> {
        let url = match map.get(&Yaml::String("url".to_string())) {
            Some(Yaml::String(s)) => Url::parse(s).map_err(|e| anyhow!("invalid url {s}: {e}"))?,
            Some(_) => return Err(anyhow!("yaml value type for key url should be 'string'")),
            None => return Err(anyhow!("no control url set")),
        };
        let mut config = ControlConfig::new(url);
        value::foreach_kv(map, |k, v| config.set(k, v, lookup_dir))?;
        config.check()?;
        Ok(config)
    }

    fn set(&mut self, k: &str, v: &Yaml, lookup_dir: Option<&Path>) -> anyhow::Result<()> {
        match value::normalize(k).as_str() {
            "url" => Ok(()),
            "useragent" | "user_agent" => {
                self.useragent = value::as_string(v)?;
                Ok(())
            }
            "timeout" => {
                self.timeout = value::as_duration(v)?;
                Ok(())
            }
            "jwt" => {
                let Yaml::Hash(map) = v else {
                    return Err(anyhow!("yaml value type for key {k} should be 'map'"));
                };
                value::foreach_kv(map, |k, v| match value::normalize(k).as_str() {
                    "secret" => {
                        self.jwt_secret = value::as_string(v)?;
                        Ok(())
                    }
                    "expiration" | "expire" => {
                        self.jwt_expiration = value::as_duration(v)?;
                        Ok(())
                    }
                    _ => Err(anyhow!("invalid key {k}")),
                })
            }
            "ca_certificate" => {
                let pem = value::as_pem_content(v, lookup_dir)
                    .context(format!("invalid certificate value for key {k}"))?;
                self.ca_certificate = Some(pem);
                Ok(())
            }
            "max_header_size" => {
                self.max_header_size = value::as_usize(v)?;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        match self.url.scheme() {
            "http" | "https" => {}
            s => return Err(anyhow!("unsupported control url scheme {s}")),
        }
        if self.url.host_str().is_none() {
            return Err(anyhow!("no host found in control url"));
        }
        if self.jwt_secret.is_empty() {
            return Err(anyhow!("no jwt secret set"));
        }
        if self.timeout.is_zero() {
            return Err(anyhow!("control timeout should not be zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yaml_rust::YamlLoader;

    fn parse(s: &str) -> anyhow::Result<ControlConfig> {
        let doc = YamlLoader::load_from_str(s).unwrap().remove(0);
        let Yaml::Hash(map) = doc else {
            panic!("not a map");
        };
        ControlConfig::parse(&map, None)
    }

    #[test]
    fn parse_full() {
        let config = parse(
            "url: http://localhost:8890/api/scraper\nuseragent: gw/1\ntimeout: 3s\n\
             jwt:\n  secret: abc\n  expiration: 120",
        )
        .unwrap();
        assert_eq!(config.url.as_str(), "http://localhost:8890/api/scraper");
        assert_eq!(config.useragent, "gw/1");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.jwt_secret, "abc");
        assert_eq!(config.jwt_expiration, Duration::from_secs(120));
    }

    #[test]
    fn reject_invalid() {
        assert!(parse("timeout: 3s").is_err());
        assert!(parse("url: ftp://localhost/\njwt:\n  secret: abc").is_err());
        assert!(parse("url: http://localhost/").is_err());
    }
}
