/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::Path;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, YamlLoader, yaml};

mod value;

mod server;
pub(crate) use server::{ServerConfig, ServerTlsConfig};

mod control;
pub(crate) use control::ControlConfig;

mod metrics;
pub(crate) use metrics::MetricsConfig;

mod project;
pub(crate) use project::StaticProjectConfig;

#[derive(Clone, Debug, Default)]
pub(crate) struct LogConfig {
    pub(crate) verbosity: Option<u8>,
}

/// The whole gateway config.
#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    pub(crate) server: ServerConfig,
    pub(crate) control: Option<ControlConfig>,
    pub(crate) metrics: MetricsConfig,
    pub(crate) static_projects: Vec<StaticProjectConfig>,
    pub(crate) log: LogConfig,
}

impl GatewayConfig {
    pub fn log_verbosity(&self) -> Option<u8> {
        self.log.verbosity
    }

    fn set(&mut self, k: &str, v: &Yaml, lookup_dir: Option<&Path>) -> anyhow::Result<()> {
        match value::normalize(k).as_str() {
            "server" => {
                let Yaml::Hash(map) = v else {
                    return Err(anyhow!("yaml value type for key {k} should be 'map'"));
                };
                self.server = ServerConfig::parse(map, lookup_dir)?;
                Ok(())
            }
            "control" => {
                let Yaml::Hash(map) = v else {
                    return Err(anyhow!("yaml value type for key {k} should be 'map'"));
                };
                self.control = Some(ControlConfig::parse(map, lookup_dir)?);
                Ok(())
            }
            "metrics" | "stat" => {
                self.metrics = MetricsConfig::parse(v)?;
                Ok(())
            }
            "static" | "projects" => {
                self.static_projects = project::parse_all(v, lookup_dir)?;
                Ok(())
            }
            "log" => {
                let Yaml::Hash(map) = v else {
                    return Err(anyhow!("yaml value type for key {k} should be 'map'"));
                };
                value::foreach_kv(map, |k, v| match value::normalize(k).as_str() {
                    "verbosity" | "verbose" => {
                        self.log.verbosity = Some(value::as_u8(v)?);
                        Ok(())
                    }
                    _ => Err(anyhow!("invalid key {k}")),
                })
            }
            _ => Err(anyhow!("invalid key {k} in main conf")),
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.control.is_none() && self.static_projects.is_empty() {
            return Err(anyhow!("neither control nor static projects is set"));
        }
        Ok(())
    }
}

fn load_doc(
    config: &mut GatewayConfig,
    map: &yaml::Hash,
    lookup_dir: Option<&Path>,
) -> anyhow::Result<()> {
    value::foreach_kv(map, |k, v| config.set(k, v, lookup_dir))
}

pub(crate) fn load_str(content: &str, lookup_dir: Option<&Path>) -> anyhow::Result<GatewayConfig> {
    let docs = YamlLoader::load_from_str(content).map_err(|e| anyhow!("invalid yaml: {e}"))?;
    let mut config = GatewayConfig::default();
    // allow multiple docs, and treat them as the same
    for (i, doc) in docs.iter().enumerate() {
        match doc {
            Yaml::Hash(map) => {
                load_doc(&mut config, map, lookup_dir).context(format!("invalid doc #{i}"))?
            }
            Yaml::Null => {}
            _ => return Err(anyhow!("yaml doc root should be hash")),
        }
    }
    config.check()?;
    Ok(config)
}

pub fn load(config_file: &Path) -> anyhow::Result<GatewayConfig> {
    let content = std::fs::read_to_string(config_file)
        .map_err(|e| anyhow!("failed to read config file {}: {e}", config_file.display()))?;
    let lookup_dir = config_file.parent();
    load_str(&content, lookup_dir)
        .context(format!("failed to load config file {}", config_file.display()))
}
