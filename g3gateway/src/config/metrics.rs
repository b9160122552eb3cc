/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use anyhow::anyhow;
use yaml_rust::Yaml;

use super::value;

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub(crate) struct MetricsConfig {
    pub(crate) flush_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl MetricsConfig {
    pub(super) fn parse(v: &Yaml) -> anyhow::Result<Self> {
        let mut config = MetricsConfig::default();
        match v {
            Yaml::Hash(map) => {
                value::foreach_kv(map, |k, v| match value::normalize(k).as_str() {
                    "flush_interval" | "emit_interval" => {
                        config.flush_interval = value::as_duration(v)?;
                        Ok(())
                    }
                    _ => Err(anyhow!("invalid key {k}")),
                })?;
            }
            _ => {
                config.flush_interval = value::as_duration(v)?;
            }
        }
        if config.flush_interval.is_zero() {
            return Err(anyhow!("flush interval should not be zero"));
        }
        Ok(config)
    }
}
