/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use humanize_rs::ParseError;
use humanize_rs::bytes::Bytes;
use yaml_rust::{Yaml, yaml};

pub(crate) fn normalize(raw: &str) -> String {
    raw.to_lowercase().replace('-', "_")
}

pub(crate) fn foreach_kv<F>(table: &yaml::Hash, mut f: F) -> anyhow::Result<()>
where
    F: FnMut(&str, &Yaml) -> anyhow::Result<()>,
{
    for (k, v) in table.iter() {
        if let Yaml::String(key) = k {
            f(key, v).context(format!("failed to parse value of key {key}"))?;
        } else {
            return Err(anyhow!("key in hash should be string"));
        }
    }
    Ok(())
}

pub(crate) fn as_bool(v: &Yaml) -> anyhow::Result<bool> {
    match v {
        Yaml::String(s) => match s.to_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Ok(true),
            "off" | "false" | "no" | "0" => Ok(false),
            _ => Err(anyhow!("invalid yaml string value for 'bool': {s}")),
        },
        Yaml::Boolean(value) => Ok(*value),
        Yaml::Integer(i) => Ok(*i != 0),
        _ => Err(anyhow!(
            "yaml value type for 'bool' should be 'boolean', 'string' or 'integer'"
        )),
    }
}

pub(crate) fn as_u8(v: &Yaml) -> anyhow::Result<u8> {
    match v {
        Yaml::String(s) => Ok(u8::from_str(s)?),
        Yaml::Integer(i) => Ok(u8::try_from(*i)?),
        _ => Err(anyhow!(
            "yaml value type for 'u8' should be 'string' or 'integer'"
        )),
    }
}

pub(crate) fn as_u64(v: &Yaml) -> anyhow::Result<u64> {
    match v {
        Yaml::String(s) => Ok(u64::from_str(s)?),
        Yaml::Integer(i) => Ok(u64::try_from(*i)?),
        _ => Err(anyhow!(
            "yaml value type for 'u64' should be 'string' or 'integer'"
        )),
    }
}

pub(crate) fn as_string(v: &Yaml) -> anyhow::Result<String> {
    match v {
        Yaml::String(s) => Ok(s.to_string()),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Real(s) => Ok(s.to_string()),
        _ => Err(anyhow!(
            "yaml value type for string should be 'string' / 'integer' / 'real'"
        )),
    }
}

pub(crate) fn as_socket_addr(v: &Yaml) -> anyhow::Result<SocketAddr> {
    match v {
        Yaml::String(s) => {
            SocketAddr::from_str(s).map_err(|e| anyhow!("invalid socket address {s}: {e}"))
        }
        _ => Err(anyhow!("yaml value type for socket address should be 'string'")),
    }
}

/// A humanized size, like `64KiB`, or a plain integer.
pub(crate) fn as_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(value) => {
            let v = value.parse::<Bytes>()?;
            Ok(v.size())
        }
        Yaml::Integer(value) => Ok(usize::try_from(*value)?),
        _ => Err(anyhow!(
            "yaml value type for humanize usize should be 'string' or 'integer'"
        )),
    }
}

/// A humanized duration, like `10s`, or a plain integer in seconds.
pub(crate) fn as_duration(v: &Yaml) -> anyhow::Result<Duration> {
    match v {
        Yaml::String(value) => match humanize_rs::duration::parse(value) {
            Ok(v) => Ok(v),
            Err(ParseError::MissingUnit) => {
                if let Ok(u) = u64::from_str(value) {
                    Ok(Duration::from_secs(u))
                } else if let Ok(f) = f64::from_str(value) {
                    Duration::try_from_secs_f64(f).map_err(anyhow::Error::new)
                } else {
                    Err(anyhow!("invalid duration string"))
                }
            }
            Err(e) => Err(anyhow!("invalid humanize duration string: {e}")),
        },
        Yaml::Integer(value) => {
            if let Ok(u) = u64::try_from(*value) {
                Ok(Duration::from_secs(u))
            } else {
                Err(anyhow!("unsupported duration string"))
            }
        }
        Yaml::Real(s) => {
            let f = f64::from_str(s).map_err(|e| anyhow!("invalid f64 value: {e}"))?;
            Duration::try_from_secs_f64(f).map_err(anyhow::Error::new)
        }
        _ => Err(anyhow!(
            "yaml value type for humanize duration should be 'string' or 'integer' or 'real'"
        )),
    }
}

fn as_file_path(v: &Yaml, lookup_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let Yaml::String(path) = v else {
        return Err(anyhow!("yaml value type for path should be string"));
    };
    let path = PathBuf::from_str(path).map_err(|e| anyhow!("invalid path: {e:?}"))?;
    let path = match lookup_dir {
        Some(dir) if !path.is_absolute() => dir.join(path),
        _ => path,
    };
    if !path.is_file() {
        return Err(anyhow!("path {} is not a regular file", path.display()));
    }
    Ok(path)
}

/// PEM content, either inline or read from a file path.
pub(crate) fn as_pem_content(v: &Yaml, lookup_dir: Option<&Path>) -> anyhow::Result<String> {
    if let Yaml::String(s) = v {
        if s.trim_start().starts_with("-----BEGIN ") {
            return Ok(s.to_string());
        }
    }
    let path = as_file_path(v, lookup_dir)?;
    std::fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read file {}: {e}", path.display()))
}

/// Convert a yaml value to json, used for opaque transport configs.
pub(crate) fn as_json(v: &Yaml) -> anyhow::Result<serde_json::Value> {
    match v {
        Yaml::Null => Ok(serde_json::Value::Null),
        Yaml::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        Yaml::Integer(i) => Ok(serde_json::Value::from(*i)),
        Yaml::Real(s) => {
            let f = f64::from_str(s).map_err(|e| anyhow!("invalid f64 value: {e}"))?;
            Ok(serde_json::Value::from(f))
        }
        Yaml::String(s) => Ok(serde_json::Value::String(s.to_string())),
        Yaml::Array(seq) => {
            let mut arr = Vec::with_capacity(seq.len());
            for (i, v) in seq.iter().enumerate() {
                arr.push(as_json(v).context(format!("invalid value for element #{i}"))?);
            }
            Ok(serde_json::Value::Array(arr))
        }
        Yaml::Hash(map) => {
            let mut obj = serde_json::Map::with_capacity(map.len());
            foreach_kv(map, |k, v| {
                obj.insert(k.to_string(), as_json(v)?);
                Ok(())
            })?;
            Ok(serde_json::Value::Object(obj))
        }
        _ => Err(anyhow!("unsupported yaml value type")),
    }
}
