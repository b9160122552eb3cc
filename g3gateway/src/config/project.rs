/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, yaml};

use super::value;
use crate::control::{Certificate, ProjectStatus, ProjectToConnect, ProxyToConnect};

/// A project served by the built-in control plane.
#[derive(Clone, Debug)]
pub(crate) struct StaticProjectConfig {
    pub(crate) token: String,
    pub(crate) project: ProjectToConnect,
    pub(crate) proxies: Vec<ProxyToConnect>,
}

pub(super) fn parse_all(
    v: &Yaml,
    lookup_dir: Option<&Path>,
) -> anyhow::Result<Vec<StaticProjectConfig>> {
    let Yaml::Array(seq) = v else {
        return Err(anyhow!("yaml value type for static projects should be 'array'"));
    };
    let mut projects = Vec::with_capacity(seq.len());
    for (i, v) in seq.iter().enumerate() {
        let Yaml::Hash(map) = v else {
            return Err(anyhow!("yaml value type for project #{i} should be 'map'"));
        };
        let project = parse_project(map, lookup_dir).context(format!("invalid project #{i}"))?;
        if projects
            .iter()
            .any(|p: &StaticProjectConfig| p.token == project.token)
        {
            return Err(anyhow!("duplicate token for project #{i}"));
        }
        projects.push(project);
    }
    Ok(projects)
}

fn as_project_status(v: &Yaml) -> anyhow::Result<ProjectStatus> {
    let s = value::as_string(v)?;
    match s.to_lowercase().as_str() {
        "off" => Ok(ProjectStatus::Off),
        "calm" => Ok(ProjectStatus::Calm),
        "hot" => Ok(ProjectStatus::Hot),
        _ => Err(anyhow!("invalid project status {s}")),
    }
}

fn parse_certificate(v: &Yaml, lookup_dir: Option<&Path>) -> anyhow::Result<Certificate> {
    let Yaml::Hash(map) = v else {
        return Err(anyhow!("yaml value type for certificate should be 'map'"));
    };
    let mut cert = None;
    let mut key = None;
    value::foreach_kv(map, |k, v| match value::normalize(k).as_str() {
        "cert" | "certificate" => {
            cert = Some(value::as_pem_content(v, lookup_dir)?);
            Ok(())
        }
        "key" | "private_key" => {
            key = Some(value::as_pem_content(v, lookup_dir)?);
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k}")),
    })?;
    match (cert, key) {
        (Some(cert), Some(key)) => Ok(Certificate { cert, key }),
        (None, _) => Err(anyhow!("no certificate set")),
        (_, None) => Err(anyhow!("no private key set")),
    }
}

fn parse_project(
    map: &yaml::Hash,
    lookup_dir: Option<&Path>,
) -> anyhow::Result<StaticProjectConfig> {
    let mut token = String::new();
    let mut project = ProjectToConnect {
        id: String::new(),
        status: ProjectStatus::Hot,
        certificate: None,
        cookie_session: false,
        useragent_override: false,
        auto_scale_up: false,
    };
    let mut proxies = Vec::new();

    value::foreach_kv(map, |k, v| match value::normalize(k).as_str() {
        "token" => {
            token = value::as_string(v)?;
            Ok(())
        }
        "id" => {
            project.id = value::as_string(v)?;
            Ok(())
        }
        "status" => {
            project.status = as_project_status(v)?;
            Ok(())
        }
        "certificate" => {
            project.certificate = Some(parse_certificate(v, lookup_dir)?);
            Ok(())
        }
        "cookie_session" => {
            project.cookie_session = value::as_bool(v)?;
            Ok(())
        }
        "useragent_override" => {
            project.useragent_override = value::as_bool(v)?;
            Ok(())
        }
        "auto_scale_up" => {
            project.auto_scale_up = value::as_bool(v)?;
            Ok(())
        }
        "proxies" => {
            let Yaml::Array(seq) = v else {
                return Err(anyhow!("yaml value type for key {k} should be 'array'"));
            };
            for (i, v) in seq.iter().enumerate() {
                let Yaml::Hash(map) = v else {
                    return Err(anyhow!("yaml value type for proxy #{i} should be 'map'"));
                };
                let proxy = parse_proxy(map).context(format!("invalid proxy #{i}"))?;
                proxies.push(proxy);
            }
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k}")),
    })?;

    if token.is_empty() {
        return Err(anyhow!("no token set"));
    }
    if project.id.is_empty() {
        return Err(anyhow!("no project id set"));
    }
    for proxy in proxies.iter_mut() {
        proxy.project_id.clone_from(&project.id);
    }
    Ok(StaticProjectConfig {
        token,
        project,
        proxies,
    })
}

fn parse_proxy(map: &yaml::Hash) -> anyhow::Result<ProxyToConnect> {
    let mut proxy = ProxyToConnect {
        id: String::new(),
        transport_type: String::new(),
        project_id: String::new(),
        connector_id: String::new(),
        key: String::new(),
        config: serde_json::Value::Null,
        useragent: String::new(),
        timeout_disconnected: 10_000,
    };

    value::foreach_kv(map, |k, v| match value::normalize(k).as_str() {
        "id" => {
            proxy.id = value::as_string(v)?;
            Ok(())
        }
        "type" | "transport" => {
            proxy.transport_type = value::as_string(v)?;
            Ok(())
        }
        "connector_id" | "connector" => {
            proxy.connector_id = value::as_string(v)?;
            Ok(())
        }
        "key" => {
            proxy.key = value::as_string(v)?;
            Ok(())
        }
        "useragent" | "user_agent" => {
            proxy.useragent = value::as_string(v)?;
            Ok(())
        }
        "timeout_disconnected" => {
            let timeout: Duration = value::as_duration(v)?;
            proxy.timeout_disconnected = u64::try_from(timeout.as_millis())?;
            Ok(())
        }
        "config" => {
            proxy.config = value::as_json(v)?;
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k}")),
    })?;

    if proxy.transport_type.is_empty() {
        return Err(anyhow!("no transport type set"));
    }
    if proxy.connector_id.is_empty() {
        return Err(anyhow!("no connector id set"));
    }
    if proxy.key.is_empty() {
        return Err(anyhow!("no proxy key set"));
    }
    if proxy.id.is_empty() {
        proxy.id = format!("{}:{}", proxy.connector_id, proxy.key);
    }
    Ok(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yaml_rust::YamlLoader;

    #[test]
    fn parse() {
        let doc = YamlLoader::load_from_str(
            r#"
- token: dG9rZW4=
  id: p1
  status: calm
  cookie-session: true
  auto_scale_up: yes
  proxies:
    - type: proxy
      connector_id: c1
      key: k1
      timeout_disconnected: 500ms
      config:
        type: HTTP
        address:
          hostname: 127.0.0.1
          port: 3128
"#,
        )
        .unwrap()
        .remove(0);
        let projects = parse_all(&doc, None).unwrap();
        assert_eq!(projects.len(), 1);
        let p = &projects[0];
        assert_eq!(p.token, "dG9rZW4=");
        assert_eq!(p.project.status, ProjectStatus::Calm);
        assert!(p.project.cookie_session);
        assert!(p.project.auto_scale_up);
        assert_eq!(p.proxies.len(), 1);
        let proxy = &p.proxies[0];
        assert_eq!(proxy.id, "c1:k1");
        assert_eq!(proxy.project_id, "p1");
        assert_eq!(proxy.timeout_disconnected, 500);
        assert_eq!(proxy.config["address"]["port"], 3128);
    }

    #[test]
    fn reject_duplicate_token() {
        let doc = YamlLoader::load_from_str("- {token: a, id: p1}\n- {token: a, id: p2}")
            .unwrap()
            .remove(0);
        assert!(parse_all(&doc, None).is_err());
    }
}
