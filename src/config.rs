use crate::common::net::{is_host_port, parse_http_url};
use crate::probe::{Labels, ProbeClass};
use crate::probe_engine::{DEFAULT_MAX_READ_BYTES, HttpProbe, TcpProbe};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no probe definitions file given and no config directory available")]
    NoConfigPath,
    #[error("probe name must not be empty")]
    EmptyName,
    #[error("probe {0:?} is defined more than once")]
    DuplicateName(String),
    #[error("probe {name:?}: interval_secs must be a positive number (got {value})")]
    InvalidInterval { name: String, value: f64 },
    #[error("probe {name:?}: invalid url {url:?}")]
    InvalidUrl { name: String, url: String },
    #[error("probe {name:?}: address {addr:?} is not host:port")]
    InvalidAddr { name: String, addr: String },
}

/// Contents of a probe definitions file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProbesFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread: Option<bool>,
    #[serde(default)]
    pub probes: Vec<ProbeDefinition>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeDefinition {
    pub name: String,
    pub interval_secs: f64,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(flatten)]
    pub check: CheckConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckConfig {
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        want_text: Option<String>,
        #[serde(default = "default_max_read_bytes")]
        max_read_bytes: u64,
    },
    Tcp {
        addr: String,
    },
}

fn default_max_read_bytes() -> u64 {
    DEFAULT_MAX_READ_BYTES
}

impl ProbesFile {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for definition in &self.probes {
            definition.validate()?;
            if !seen.insert(definition.name.as_str()) {
                return Err(ConfigError::DuplicateName(definition.name.clone()));
            }
        }
        Ok(())
    }
}

impl ProbeDefinition {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        self.interval()?;
        self.probe_class().map(|_| ())
    }

    pub fn interval(&self) -> Result<Duration, ConfigError> {
        let value = self.interval_secs;
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigError::InvalidInterval {
                name: self.name.clone(),
                value,
            });
        }
        Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidInterval {
            name: self.name.clone(),
            value,
        })
    }

    /// Builds the target; the class label defaults to the check kind.
    pub fn probe_class(&self) -> Result<ProbeClass, ConfigError> {
        let class = match &self.check {
            CheckConfig::Http {
                url,
                want_text,
                max_read_bytes,
            } => {
                let parsed = parse_http_url(url).ok_or_else(|| ConfigError::InvalidUrl {
                    name: self.name.clone(),
                    url: url.clone(),
                })?;
                let mut probe = HttpProbe::new(parsed).max_read_bytes(*max_read_bytes);
                if let Some(text) = want_text {
                    probe = probe.want_text(text.clone());
                }
                ProbeClass::from(probe)
            }
            CheckConfig::Tcp { addr } => {
                if !is_host_port(addr) {
                    return Err(ConfigError::InvalidAddr {
                        name: self.name.clone(),
                        addr: addr.clone(),
                    });
                }
                ProbeClass::from(TcpProbe::new(addr.trim()))
            }
        };
        Ok(match &self.class {
            Some(name) => class.with_class(name.clone()),
            None => class,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "namespace": "edge",
        "probes": [
            {
                "name": "api",
                "interval_secs": 15,
                "labels": {"region": "eu"},
                "kind": "http",
                "url": "api.example.com/healthz",
                "want_text": "ok"
            },
            {
                "name": "db",
                "interval_secs": 2.5,
                "class": "database",
                "kind": "tcp",
                "addr": "db.internal:5432"
            }
        ]
    }"#;

    fn parse(json: &str) -> ProbesFile {
        serde_json::from_str(json).expect("parse")
    }

    #[test]
    fn parses_http_and_tcp_definitions() {
        let file = parse(SAMPLE);
        file.validate().expect("valid");
        assert_eq!(file.namespace.as_deref(), Some("edge"));
        assert_eq!(file.spread, None);
        assert_eq!(file.probes.len(), 2);

        let api = &file.probes[0];
        assert_eq!(api.interval().expect("interval"), Duration::from_secs(15));
        match &api.check {
            CheckConfig::Http {
                max_read_bytes,
                want_text,
                ..
            } => {
                assert_eq!(*max_read_bytes, DEFAULT_MAX_READ_BYTES);
                assert_eq!(want_text.as_deref(), Some("ok"));
            }
            other => panic!("unexpected check {other:?}"),
        }
        assert_eq!(api.probe_class().expect("class").class(), "http");

        let db = &file.probes[1];
        assert_eq!(db.interval().expect("interval"), Duration::from_millis(2500));
        assert_eq!(db.probe_class().expect("class").class(), "database");
    }

    #[test]
    fn rejects_duplicate_names() {
        let file = parse(
            r#"{"probes": [
                {"name": "a", "interval_secs": 1, "kind": "tcp", "addr": "h:1"},
                {"name": "a", "interval_secs": 1, "kind": "tcp", "addr": "h:2"}
            ]}"#,
        );
        match file.validate() {
            Err(ConfigError::DuplicateName(name)) => assert_eq!(name, "a"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_non_positive_interval() {
        let file = parse(
            r#"{"probes": [{"name": "a", "interval_secs": 0, "kind": "tcp", "addr": "h:1"}]}"#,
        );
        assert!(matches!(
            file.validate(),
            Err(ConfigError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn rejects_bad_targets() {
        let bad_url = parse(
            r#"{"probes": [{"name": "a", "interval_secs": 1, "kind": "http", "url": "ftp://x"}]}"#,
        );
        assert!(matches!(
            bad_url.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));

        let bad_addr = parse(
            r#"{"probes": [{"name": "a", "interval_secs": 1, "kind": "tcp", "addr": "nohost"}]}"#,
        );
        assert!(matches!(
            bad_addr.validate(),
            Err(ConfigError::InvalidAddr { .. })
        ));
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let result = serde_json::from_str::<ProbesFile>(
            r#"{"probes": [{"name": "a", "interval_secs": 1, "kind": "icmp"}]}"#,
        );
        assert!(result.is_err());
    }
}
