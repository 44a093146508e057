//! Pipeline configuration
//!
//! Loaded from a YAML file (path overridable via `VIGIL_CONFIG`), with a
//! usable default when the file is missing or invalid. Debug flag and the
//! SNMP backend selector live here so they can be passed explicitly into
//! the crash snapshotter instead of being ambient globals.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, path::PathBuf};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Root of the cache areas (agent/, snmpwalks/, piggyback/)
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,
    /// Directory crash report bundles are persisted to
    #[serde(default = "default_crash_root")]
    pub crash_root: PathBuf,
    /// Pre-recorded SNMP walks for the stored-walk backend
    #[serde(default = "default_walk_dir")]
    pub walk_dir: PathBuf,
    /// Re-raise the original error instead of degrading when crash
    /// reporting itself fails (interactive diagnosis)
    #[serde(default)]
    pub debug: bool,
    /// SNMP transport backend in use, annotated into check crash reports
    #[serde(default)]
    pub snmp_backend: SnmpBackendKind,
    /// TCP port agents listen on
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    /// Upper bound for one host's fetch stage, seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Monitored hosts
    #[serde(default)]
    pub hosts: HashMap<String, HostConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct HostConf {
    /// Address to contact the agent on; host name is used when absent
    pub address: Option<String>,
    /// Per-host agent port override
    pub agent_port: Option<u16>,
    /// Skip the agent transport for this host
    #[serde(default)]
    pub no_agent: bool,
    /// Query SNMP for this host
    #[serde(default)]
    pub snmp: bool,
}

/// Selector for the SNMP transport backend
///
/// The pipeline only records which backend produced a payload; check crash
/// reports carry an `inline_snmp` flag for support triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnmpBackendKind {
    /// Replay a pre-recorded walk from the cache area
    #[default]
    StoredWalk,
    /// Spawned command-line walker
    Classic,
    /// In-process SNMP engine
    Inline,
}

impl SnmpBackendKind {
    pub fn is_inline(self) -> bool {
        matches!(self, SnmpBackendKind::Inline)
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("./data/cache")
}

fn default_crash_root() -> PathBuf {
    PathBuf::from("./data/crashes")
}

fn default_walk_dir() -> PathBuf {
    PathBuf::from("./data/walks")
}

fn default_agent_port() -> u16 {
    6556
}

fn default_fetch_timeout() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            crash_root: default_crash_root(),
            walk_dir: default_walk_dir(),
            debug: false,
            snmp_backend: SnmpBackendKind::default(),
            agent_port: default_agent_port(),
            fetch_timeout_secs: default_fetch_timeout(),
            hosts: HashMap::new(),
        }
    }
}

pub async fn load_config() -> PipelineConfig {
    let path = std::env::var("VIGIL_CONFIG").unwrap_or_else(|_| "vigil.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return PipelineConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!("invalid config {path}: {e}");
            PipelineConfig::default()
        })
    } else {
        warn!("no {path}, using default config");
        PipelineConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.agent_port, 6556);
        assert_eq!(config.snmp_backend, SnmpBackendKind::StoredWalk);
        assert!(!config.debug);
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
cache_root: /var/lib/vigil/cache
debug: true
snmp_backend: inline
hosts:
  web-01:
    address: 10.0.0.5
    snmp: true
  db-01: {}
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.debug);
        assert!(config.snmp_backend.is_inline());
        assert_eq!(config.hosts["web-01"].address.as_deref(), Some("10.0.0.5"));
        assert!(!config.hosts["db-01"].snmp);
        // unspecified fields fall back to defaults
        assert_eq!(config.fetch_timeout_secs, 60);
    }
}
