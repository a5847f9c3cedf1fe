//! Configuration schema and loader for ringkv hosts.

use serde::{Deserialize, Serialize};

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RingConfig {
    /// Ring membership and client operation settings.
    #[serde(default)]
    pub ring: RingSection,

    /// Anti-entropy repair settings.
    #[serde(default)]
    pub repair: RepairSection,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingSection {
    /// Replication factor (N).
    #[serde(default = "default_replica_count")]
    pub replica_count: usize,

    /// Number of nodes created at startup.
    #[serde(default = "default_ring_size")]
    pub ring_size: usize,

    /// Replica acknowledgements required for a put/delete to succeed.
    #[serde(default = "default_quorum")]
    pub write_quorum: usize,

    /// Clean replica answers required before a get may report not-found.
    #[serde(default = "default_quorum")]
    pub read_quorum: usize,

    /// Client operation deadline in milliseconds.
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl Default for RingSection {
    fn default() -> Self {
        Self {
            replica_count: default_replica_count(),
            ring_size: default_ring_size(),
            write_quorum: default_quorum(),
            read_quorum: default_quorum(),
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairSection {
    /// Whether the background repair sweep runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sweep period in seconds.
    #[serde(default = "default_repair_interval_secs")]
    pub interval_secs: u64,
}

impl Default for RepairSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_repair_interval_secs(),
        }
    }
}

// --- Defaults ---

fn default_replica_count() -> usize {
    3
}
fn default_ring_size() -> usize {
    10
}
fn default_quorum() -> usize {
    1
}
fn default_op_timeout_ms() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}
fn default_repair_interval_secs() -> u64 {
    5
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl RingConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ring = &self.ring;
        if ring.replica_count == 0 {
            return Err(ConfigError::Invalid("ring.replica_count must be > 0".into()));
        }
        if ring.ring_size < ring.replica_count {
            return Err(ConfigError::Invalid(format!(
                "ring.ring_size ({}) must be >= ring.replica_count ({})",
                ring.ring_size, ring.replica_count
            )));
        }
        if ring.write_quorum == 0 || ring.write_quorum > ring.replica_count {
            return Err(ConfigError::Invalid(format!(
                "ring.write_quorum ({}) must be in 1..={}",
                ring.write_quorum, ring.replica_count
            )));
        }
        if ring.read_quorum == 0 || ring.read_quorum > ring.replica_count {
            return Err(ConfigError::Invalid(format!(
                "ring.read_quorum ({}) must be in 1..={}",
                ring.read_quorum, ring.replica_count
            )));
        }
        if ring.op_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ring.op_timeout_ms must be > 0".into()));
        }
        if self.repair.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "repair.interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Load a `RingConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<RingConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `RingConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<RingConfig, ConfigError> {
    let config: RingConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let config = load_from_str("metrics_port: 9100\n").unwrap();
        assert_eq!(config.ring.replica_count, 3);
        assert_eq!(config.ring.ring_size, 10);
        assert_eq!(config.ring.write_quorum, 1);
        assert_eq!(config.ring.read_quorum, 1);
        assert_eq!(config.ring.op_timeout_ms, 5000);
        assert!(config.repair.enabled);
        assert_eq!(config.repair.interval_secs, 5);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
ring:
  replica_count: 5
  ring_size: 8
  write_quorum: 3
  read_quorum: 2
  op_timeout_ms: 250
repair:
  enabled: false
  interval_secs: 30
"#;
        let config = load_from_str(yaml).unwrap();
        assert_eq!(config.ring.replica_count, 5);
        assert_eq!(config.ring.ring_size, 8);
        assert_eq!(config.ring.write_quorum, 3);
        assert_eq!(config.ring.read_quorum, 2);
        assert_eq!(config.ring.op_timeout_ms, 250);
        assert!(!config.repair.enabled);
        assert_eq!(config.repair.interval_secs, 30);
        assert_eq!(config.metrics_port, None);
    }

    #[test]
    fn test_roundtrip_yaml() {
        let config = load_from_str("ring:\n  ring_size: 4\n").unwrap();
        let serialized = serde_yaml::to_string(&config).unwrap();
        let config2 = load_from_str(&serialized).unwrap();
        assert_eq!(config.ring.ring_size, config2.ring.ring_size);
        assert_eq!(config.ring.replica_count, config2.ring.replica_count);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ring:\n  ring_size: 6\nrepair:\n  interval_secs: 2").unwrap();
        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.ring.ring_size, 6);
        assert_eq!(config.repair.interval_secs, 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = load_from_file(&dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_rejects_ring_smaller_than_replica_count() {
        let yaml = r#"
ring:
  replica_count: 3
  ring_size: 2
"#;
        let err = load_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("ring.ring_size"), "error should mention ring_size: {}", err);
    }

    #[test]
    fn test_rejects_zero_replica_count() {
        let yaml = r#"
ring:
  replica_count: 0
  write_quorum: 0
"#;
        let err = load_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("ring.replica_count"), "{}", err);
    }

    #[test]
    fn test_rejects_write_quorum_above_replica_count() {
        let yaml = r#"
ring:
  replica_count: 3
  write_quorum: 4
"#;
        let err = load_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("ring.write_quorum"), "{}", err);
    }

    #[test]
    fn test_rejects_zero_read_quorum() {
        let yaml = r#"
ring:
  read_quorum: 0
"#;
        let err = load_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("ring.read_quorum"), "{}", err);
    }

    #[test]
    fn test_rejects_zero_repair_interval() {
        let yaml = r#"
repair:
  interval_secs: 0
"#;
        let err = load_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("repair.interval_secs"), "{}", err);
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        let result = load_from_str("ring: [not, a, map]");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }
}
