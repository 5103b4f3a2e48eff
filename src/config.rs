//! Configuration management for MeshLedger
//!
//! Values come from an optional TOML file, then from environment variables
//! (`API_PORT`, `ROOT_HOST`, `ROOT_PORT`, `PEER`, `POLL_ROOT`,
//! `POLL_INTERVAL`, `SEED_DATA`, `FETCH_TIMEOUT`, `NODE_ID`, `LOG_LEVEL`,
//! `LOG_FORMAT`). Boolean variables are switched on only by `True`/`true`.

use crate::error::ChainError;
use crate::logging::LogFormat;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Port range a peer picks from when no API port is configured.
pub const PEER_PORT_RANGE: std::ops::RangeInclusive<u16> = 5051..=6000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Explicit API port. Unset means the root port for the root node and a
    /// random port for a peer.
    #[serde(default)]
    pub api_port: Option<u16>,
    #[serde(default = "default_root_host")]
    pub root_host: String,
    #[serde(default = "default_root_port")]
    pub root_port: u16,
    #[serde(default)]
    pub peer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub poll_root: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Publishing identity on the message bus. Generated when unset.
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub seed_data: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "human" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_port: None,
            root_host: default_root_host(),
            root_port: default_root_port(),
            peer: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_root: false,
            poll_interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_root_host() -> String {
    "localhost".to_string()
}

fn default_root_port() -> u16 {
    5050
}

fn default_poll_interval() -> u64 {
    15
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "human".to_string()
}

/// Loads `path` if given (a missing file is an error), applies environment
/// overrides and validates the result.
pub fn load_config(path: Option<&Path>) -> Result<Config, ChainError> {
    let mut config = match path {
        Some(path) => {
            let contents = fs::read_to_string(path).map_err(|e| {
                ChainError::ConfigError(format!("cannot read {}: {}", path.display(), e))
            })?;
            Config::from_toml_str(&contents)?
        }
        None => Config::default(),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn env_flag(value: &str) -> bool {
    value == "True" || value == "true"
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ChainError> {
    value
        .trim()
        .parse()
        .map_err(|_| ChainError::ConfigError(format!("{} has an invalid value: {:?}", key, value)))
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ChainError> {
        toml::from_str(s).map_err(|e| ChainError::ConfigError(e.to_string()))
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ChainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("API_PORT") {
            self.network.api_port = Some(parse_env("API_PORT", &v)?);
        }
        if let Some(v) = lookup("ROOT_HOST") {
            self.network.root_host = v;
        }
        if let Some(v) = lookup("ROOT_PORT") {
            self.network.root_port = parse_env("ROOT_PORT", &v)?;
        }
        if let Some(v) = lookup("PEER") {
            self.network.peer = env_flag(&v);
        }
        if let Some(v) = lookup("POLL_ROOT") {
            self.sync.poll_root = env_flag(&v);
        }
        if let Some(v) = lookup("POLL_INTERVAL") {
            self.sync.poll_interval_secs = parse_env("POLL_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("FETCH_TIMEOUT") {
            self.sync.fetch_timeout_secs = parse_env("FETCH_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("SEED_DATA") {
            self.node.seed_data = env_flag(&v);
        }
        if let Some(v) = lookup("NODE_ID") {
            self.node.node_id = Some(v);
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            self.logging.format = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.network.root_host.trim().is_empty() {
            return Err(ChainError::ConfigError("network.root_host must be set".into()));
        }
        if self.sync.poll_interval_secs == 0 {
            return Err(ChainError::ConfigError(
                "sync.poll_interval_secs must be greater than zero".into(),
            ));
        }
        if self.sync.fetch_timeout_secs == 0 {
            return Err(ChainError::ConfigError(
                "sync.fetch_timeout_secs must be greater than zero".into(),
            ));
        }
        self.log_format()?;
        Ok(())
    }

    /// Port the API server binds to.
    pub fn listen_port(&self) -> u16 {
        match self.network.api_port {
            Some(port) => port,
            None if self.network.peer => rand::thread_rng().gen_range(PEER_PORT_RANGE),
            None => self.network.root_port,
        }
    }

    pub fn root_url(&self) -> String {
        format!("http://{}:{}", self.network.root_host, self.network.root_port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.fetch_timeout_secs)
    }

    pub fn log_format(&self) -> Result<LogFormat, ChainError> {
        match self.logging.format.to_ascii_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            other => Err(ChainError::ConfigError(format!(
                "logging.format must be \"human\" or \"json\", got {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.network.root_host, "localhost");
        assert_eq!(config.network.root_port, 5050);
        assert!(!config.network.peer);
        assert_eq!(config.sync.poll_interval_secs, 15);
        assert_eq!(config.logging.format, "human");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [network]
            root_port = 7000
            peer = true

            [sync]
            poll_root = true
            "#,
        )
        .unwrap();
        assert_eq!(config.network.root_port, 7000);
        assert!(config.network.peer);
        assert!(config.sync.poll_root);
        assert_eq!(config.sync.fetch_timeout_secs, 10);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                ("ROOT_HOST", "root.local"),
                ("ROOT_PORT", "6060"),
                ("PEER", "True"),
                ("POLL_ROOT", "true"),
                ("POLL_INTERVAL", "3"),
                ("SEED_DATA", "yes"),
                ("LOG_FORMAT", "json"),
            ]))
            .unwrap();

        assert_eq!(config.root_url(), "http://root.local:6060");
        assert!(config.network.peer);
        assert!(config.sync.poll_root);
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        // Only "True"/"true" enable a flag.
        assert!(!config.node.seed_data);
        assert_eq!(config.log_format().unwrap(), LogFormat::Json);
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(env(&[("POLL_INTERVAL", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ChainError::ConfigError(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.sync.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.fetch_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.root_host = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_listen_port() {
        let mut config = Config::default();
        assert_eq!(config.listen_port(), 5050);

        config.network.peer = true;
        for _ in 0..20 {
            assert!(PEER_PORT_RANGE.contains(&config.listen_port()));
        }

        config.network.api_port = Some(8123);
        assert_eq!(config.listen_port(), 8123);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\npoll_interval_secs = 7").unwrap();

        let config = Config::from_toml_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(config.sync.poll_interval_secs, 7);

        let missing = load_config(Some(Path::new("/nonexistent/meshledger.toml")));
        assert!(matches!(missing, Err(ChainError::ConfigError(_))));
    }
}
