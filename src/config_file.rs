use std::{net::SocketAddr, num::NonZeroU64, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::health::{MonitorConfig, DEFAULT_PROBE_HOST};

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/podium")
}

fn default_interval() -> NonZeroU64 {
    NonZeroU64::new(30).unwrap_or(NonZeroU64::MIN)
}

fn default_probe_timeout() -> NonZeroU64 {
    NonZeroU64::new(10).unwrap_or(NonZeroU64::MIN)
}

fn default_max_restarts() -> u32 {
    5
}

fn default_probe_host() -> String {
    DEFAULT_PROBE_HOST.to_string()
}

/// Where records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum StoreKind {
    /// One JSON file per record under `data_dir`.
    #[serde(alias = "file", alias = "File")]
    #[default]
    File,
    /// Nothing survives a restart. Useful for trying things out.
    #[serde(alias = "memory", alias = "Memory")]
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
    /// Seconds between monitor ticks.
    #[serde(default = "default_interval")]
    pub interval: NonZeroU64,
    /// Seconds a single probe may take.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: NonZeroU64,
    /// Restarts allowed per container, 0 for unlimited.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Host the HTTP and TCP probes connect to.
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            probe_timeout: default_probe_timeout(),
            max_restarts: default_max_restarts(),
            probe_host: default_probe_host(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerSection {
    /// Seconds between reconciliation passes.
    #[serde(default = "default_interval")]
    pub interval: NonZeroU64,
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            interval: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PodiumConfigFile {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub reconciler: ReconcilerSection,
}

impl Default for PodiumConfigFile {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
            store: StoreKind::default(),
            health: HealthSection::default(),
            reconciler: ReconcilerSection::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl PodiumConfigFile {
    fn try_init_from_string(config: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(config)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the file named on the command line, falling back to defaults
    /// when it does not exist.
    pub async fn try_init() -> Result<Self, ConfigError> {
        let args = crate::cli::get_cli_args();
        let mut config = match tokio::fs::read_to_string(&args.config).await {
            Ok(contents) => Self::try_init_from_string(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config file at {:?}, using defaults", args.config);
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(listen) = args.listen {
            config.listen = listen;
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.health.probe_host.trim().is_empty() {
            return Err(ConfigError::Invalid("health.probe_host is empty".into()));
        }
        if self.store == StoreKind::File && self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "data_dir is required for the file store".into(),
            ));
        }
        Ok(())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(self.health.interval.get()),
            probe_timeout: Duration::from_secs(self.health.probe_timeout.get()),
            max_restarts: self.health.max_restarts,
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconciler.interval.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PodiumConfigFile::try_init_from_string("").expect("Failed to parse config");
        assert_eq!(config.listen, default_listen());
        assert_eq!(config.store, StoreKind::File);
        assert_eq!(config.health.max_restarts, 5);
        assert_eq!(config.health.probe_host, "127.0.0.1");
        assert_eq!(config.reconcile_interval(), Duration::from_secs(30));

        let monitor = config.monitor_config();
        assert_eq!(monitor.interval, Duration::from_secs(30));
        assert_eq!(monitor.probe_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_full_config() {
        let input = r#"
            listen = "127.0.0.1:9000"
            data_dir = "/tmp/podium"
            store = "memory"

            [health]
            interval = 5
            probe_timeout = 2
            max_restarts = 0
            probe_host = "host.docker.internal"

            [reconciler]
            interval = 60
        "#;
        let config = PodiumConfigFile::try_init_from_string(input).expect("Failed to parse config");
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/podium"));
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.health.probe_host, "host.docker.internal");

        let monitor = config.monitor_config();
        assert_eq!(monitor.interval, Duration::from_secs(5));
        assert_eq!(monitor.probe_timeout, Duration::from_secs(2));
        assert_eq!(monitor.max_restarts, 0);
        assert_eq!(config.reconcile_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_store_aliases() {
        for (alias, expected) in [
            ("file", StoreKind::File),
            ("File", StoreKind::File),
            ("memory", StoreKind::Memory),
            ("Memory", StoreKind::Memory),
        ] {
            let toml = format!("store = \"{alias}\"");
            let config = PodiumConfigFile::try_init_from_string(&toml).expect("Failed to parse");
            assert_eq!(config.store, expected);
        }
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let res = PodiumConfigFile::try_init_from_string("[reconciler]\ninterval = 0");
        assert!(matches!(res, Err(ConfigError::Toml(_))), "{:?}", res);
    }

    #[test]
    fn test_blank_probe_host_is_rejected() {
        let res = PodiumConfigFile::try_init_from_string("[health]\nprobe_host = \" \"");
        assert!(matches!(res, Err(ConfigError::Invalid(_))), "{:?}", res);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let res = PodiumConfigFile::try_init_from_string("delay = 1");
        assert!(matches!(res, Err(ConfigError::Toml(_))), "{:?}", res);
    }
}
