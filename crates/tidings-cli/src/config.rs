//! CLI configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (TIDINGS_*)
//! - TOML configuration file (`TIDINGS_CONFIG`, or a default path)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tidings_client::config::{EndpointSettings, TimingSettings, TransportSettings};
use tidings_client::ChannelConfig;

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Endpoint sources.
    #[serde(default)]
    pub endpoint: EndpointSettings,

    /// Timers.
    #[serde(default)]
    pub timing: TimingSettings,

    /// Transport limits.
    #[serde(default)]
    pub transport: TransportSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_log_filter() -> String {
    "tidings=info".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Load configuration from `TIDINGS_CONFIG`, a default path, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("TIDINGS_CONFIG") {
            let expanded = shellexpand::tilde(&path);
            return Self::from_file(expanded.as_ref());
        }

        let config_paths = [
            "tidings.toml",
            "/etc/tidings/tidings.toml",
            "~/.config/tidings/tidings.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// The channel part of the configuration.
    #[must_use]
    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            endpoint: self.endpoint.clone(),
            timing: self.timing.clone(),
            transport: self.transport.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
        assert_eq!(config.log.filter, "tidings=info");
        assert_eq!(config.timing.throttle_ms, 5000);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [endpoint]
            api_base_url = "https://api.example.com/v1"
            page_origin = "https://app.example.com"

            [timing]
            idle_close_ms = 1500

            [metrics]
            enabled = true
            port = 9100
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.timing.idle_close_ms, 1500);
        assert_eq!(config.timing.backoff_base_ms, 1000);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);

        let channel = config.channel();
        let resolution = channel.endpoint_config().resolve();
        assert_eq!(
            resolution.url().map(|u| u.as_str()),
            Some("wss://api.example.com/ws")
        );
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("tidings-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[log]\nfilter = \"tidings=trace\"").unwrap();
        drop(file);

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.log.filter, "tidings=trace");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_from_file_rejects_invalid_toml() {
        let path = std::env::temp_dir().join(format!("tidings-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[timing\nthrottle_ms = ").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
        std::fs::remove_file(&path).unwrap();
    }
}
