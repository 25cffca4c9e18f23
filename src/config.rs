//! Application configuration
//!
//! Stored as TOML with one table per component:
//!
//! ```toml
//! [sender]
//! port = 6980
//! stream_name = "Stream1"
//! host = "192.168.1.20"
//! sample_rate = 0        # 0 keeps the source rate
//! format = "int24"
//!
//! [receiver]
//! port = 6980
//! host = ""              # empty accepts every source
//!
//! [logging]
//! level = "info"
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};
use crate::network::is_valid_hostname;
use crate::protocol::{format::is_supported_rate, BitResolution};

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
    pub logging: LoggingConfig,
}

/// Outgoing stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Destination UDP port
    pub port: u16,
    pub stream_name: String,
    /// Destination as literal IPv4 or host name; empty sends nothing
    pub host: String,
    /// VBAN sample rate, 0 for the source rate
    pub sample_rate: u32,
    pub format: BitResolution,
    /// Audio mix to capture, passed through to the capture side
    pub mixer: u32,
    /// Input device name, default input when absent
    pub device: Option<String>,
    pub queue_capacity: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            stream_name: "Stream1".to_string(),
            host: String::new(),
            sample_rate: 0,
            format: BitResolution::Int24,
            mixer: 1,
            device: None,
            queue_capacity: SENDER_QUEUE_CAPACITY,
        }
    }
}

/// Incoming stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Local UDP port to listen on
    pub port: u16,
    /// Stream name to accept, empty for any
    pub stream_name: String,
    /// Source host to accept, empty for any
    pub host: String,
    /// Decoded frames buffered for the consumer
    pub channel_capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            stream_name: String::new(),
            host: String::new(),
            channel_capacity: RECEIVER_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn check_host(section: &str, host: &str) -> Result<()> {
    let host = host.trim();
    if host.is_empty() || host.parse::<std::net::Ipv4Addr>().is_ok() || is_valid_hostname(host) {
        Ok(())
    } else {
        Err(Error::Config(format!("{}: invalid host '{}'", section, host)))
    }
}

impl AppConfig {
    /// Default config file location, e.g. `~/.config/vban-transport/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "vban-transport").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or the default location, falling back to defaults when
    /// the file does not exist
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.sender;
        if s.port == 0 {
            return Err(Error::Config("sender: port must be 1-65535".into()));
        }
        if s.sample_rate != 0 && !is_supported_rate(s.sample_rate) {
            return Err(Error::UnsupportedSampleRate(s.sample_rate));
        }
        if !matches!(
            s.format,
            BitResolution::Int16 | BitResolution::Int24 | BitResolution::Float32
        ) {
            return Err(Error::Config(format!("sender: cannot send {}", s.format)));
        }
        if s.mixer == 0 {
            return Err(Error::Config("sender: mixer starts at 1".into()));
        }
        if s.queue_capacity == 0 {
            return Err(Error::Config("sender: queue_capacity must be positive".into()));
        }
        check_host("sender", &s.host)?;

        let r = &self.receiver;
        if r.port == 0 {
            return Err(Error::Config("receiver: port must be 1-65535".into()));
        }
        if r.channel_capacity == 0 {
            return Err(Error::Config("receiver: channel_capacity must be positive".into()));
        }
        check_host("receiver", &r.host)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.sender.port, 6980);
        assert_eq!(config.sender.format, BitResolution::Int24);
        assert_eq!(config.sender.sample_rate, 0);
        assert_eq!(config.sender.mixer, 1);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[sender]\nhost = \"10.0.0.2\"\nformat = \"float32\"\nsample_rate = 44100\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.sender.host, "10.0.0.2");
        assert_eq!(config.sender.format, BitResolution::Float32);
        assert_eq!(config.sender.sample_rate, 44100);
        assert_eq!(config.sender.port, 6980);
        assert_eq!(config.receiver, ReceiverConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.receiver.stream_name = "studio".into();
        config.receiver.host = "mixer.local".into();
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = AppConfig::default();
        config.sender.sample_rate = 47000;
        assert!(matches!(config.validate(), Err(Error::UnsupportedSampleRate(47000))));

        let mut config = AppConfig::default();
        config.sender.format = BitResolution::Int8;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.receiver.host = "-bad".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.receiver.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sender]\nformat = \"mp3\"\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(Error::Config(_))));
    }
}
