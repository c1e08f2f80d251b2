use anyhow::Error;
use serde::Deserialize;

pub const DEFAULT_AGI_PORT: u16 = 4573;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub agi: AgiConfig,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    /// Buffer size of the broadcast event bus.
    pub event_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgiConfig {
    pub addr: String,
    pub port: u16,
    /// Prefix the switch puts in front of every variable name.
    pub key_prefix: String,
    pub confirmation_prefix: String,
}

impl Default for AgiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".to_string(),
            port: DEFAULT_AGI_PORT,
            key_prefix: crate::call::pipeline::DEFAULT_KEY_PREFIX.to_string(),
            confirmation_prefix: "confirm!".to_string(),
        }
    }
}

impl AgiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agi: AgiConfig::default(),
            log_level: Some("info".to_string()),
            log_file: None,
            event_capacity: 128,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agi.bind_addr(), "0.0.0.0:4573");
        assert_eq!(config.agi.key_prefix, "agi_");
        assert_eq!(config.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[agi]
addr = "127.0.0.1"
port = 14573
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.agi.bind_addr(), "127.0.0.1:14573");
        assert_eq!(config.agi.key_prefix, "agi_");
        assert_eq!(config.agi.confirmation_prefix, "confirm!");
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.event_capacity, 128);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/agigate.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/agigate.toml"));
    }
}
