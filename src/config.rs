use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::runner::Elevation;
use crate::core::session::SessionConfig;
use crate::platform::linux::ManagerSettings;

const APP_DIR: &str = "raidie";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(&self) -> &'static str {
        match self {
            LoggingLevel::Error => "error",
            LoggingLevel::Warn => "warn",
            LoggingLevel::Info => "info",
            LoggingLevel::Debug => "debug",
            LoggingLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub elevation: Elevation,
    pub target_array: String,
    pub prompt_timeout_secs: u64,
    pub stop_grace_millis: u64,
    pub log_level: LoggingLevel,
    pub log_to_disk: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            elevation: Elevation::Sudo,
            target_array: "md0".to_string(),
            prompt_timeout_secs: 30,
            stop_grace_millis: 2000,
            log_level: LoggingLevel::Info,
            log_to_disk: true,
            log_dir: None,
        }
    }
}

impl Config {
    /// Loads `path`, or the default location when `path` is None.
    ///
    /// A missing file at the default location yields the defaults; an
    /// explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;

        crate::core::validate_array_name(&config.target_array)
            .with_context(|| format!("Invalid target_array in {}", path.display()))?;
        Ok(config)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            prompt_timeout: Duration::from_secs(self.prompt_timeout_secs),
            stop_grace: Duration::from_millis(self.stop_grace_millis),
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            target_array: self.target_array.clone(),
            session: self.session_config(),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config) = std::env::var_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join(APP_DIR).join(CONFIG_FILE));
    }

    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILE)
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "elevation = \"pkexec\"\nprompt_timeout_secs = 45").unwrap();

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.elevation, Elevation::Pkexec);
        assert_eq!(config.session_config().prompt_timeout, Duration::from_secs(45));
        assert_eq!(config.target_array, "md0");
        assert_eq!(config.log_level, LoggingLevel::Info);
    }

    #[test]
    fn test_custom_elevation_front_end() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "elevation = {{ custom = [\"run0\", \"--quiet\"] }}\nlog_level = \"debug\"").unwrap();

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(
            config.elevation,
            Elevation::Custom(vec!["run0".to_string(), "--quiet".to_string()])
        );
        assert_eq!(config.log_level, LoggingLevel::Debug);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_invalid_target_array_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "target_array = \"sda\"").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }
}
