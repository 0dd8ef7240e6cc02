use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the daemon configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ubuntu-advantage/desktop-daemon.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Where status snapshots come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StatusSourceKind {
    /// Read the status file the client tool maintains, and watch it for changes.
    #[default]
    File,
    /// Run `<program> status --format json` on every refresh.
    Tool,
}

/// Which message bus to own the name on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub authorization: AuthorizationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    #[serde(default)]
    pub source: StatusSourceKind,

    /// Status file read when `source = "file"`
    #[serde(default = "default_status_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Client tool executable, looked up in PATH unless absolute
    #[serde(default = "default_program")]
    pub program: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    /// Unexport services that disappear from the status
    #[serde(default = "default_true")]
    pub remove_stale: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    #[serde(default = "default_bus_name")]
    pub name: String,

    #[serde(default)]
    pub kind: BusKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthorizationConfig {
    /// Let polkit prompt the user for credentials
    #[serde(default = "default_true")]
    pub allow_user_interaction: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_status_path() -> PathBuf {
    PathBuf::from("/var/lib/ubuntu-advantage/status.json")
}

fn default_program() -> String {
    "ua".to_string()
}

fn default_bus_name() -> String {
    crate::dbus::BUS_NAME.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            source: StatusSourceKind::default(),
            path: default_status_path(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self { remove_stale: true }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: default_bus_name(),
            kind: BusKind::default(),
        }
    }
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            allow_user_interaction: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Read config from `path`; `None` if there is no file.
    ///
    /// Values are not validated here, so command-line overrides can be
    /// applied first.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(Self::parse(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Parse TOML config text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.program.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "client program must not be empty".into(),
            ));
        }

        if self.status.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "status path must not be empty".into(),
            ));
        }
        if !self.status.path.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "status path must be absolute: {}",
                self.status.path.display()
            )));
        }

        if zbus::names::WellKnownName::try_from(self.bus.name.as_str()).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "invalid bus name: {}",
                self.bus.name
            )));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "invalid log level: {} (expected trace, debug, info, warn or error)",
                self.logging.level
            )));
        }

        Ok(())
    }
}
