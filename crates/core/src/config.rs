//! Layered runtime configuration: defaults, optional JSON file, `ETCS_*`
//! environment variables, then launch arguments.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{ControlError, ControlResult},
    map,
};

/// Directory under the user's config dir holding `config.json`.
pub const CONFIG_DIR: &str = "etcs-sim";

/// How movement authority is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ControlLevel {
    /// Level 1: trains consult the segment store only.
    Local,
    /// Level 2: every advance is authorized by the authority server as well.
    Centralized,
}

impl ControlLevel {
    /// Whether an authority server arbitrates movement.
    pub fn is_centralized(self) -> bool {
        self == Self::Centralized
    }
}

impl TryFrom<u8> for ControlLevel {
    type Error = ControlError;

    fn try_from(value: u8) -> ControlResult<Self> {
        match value {
            1 => Ok(Self::Local),
            2 => Ok(Self::Centralized),
            other => Err(ControlError::Configuration(format!(
                "control level ETCS{other} is not supported (expected 1 or 2)"
            ))),
        }
    }
}

impl From<ControlLevel> for u8 {
    fn from(level: ControlLevel) -> Self {
        match level {
            ControlLevel::Local => 1,
            ControlLevel::Centralized => 2,
        }
    }
}

impl fmt::Display for ControlLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ETCS{}", u8::from(*self))
    }
}

/// Settings shared by the supervisor, trains and the authority server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Control level in effect for the run.
    pub level: ControlLevel,
    /// Built-in map number.
    pub map: u32,
    /// Directory holding one `MA<id>.txt` cell per segment.
    pub segment_dir: PathBuf,
    /// Unix socket the authority server listens on.
    pub socket_path: PathBuf,
    /// Directory for movement journals, the audit journal and diagnostics.
    pub log_dir: PathBuf,
    /// Fixed delay between advance attempts. Retries never stop on their own.
    pub poll_interval_ms: u64,
    /// Fixed delay between attempts to reach the authority server.
    pub connect_retry_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        Self {
            level: ControlLevel::Local,
            map: 1,
            socket_path: temp.join("rbc_server"),
            segment_dir: temp,
            log_dir: PathBuf::from("log"),
            poll_interval_ms: 2000,
            connect_retry_ms: 1000,
        }
    }
}

impl AppConfig {
    /// Load from the default config file (if any) and the environment.
    pub fn load() -> ControlResult<Self> {
        Self::load_from(config_path().as_deref())
    }

    /// Load from an explicit config file (if any) and the environment.
    pub fn load_from(path: Option<&Path>) -> ControlResult<Self> {
        let defaults = Config::try_from(&Self::default()).map_err(configuration)?;
        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Json).required(false));
        }
        let loaded: Self = builder
            .add_source(Environment::with_prefix("ETCS").try_parsing(true))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(configuration)?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Apply `ETCS<n>`, `MAPPA<n>` and `RBC` launch tokens on top of the
    /// loaded configuration.
    pub fn apply_args<I, S>(&mut self, args: I) -> ControlResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            let arg = arg.as_ref();
            if let Some(level) = arg.strip_prefix("ETCS") {
                let level = level
                    .parse::<u8>()
                    .map_err(|_| ControlError::Configuration(format!("invalid argument {arg}")))?;
                self.level = ControlLevel::try_from(level)?;
            } else if let Some(number) = arg.strip_prefix("MAPPA") {
                self.map = number
                    .parse()
                    .map_err(|_| ControlError::Configuration(format!("invalid argument {arg}")))?;
            } else if arg != "RBC" {
                return Err(ControlError::Configuration(format!("invalid argument {arg}")));
            }
        }
        self.validate()
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> ControlResult<()> {
        map::rail_map(self.map)?;
        if self.poll_interval_ms == 0 || self.connect_retry_ms == 0 {
            return Err(ControlError::Configuration(
                "retry intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before each advance attempt.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay between connection attempts to the authority.
    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    /// Audit journal written by the authority server.
    pub fn audit_log_path(&self) -> PathBuf {
        self.log_dir.join("RBC.log")
    }

    /// Movement journal of one train.
    pub fn train_log_path(&self, train: u32) -> PathBuf {
        self.log_dir.join(format!("T{train}.log"))
    }
}

/// Default config file location, when the platform has a config dir.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join("config.json"))
}

/// Write a config file with default values if none exists yet.
pub fn ensure_default_config() -> ControlResult<()> {
    let Some(path) = config_path() else {
        return Ok(());
    };
    write_default_config(&path)
}

fn write_default_config(path: &Path) -> ControlResult<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(configuration)?;
    }
    let serialized =
        serde_json::to_string_pretty(&AppConfig::default()).map_err(configuration)?;
    fs::write(path, serialized).map_err(configuration)?;
    info!(path = %path.display(), "Wrote default configuration");
    Ok(())
}

fn configuration(err: impl fmt::Display) -> ControlError {
    ControlError::Configuration(err.to_string())
}
