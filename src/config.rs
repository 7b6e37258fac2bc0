//! Configuration and logging setup.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fmt, fs, io};
use log::{LevelFilter, error, info};
use serde::de;
use serde::{Deserialize, Deserializer};
#[cfg(unix)]
use syslog::Facility;
use url::Url;
use crate::constants::*;
use crate::server::updater::UpdaterOptions;
use crate::sources::sample::SampleConfig;

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn storage_uri() -> Url {
        if let Ok(from_env) = env::var(TALLY_ENV_STORAGE_URI) {
            match Url::parse(&from_env) {
                Ok(uri) => return uri,
                Err(_) => {
                    eprintln!(
                        "Unrecognized URI in env var {}",
                        TALLY_ENV_STORAGE_URI
                    );
                    ::std::process::exit(1);
                }
            }
        }
        match Url::parse("local://./data") {
            Ok(uri) => uri,
            Err(_) => {
                eprintln!("Cannot parse default storage URI");
                ::std::process::exit(1);
            }
        }
    }

    fn log_level() -> LevelFilter {
        match env::var(TALLY_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        TALLY_ENV_LOG_LEVEL
                    );
                    ::std::process::exit(1);
                }
            },
            _ => LevelFilter::Warn,
        }
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./tally.log")
    }

    fn syslog_facility() -> String {
        "daemon".to_string()
    }

    fn fetch_parallelism() -> usize {
        DEF_FETCH_PARALLELISM
    }

    fn page_size() -> usize {
        DEF_PAGE_SIZE
    }

    fn source() -> String {
        "sample".to_string()
    }
}

//------------ Config --------------------------------------------------------

/// Global configuration, deserialized from a TOML config file. Every value
/// has a default, so an empty file and a missing file both yield a working
/// configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Where the evidence store lives. `local://<path>` for a directory on
    /// disk, `memory:<namespace>` for an in-process store.
    #[serde(default = "ConfigDefaults::storage_uri")]
    pub storage_uri: Url,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "de_level_filter"
    )]
    log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    log_file: PathBuf,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    syslog_facility: String,

    /// How many project pipelines may fetch concurrently.
    #[serde(default = "ConfigDefaults::fetch_parallelism")]
    pub fetch_parallelism: usize,

    /// Page size hint for binding event fetches.
    #[serde(default = "ConfigDefaults::page_size")]
    pub page_size: usize,

    /// Which evidence source backend to use. Currently only `sample`.
    #[serde(default = "ConfigDefaults::source")]
    pub source: String,

    #[serde(default)]
    pub sample: SampleConfig,
}

/// # Accessors
impl Config {
    pub fn updater_options(&self) -> UpdaterOptions {
        UpdaterOptions {
            fetch_parallelism: self.fetch_parallelism,
            page_size: self.page_size,
        }
    }
}

/// # Create
impl Config {
    /// Creates the config at startup: reads the file, starts logging and
    /// verifies the values. A missing file at the default location is fine;
    /// an explicitly given file must exist.
    pub fn create(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, required) = match config_file {
            Some(file) => (file, true),
            None => (Path::new(TALLY_DEFAULT_CONFIG_FILE), false),
        };

        let config = if file.exists() {
            Self::read_config(file)?
        } else if required {
            return Err(ConfigError::Other(format!(
                "Cannot find config file '{}'",
                file.display()
            )));
        } else {
            Self::defaults()
        };

        config.init_logging()?;
        if file.exists() {
            info!("{} uses configuration file: {}", TALLY_APP, file.display());
        }
        config.verify()?;
        Ok(config)
    }

    /// A config with every value at its default.
    pub fn defaults() -> Self {
        Config {
            storage_uri: ConfigDefaults::storage_uri(),
            log_level: ConfigDefaults::log_level(),
            log_type: ConfigDefaults::log_type(),
            log_file: ConfigDefaults::log_file(),
            syslog_facility: ConfigDefaults::syslog_facility(),
            fetch_parallelism: ConfigDefaults::fetch_parallelism(),
            page_size: ConfigDefaults::page_size(),
            source: ConfigDefaults::source(),
            sample: SampleConfig::default(),
        }
    }

    pub fn read_config(file: &Path) -> Result<Self, ConfigError> {
        let config = fs::read_to_string(file)?;
        let config: Config = toml::from_str(&config)?;
        Ok(config)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.fetch_parallelism == 0 {
            return Err(ConfigError::other("fetch_parallelism must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::other("page_size must be at least 1"));
        }
        if self.source != "sample" {
            return Err(ConfigError::Other(format!(
                "Unknown source '{}', expected \"sample\"",
                self.source
            )));
        }
        Ok(())
    }

    pub fn test(storage_uri: Url) -> Self {
        let mut config = Self::defaults();
        config.storage_uri = storage_uri;
        config.log_level = LevelFilter::Debug;
        config.log_type = LogType::Stderr;
        config
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            #[cfg(unix)]
            LogType::Syslog => {
                let facility = Facility::from_str(&self.syslog_facility)
                    .map_err(|_| ConfigError::other("Invalid syslog_facility"))?;
                self.syslog_logger(facility)
            }
            #[cfg(not(unix))]
            LogType::Syslog => Err(ConfigError::other(
                "syslog is not supported on this platform",
            )),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init stderr logging: {}", e)))
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!("Failed to open log file '{}': {}", path.display(), err);
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init file logging: {}", e)))
    }

    /// Creates a syslog logger and configures correctly.
    #[cfg(unix)]
    fn syslog_logger(&self, facility: syslog::Facility) -> Result<(), ConfigError> {
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from("tally"));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514)));
        match logger {
            Ok(logger) => self
                .fern_logger()
                .chain(logger)
                .apply()
                .map_err(|e| ConfigError::Other(format!("Failed to init syslog: {}", e))),
            Err(err) => {
                let msg = format!("Cannot connect to syslog: {}", err);
                Err(ConfigError::Other(msg))
            }
        }
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);

        let show_target =
            self.log_level == LevelFilter::Trace || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("tokio", framework_level)
            .level_for("mio", framework_level)
    }
}

//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found: \"{}\"",
                string
            ))),
        }
    }
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

//------------ de_level_filter -----------------------------------------------

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}

//============ Tests =========================================================
