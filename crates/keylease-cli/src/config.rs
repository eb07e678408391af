//! Configuration loading for the keylease CLI
//!
//! Sources, lowest precedence first: the YAML file, `KEYLEASE_*` environment
//! variables, then command line overrides.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use config::{Config, Environment, File};
use serde::Deserialize;

use keylease_core::LockOptions;
use keylease_store::RedisConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/keylease.yml";
const ENV_PREFIX: &str = "KEYLEASE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// Directory for the daily rolling log file; console only when unset
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub lock: LockOptions,
    pub logging: LoggingSettings,
}

/// Values given on the command line, applied last
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub redis_url: Option<String>,
    pub ttl_ms: Option<u64>,
    pub log_level: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration; an explicitly named file must exist
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut builder = Config::builder().add_source(file).add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = &overrides.redis_url {
            builder = builder.set_override("redis.url", url.as_str())?;
        }
        if let Some(ttl_ms) = overrides.ttl_ms {
            builder = builder.set_override("lock.ttl_ms", ttl_ms as i64)?;
        }
        if let Some(level) = &overrides.log_level {
            builder = builder.set_override("logging.level", level.as_str())?;
        }
        if let Some(dir) = &overrides.log_dir {
            builder = builder.set_override("logging.dir", dir.to_string_lossy().into_owned())?;
        }

        let mut app: AppConfig = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        app.lock = app.lock.normalized();
        Ok(app)
    }
}
