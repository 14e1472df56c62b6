use std::path::{Path, PathBuf};

use ::config::{Config, ConfigError, Environment, File, Map};
use serde::Deserialize;

use crate::engine::book::QueuePriority;
use crate::engine::log::LogOptions;
use crate::persist::FsLogStore;

pub const ENV_PREFIX: &str = "LOBTRAJ";
pub const DEFAULT_CONFIG_FILE: &str = "lobtraj.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub session: Option<String>,
    pub checkpoint_interval: usize,
    pub strict_lineage: bool,
    pub queue_priority: QueuePriority,
    pub log_filter: String,
}

impl Settings {
    /// Defaults, then `file` (or `lobtraj.toml` if present), then `LOBTRAJ_*`.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::build(file, None)
    }

    fn build(file: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("data_dir", "./data")?
            .set_default("checkpoint_interval", 100_000u64)?
            .set_default("strict_lineage", false)?
            .set_default("queue_priority", "arrival")?
            .set_default("log_filter", "info")?;

        builder = match file {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;
        settings.try_deserialize()
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            strict_lineage: self.strict_lineage,
        }
    }

    /// Store for `session`, falling back to the configured one.
    pub fn store(&self, session: Option<&str>) -> Result<FsLogStore, ConfigError> {
        let session = session
            .or(self.session.as_deref())
            .ok_or_else(|| ConfigError::NotFound("session".into()))?;
        Ok(FsLogStore::for_session(&self.data_dir, session, self.log_options()))
    }
}
