use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::imaging::PayloadEncoding;

const ENV_PREFIX: &str = "FRAME_PIPELINE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub log_level: String,
    pub producer: ProducerConfig,
    pub processing: ProcessingConfig,
    pub persistence: PersistenceConfig,
    pub storage: StorageConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            producer: ProducerConfig::default(),
            processing: ProcessingConfig::default(),
            persistence: PersistenceConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Configuration {
    /// Defaults, then the optional TOML file, then `FRAME_PIPELINE__*` environment variables.
    ///
    /// The defaults are a source of their own, so a partial channel table
    /// keeps the stage's endpoint and mode instead of the generic ones.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let defaults = config::Config::try_from(&Configuration::default())?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let configuration = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Configuration>()?;
        Ok(configuration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Bind,
    Connect,
}

/// One end of a point-to-point channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub endpoint: String,
    pub mode: ChannelMode,
    pub high_water_mark: usize,
    pub reconnect_interval_ms: u64,
    pub max_part_bytes: usize,
}

impl ChannelConfig {
    pub fn bind(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            mode: ChannelMode::Bind,
            ..Self::default()
        }
    }

    pub fn connect(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            mode: ChannelMode::Connect,
            ..Self::default()
        }
    }

    // Adjusts the outbound/inbound message queue depth.
    pub fn high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://localhost:5555".to_string(),
            mode: ChannelMode::Connect,
            high_water_mark: 16,
            reconnect_interval_ms: 100,
            max_part_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub output: ChannelConfig,
    pub image_dir: PathBuf,
    pub encoding: PayloadEncoding,
    pub frame_interval_ms: u64,
    pub repeat: bool,
    pub peer_wait_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            output: ChannelConfig::bind("tcp://*:5555"),
            image_dir: PathBuf::from("images"),
            encoding: PayloadEncoding::Png,
            frame_interval_ms: 100,
            repeat: false,
            peer_wait_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub input: ChannelConfig,
    pub output: ChannelConfig,
    pub workers: usize,
    pub fast_threshold: u8,
    pub octaves: u8,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            input: ChannelConfig::connect("tcp://localhost:5555"),
            output: ChannelConfig::bind("tcp://*:5556"),
            workers: 1,
            fast_threshold: 20,
            octaves: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub input: ChannelConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            input: ChannelConfig::connect("tcp://localhost:5556"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("frames.db"),
        }
    }
}
