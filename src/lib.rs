pub mod capture;
pub mod display;
pub mod inference;
pub mod pipeline;
pub mod status;
pub mod utils;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use capture::{Frame, PixelFormat};
use capture::SensorConfig;

/// Environment variable prefix, e.g. `MOODCAM_INFERENCE__API_KEY`
pub const ENV_PREFIX: &str = "MOODCAM";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    V4l2,
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    /// Device node; empty means auto-detect
    pub device: String,
    pub sensor: SensorConfig,
    pub buffer_count: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Frames between inference samples
    pub sample_interval: u64,
    /// Concurrent inference requests; 0 disables the cap
    pub max_in_flight: usize,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    /// How long shutdown waits for in-flight requests
    pub shutdown_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                backend: CaptureBackend::V4l2,
                device: String::new(),
                sensor: SensorConfig::default(),
                buffer_count: 4,
                timeout_ms: 2000,
            },
            display: DisplayConfig {
                width: 1280,
                height: 720,
                title: "moodcam".into(),
            },
            pipeline: PipelineConfig {
                sample_interval: pipeline::SAMPLE_INTERVAL,
                max_in_flight: 1,
                jpeg_quality: 85,
            },
            inference: InferenceConfig {
                endpoint: "https://westeurope.api.cognitive.microsoft.com".into(),
                api_key: None,
                request_timeout_ms: 10_000,
                shutdown_grace_ms: 3_000,
            },
        }
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML file, overlaid by `MOODCAM_*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("moodcam").required(false)),
        };

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}
