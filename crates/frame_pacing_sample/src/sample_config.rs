use std::path::Path;
use std::time::Duration;

use eyre::WrapErr;
use frame_pacing::{BackBufferFormat, CompletionMode, PacerConfig};
use serde::Deserialize;
use tracing::info;

use crate::sample_error::SampleResult;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    /// Default filter when `RUST_LOG` is not set.
    pub log_level: String,
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub format: BackBufferFormat,
    /// Resize the swap chain every this many frames. 0 never resizes.
    pub resize_every: u64,
    /// Pretend the window is minimized for this many frames after each resize.
    pub minimized_frames: u64,
    pub pacer: PacerConfig,
    pub simulation: SimulationConfig,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            frames: 240,
            width: 1280,
            height: 720,
            format: BackBufferFormat::Rgba8Unorm,
            resize_every: 60,
            minimized_frames: 0,
            pacer: PacerConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    Immediate,
    Latency,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub mode: SimulationMode,
    /// GPU time per frame in `latency` mode.
    pub latency_ms: u64,
    /// CPU time spent "recording" each frame.
    pub record_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            mode: SimulationMode::Latency,
            latency_ms: 16,
            record_ms: 4,
        }
    }
}

impl SimulationConfig {
    pub fn completion_mode(&self) -> CompletionMode {
        match self.mode {
            SimulationMode::Immediate => CompletionMode::Immediate,
            SimulationMode::Latency => {
                CompletionMode::Latency(Duration::from_millis(self.latency_ms))
            }
        }
    }

    pub fn record_time(&self) -> Duration {
        Duration::from_millis(self.record_ms)
    }
}

impl SampleConfig {
    pub fn parse(content: &str) -> SampleResult<Self> {
        let config: SampleConfig =
            toml::from_str(content).wrap_err("Failed to parse sample config")?;
        config.pacer.validate()?;
        Ok(config)
    }

    /// Loads from `path`, falling back to defaults when there is no file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> SampleResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_tables_are_read() {
        let config = SampleConfig::parse(
            r#"
            frames = 10
            format = "rgba16_float"

            [pacer]
            buffer_count = 3

            [simulation]
            mode = "immediate"
            "#,
        )
        .unwrap();
        assert_eq!(config.frames, 10);
        assert_eq!(config.format, BackBufferFormat::Rgba16Float);
        assert_eq!(config.pacer.buffer_count, 3);
        assert_eq!(config.simulation.completion_mode(), CompletionMode::Immediate);
        assert_eq!(config.resize_every, 60);
    }

    #[test]
    fn invalid_pacer_table_is_rejected() {
        assert!(SampleConfig::parse("[pacer]\nbuffer_count = 40").is_err());
    }
}
