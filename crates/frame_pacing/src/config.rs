use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{PacingError, PacingResult};

/// DXGI refuses swap chains with more back buffers than this.
pub const MAX_BUFFER_COUNT: u32 = 16;

/// Pacer settings, usually the `[pacer]` table of a sample's TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PacerConfig {
    /// Frames in flight. Must match the swap chain's buffer count. 1 waits every frame.
    pub buffer_count: u32,
    /// Upper bound for any single fence wait. Absent means wait forever.
    pub wait_timeout_ms: Option<u64>,
    /// Stalls in `begin_frame` longer than this are logged as warnings.
    pub stall_warn_ms: u64,
    /// Bound for the drain a pacer runs when dropped without `shutdown`. Always finite.
    pub drop_timeout_ms: u64,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            buffer_count: 2,
            wait_timeout_ms: None,
            stall_warn_ms: 100,
            drop_timeout_ms: 2000,
        }
    }
}

impl PacerConfig {
    pub fn with_buffer_count(buffer_count: u32) -> Self {
        Self {
            buffer_count,
            ..Self::default()
        }
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn stall_warn(&self) -> Duration {
        Duration::from_millis(self.stall_warn_ms)
    }

    pub fn drop_timeout(&self) -> Duration {
        Duration::from_millis(self.drop_timeout_ms)
    }

    pub fn validate(&self) -> PacingResult<()> {
        if !(1..=MAX_BUFFER_COUNT).contains(&self.buffer_count) {
            return Err(PacingError::Config(format!(
                "buffer_count must be between 1 and {}, got {}",
                MAX_BUFFER_COUNT, self.buffer_count
            )));
        }
        Ok(())
    }

    /// Parses a standalone pacer table.
    pub fn from_toml(content: &str) -> PacingResult<Self> {
        let config: PacerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from `path`, falling back to defaults when the file does not exist.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> PacingResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Pacer config not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        debug!(?config, "Loaded pacer config from {:?}", path);
        Ok(config)
    }
}
