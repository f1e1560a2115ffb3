pub mod command_line;
#[cfg(windows)]
pub mod d3d12_sample;
pub mod render_loop;
pub mod sample_config;
pub mod sample_error;
pub mod simulated_sample;

use command_line::build_command_line;
use sample_config::SampleConfig;
use sample_error::SampleResult;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_target(false)
        .init();
}

fn main() -> SampleResult<()> {
    color_eyre::install()?;

    let command_line = build_command_line();
    let config = match &command_line.config_path {
        Some(path) => SampleConfig::load_from_path(path)?,
        None => SampleConfig::default(),
    };
    init_tracing(&config.log_level);
    info!(?command_line, frames = config.frames, "Starting frame pacing sample");

    if command_line.use_d3d12 {
        #[cfg(windows)]
        return d3d12_sample::run(&command_line, &config);
        #[cfg(not(windows))]
        tracing::warn!("-d3d12 needs Windows, using the simulated GPU");
    }

    let result = simulated_sample::run(&config);
    if let Err(e) = &result {
        if e.is_device_lost() {
            tracing::error!("Device lost, the renderer would have to be recreated");
        }
    }
    result
}
