use std::thread;
use std::time::Duration;

use frame_pacing::{
    FramePacer, OffscreenSwapChain, SimAllocator, SimCommandList, SimulatedGpu,
};
use tracing::info;

use crate::render_loop::{FrameRecorder, log_summary, run_frames};
use crate::sample_config::SampleConfig;
use crate::sample_error::SampleResult;

/// Burns a fixed amount of CPU time per frame in place of real recording.
struct SimulatedRecorder {
    record_time: Duration,
}

impl FrameRecorder<SimulatedGpu> for SimulatedRecorder {
    fn record(
        &mut self,
        gpu: &SimulatedGpu,
        allocator: &SimAllocator,
        _frame_number: u64,
    ) -> SampleResult<SimCommandList> {
        if !self.record_time.is_zero() {
            thread::sleep(self.record_time);
        }
        Ok(gpu.record(allocator))
    }
}

pub fn run(config: &SampleConfig) -> SampleResult<()> {
    let gpu = SimulatedGpu::new(config.simulation.completion_mode());
    info!(mode = ?gpu.mode(), "Using simulated GPU");

    let mut swap_chain = OffscreenSwapChain::new(
        config.pacer.buffer_count,
        config.width,
        config.height,
        config.format,
    )?;
    let mut pacer = FramePacer::for_swap_chain(gpu.clone(), &swap_chain, &config.pacer)?;
    let mut recorder = SimulatedRecorder {
        record_time: config.simulation.record_time(),
    };

    run_frames(&gpu, &mut swap_chain, &mut pacer, &mut recorder, config)?;

    log_summary(pacer.stats());
    pacer.shutdown()?;
    Ok(())
}
