use std::time::Instant;

use frame_pacing::{FramePacer, Gpu, PacerStats, SwapChain};
use tracing::{debug, info};

use crate::sample_config::SampleConfig;
use crate::sample_error::SampleResult;

/// Records one frame's commands. Gets the allocator the pacer lent out for this frame and
/// must not keep it.
pub trait FrameRecorder<G: Gpu> {
    fn record(
        &mut self,
        gpu: &G,
        allocator: &G::Allocator,
        frame_number: u64,
    ) -> SampleResult<G::CommandList>;
}

/// Drives `config.frames` iterations of begin, record, submit, end, present, resizing and
/// minimizing the swap chain along the way as configured.
pub fn run_frames<G, S, R>(
    gpu: &G,
    swap_chain: &mut S,
    pacer: &mut FramePacer<G>,
    recorder: &mut R,
    config: &SampleConfig,
) -> SampleResult<()>
where
    G: Gpu,
    S: SwapChain,
    R: FrameRecorder<G>,
{
    let sizes = [
        (config.width, config.height),
        ((config.width / 2).max(1), (config.height / 2).max(1)),
    ];
    let started = Instant::now();
    let mut minimized_left = 0;

    for iteration in 0..config.frames {
        if config.resize_every > 0 && iteration > 0 && iteration % config.resize_every == 0 {
            let (width, height) = sizes[(iteration / config.resize_every) as usize % sizes.len()];
            pacer.resize(swap_chain, width, height, config.format)?;
            if config.minimized_frames > 0 {
                // Minimizing reports a zero-sized client area.
                pacer.resize(swap_chain, 0, 0, config.format)?;
                minimized_left = config.minimized_frames;
            }
        }

        if minimized_left > 0 {
            minimized_left -= 1;
            debug!(iteration, "Window minimized, skipping frame");
            continue;
        }

        let command_list = {
            let frame = pacer.begin_frame(swap_chain)?;
            recorder.record(gpu, frame.allocator(), frame.frame_number())?
        };
        gpu.submit(&[&command_list])?;
        pacer.end_frame()?;
        swap_chain.present()?;

        if (iteration + 1) % 60 == 0 {
            log_progress(pacer.stats(), started);
        }
    }
    Ok(())
}

fn log_progress(stats: &PacerStats, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    let fps = if elapsed > 0.0 {
        stats.frames as f64 / elapsed
    } else {
        0.0
    };
    info!(
        frames = stats.frames,
        stalls = stats.stalls,
        stall_ms = stats.stall_time.as_secs_f64() * 1000.0,
        fps = format!("{:.1}", fps),
        "Frame pacing progress"
    );
}

pub fn log_summary(stats: &PacerStats) {
    info!(
        frames = stats.frames,
        stalls = stats.stalls,
        stall_ms = stats.stall_time.as_secs_f64() * 1000.0,
        drains = stats.drains,
        resizes = stats.resizes,
        "Sample finished"
    );
}

#[cfg(test)]
mod tests {
    use frame_pacing::{
        CompletionMode, OffscreenSwapChain, SimAllocator, SimCommandList, SimulatedGpu,
    };

    use super::*;

    struct CountingRecorder {
        recorded: Vec<u64>,
    }

    impl FrameRecorder<SimulatedGpu> for CountingRecorder {
        fn record(
            &mut self,
            gpu: &SimulatedGpu,
            allocator: &SimAllocator,
            frame_number: u64,
        ) -> SampleResult<SimCommandList> {
            self.recorded.push(frame_number);
            Ok(gpu.record(allocator))
        }
    }

    #[test]
    fn minimized_frames_are_skipped() {
        let config = SampleConfig {
            frames: 10,
            resize_every: 4,
            minimized_frames: 1,
            ..SampleConfig::default()
        };
        let gpu = SimulatedGpu::new(CompletionMode::Immediate);
        let mut swap_chain =
            OffscreenSwapChain::new(2, config.width, config.height, config.format).unwrap();
        let mut pacer = FramePacer::for_swap_chain(gpu.clone(), &swap_chain, &config.pacer).unwrap();
        let mut recorder = CountingRecorder {
            recorded: Vec::new(),
        };

        run_frames(&gpu, &mut swap_chain, &mut pacer, &mut recorder, &config).unwrap();

        assert_eq!(recorder.recorded, (0..8).collect::<Vec<_>>());
        assert_eq!(swap_chain.presents(), 8);
        assert_eq!(swap_chain.resizes(), 2);
        assert_eq!(swap_chain.size(), (config.width, config.height));
        assert_eq!(pacer.stats().resizes, 2);
        assert_eq!(gpu.submissions(), 8);
    }
}
