//! The frame-in-flight state machine.
//!
//! ```text
//!             begin_frame               end_frame
//!   Retired ─────────────▶ Recording ─────────────▶ Submitted
//!      ▲                                                │
//!      └──── wait_until(target) on next selection ──────┘
//! ```
//!
//! A slot is only waited on when the swap chain hands its back buffer out again, so with
//! N slots the CPU may run up to N frames ahead of the GPU before `begin_frame` blocks.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::PacerConfig;
use crate::error::{PacingError, PacingResult};
use crate::fence::FrameFence;
use crate::gpu::{BackBufferFormat, Gpu, SwapChain};
use crate::slot::{FrameSlot, SlotState};

/// Counters describing how the pacer has behaved so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacerStats {
    pub frames: u64,
    /// `begin_frame` calls that had to block on the fence.
    pub stalls: u64,
    pub stall_time: Duration,
    pub drains: u64,
    pub resizes: u64,
}

/// The frame currently being recorded.
///
/// Borrows the pacer, so the allocator cannot be held past `end_frame`.
pub struct ActiveFrame<'a, G: Gpu> {
    gpu: &'a G,
    fence: &'a FrameFence<G>,
    slot: &'a FrameSlot<G::Allocator>,
    waited: bool,
    frame_number: u64,
}

impl<'a, G: Gpu> ActiveFrame<'a, G> {
    pub fn allocator(&self) -> &'a G::Allocator {
        &self.slot.allocator
    }

    pub fn slot_index(&self) -> usize {
        self.slot.index()
    }

    /// Target value the slot was waited on before its allocator was reset.
    pub fn retired_value(&self) -> u64 {
        self.slot.target_value()
    }

    /// Whether acquiring this frame blocked on the GPU.
    pub fn waited(&self) -> bool {
        self.waited
    }

    /// Zero-based count of frames begun before this one.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn completed_value(&self) -> PacingResult<u64> {
        self.fence.completed_value(self.gpu)
    }
}

/// Owns the per-frame allocators and the fence that guards them.
pub struct FramePacer<G: Gpu> {
    gpu: G,
    fence: FrameFence<G>,
    slots: Vec<FrameSlot<G::Allocator>>,
    current_slot: usize,
    recording: Option<usize>,
    wait_timeout: Option<Duration>,
    stall_warn: Duration,
    drop_timeout: Duration,
    stats: PacerStats,
}

impl<G: Gpu> FramePacer<G> {
    pub fn new(gpu: G, config: &PacerConfig) -> PacingResult<Self> {
        config.validate()?;
        let fence = FrameFence::new(&gpu, 0)?;
        let slots = (0..config.buffer_count as usize)
            .map(|index| {
                let allocator = gpu.create_command_allocator()?;
                Ok(FrameSlot::new(index, allocator, fence.last_signaled()))
            })
            .collect::<PacingResult<Vec<_>>>()?;

        info!(
            slots = slots.len(),
            wait_timeout = ?config.wait_timeout(),
            "Created frame pacer"
        );

        Ok(Self {
            gpu,
            fence,
            slots,
            current_slot: 0,
            recording: None,
            wait_timeout: config.wait_timeout(),
            stall_warn: config.stall_warn(),
            drop_timeout: config.drop_timeout(),
            stats: PacerStats::default(),
        })
    }

    /// Creates a pacer with one slot per back buffer of `swap_chain`.
    pub fn for_swap_chain<S: SwapChain>(
        gpu: G,
        swap_chain: &S,
        config: &PacerConfig,
    ) -> PacingResult<Self> {
        let config = PacerConfig {
            buffer_count: swap_chain.buffer_count(),
            ..config.clone()
        };
        let mut pacer = Self::new(gpu, &config)?;
        pacer.current_slot = swap_chain.current_back_buffer_index() as usize;
        Ok(pacer)
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn slots(&self) -> &[FrameSlot<G::Allocator>] {
        &self.slots
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        self.slots.iter().map(FrameSlot::state).collect()
    }

    /// Slot selected by the most recent `begin_frame` or resize.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_in_flight()).count()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn last_signaled_value(&self) -> u64 {
        self.fence.last_signaled()
    }

    pub fn completed_value(&self) -> PacingResult<u64> {
        self.fence.completed_value(&self.gpu)
    }

    pub fn stats(&self) -> &PacerStats {
        &self.stats
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }

    /// Changes the bound used by every later fence wait. `None` waits forever.
    pub fn set_wait_timeout(&mut self, timeout: Option<Duration>) {
        self.wait_timeout = timeout;
    }

    /// Picks the slot for the swap chain's current back buffer, waits for the GPU to
    /// release it if needed, resets its allocator and hands it out for recording.
    ///
    /// On [`PacingError::Timeout`] the slot stays submitted and the call may be retried.
    pub fn begin_frame<S: SwapChain>(&mut self, swap_chain: &S) -> PacingResult<ActiveFrame<'_, G>> {
        if let Some(slot) = self.recording {
            return Err(PacingError::FrameInProgress { slot });
        }

        let back_buffer = swap_chain.current_back_buffer_index();
        let index = back_buffer as usize;
        if index >= self.slots.len() {
            return Err(PacingError::SlotOutOfRange {
                index: back_buffer,
                slots: self.slots.len(),
            });
        }
        self.current_slot = index;

        let slot = &mut self.slots[index];
        let mut waited = false;
        if slot.state == SlotState::Submitted {
            let started = Instant::now();
            waited = self
                .fence
                .wait_until(&self.gpu, slot.target_value, self.wait_timeout)?;
            slot.state = SlotState::Retired;

            if waited {
                let stall = started.elapsed();
                self.stats.stalls += 1;
                self.stats.stall_time += stall;
                if stall > self.stall_warn {
                    warn!(slot = index, ?stall, value = slot.target_value, "Long stall waiting for GPU");
                }
            }
        }

        self.gpu.reset_allocator(&slot.allocator)?;
        slot.state = SlotState::Recording;
        self.recording = Some(index);
        debug!(slot = index, frame = self.stats.frames, waited, "Began frame");

        Ok(ActiveFrame {
            gpu: &self.gpu,
            fence: &self.fence,
            slot: &self.slots[index],
            waited,
            frame_number: self.stats.frames,
        })
    }

    /// Signals the fence behind the work just submitted from the recording slot and
    /// returns the value that marks it complete.
    ///
    /// If the signal itself fails the slot is still treated as in flight.
    pub fn end_frame(&mut self) -> PacingResult<u64> {
        let index = self.recording.take().ok_or(PacingError::NoFrameInProgress)?;
        let value = self.fence.next_value();

        let slot = &mut self.slots[index];
        slot.target_value = value;
        slot.state = SlotState::Submitted;
        self.fence.signal(&self.gpu, value)?;

        self.stats.frames += 1;
        debug!(slot = index, value, "Ended frame");
        Ok(value)
    }

    /// Waits for every submission so far. Afterwards all slots are retired.
    pub fn drain_all(&mut self) -> PacingResult<()> {
        if let Some(slot) = self.recording {
            return Err(PacingError::FrameInProgress { slot });
        }
        self.drain(self.wait_timeout)
    }

    fn drain(&mut self, timeout: Option<Duration>) -> PacingResult<()> {
        let value = self.fence.next_value();
        self.fence.signal(&self.gpu, value)?;
        self.fence.wait_until(&self.gpu, value, timeout)?;

        for slot in &mut self.slots {
            if slot.state == SlotState::Submitted {
                slot.state = SlotState::Retired;
            }
        }
        self.stats.drains += 1;
        debug!(value, "Drained GPU");
        Ok(())
    }

    /// Drains, resizes the swap chain and realigns every slot to the fence's current
    /// value. A zero width or height means the window is minimized and is ignored.
    ///
    /// Slots are created once. If the swap chain comes back with a different buffer
    /// count the slots are still realigned, but [`PacingError::Config`] is returned and
    /// the pacer has to be rebuilt with [`FramePacer::for_swap_chain`].
    pub fn resize<S: SwapChain>(
        &mut self,
        swap_chain: &mut S,
        width: u32,
        height: u32,
        format: BackBufferFormat,
    ) -> PacingResult<()> {
        if let Some(slot) = self.recording {
            return Err(PacingError::FrameInProgress { slot });
        }
        if width == 0 || height == 0 {
            debug!(width, height, "Ignoring resize of minimized swap chain");
            return Ok(());
        }

        self.drain(self.wait_timeout)?;
        swap_chain.resize(width, height, format)?;

        // Never back to zero: those values are long passed and would retire slots early.
        let baseline = self.fence.last_signaled();
        for slot in &mut self.slots {
            slot.rebase(baseline);
        }
        self.current_slot = swap_chain.current_back_buffer_index() as usize;
        self.stats.resizes += 1;

        if swap_chain.buffer_count() as usize != self.slots.len() {
            return Err(PacingError::Config(format!(
                "swap chain now has {} buffers but the pacer has {} slots",
                swap_chain.buffer_count(),
                self.slots.len()
            )));
        }
        info!(width, height, ?format, baseline, "Resized swap chain");
        Ok(())
    }

    /// Drains and releases the slots, reporting any failure.
    pub fn shutdown(mut self) -> PacingResult<()> {
        self.recording = None;
        self.drain(self.wait_timeout)?;
        info!(frames = self.stats.frames, stalls = self.stats.stalls, "Frame pacer shut down");
        Ok(())
    }
}

impl<G: Gpu> Drop for FramePacer<G> {
    fn drop(&mut self) {
        if self.in_flight() == 0 {
            return;
        }
        if self
            .completed_value()
            .is_ok_and(|completed| completed >= self.fence.last_signaled())
        {
            return;
        }
        warn!(in_flight = self.in_flight(), "Frame pacer dropped with frames in flight, draining");
        let timeout = self
            .wait_timeout
            .map_or(self.drop_timeout, |timeout| timeout.min(self.drop_timeout));
        match self.drain(Some(timeout)) {
            Ok(()) => {}
            Err(PacingError::Timeout { value, completed, .. }) => {
                error!(value, completed, ?timeout, "GPU still busy after drop drain, releasing allocators anyway");
            }
            Err(e) => error!("Error waiting for GPU idle on drop: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offscreen::OffscreenSwapChain;
    use crate::simulated::{CompletionMode, SimulatedGpu};

    fn setup(mode: CompletionMode, buffers: u32) -> (SimulatedGpu, OffscreenSwapChain, FramePacer<SimulatedGpu>) {
        let gpu = SimulatedGpu::new(mode);
        let chain = OffscreenSwapChain::new(buffers, 320, 240, BackBufferFormat::default()).unwrap();
        let pacer = FramePacer::for_swap_chain(gpu.clone(), &chain, &PacerConfig::default()).unwrap();
        (gpu, chain, pacer)
    }

    fn run_frame(gpu: &SimulatedGpu, chain: &mut OffscreenSwapChain, pacer: &mut FramePacer<SimulatedGpu>) -> u64 {
        let list = {
            let frame = pacer.begin_frame(chain).unwrap();
            gpu.record(frame.allocator())
        };
        gpu.submit(&[&list]).unwrap();
        let value = pacer.end_frame().unwrap();
        chain.present().unwrap();
        value
    }

    #[test]
    fn slots_follow_back_buffer_index() {
        let (gpu, mut chain, mut pacer) = setup(CompletionMode::Immediate, 3);
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(chain.current_back_buffer_index() as usize);
            run_frame(&gpu, &mut chain, &mut pacer);
            assert_eq!(pacer.current_slot(), *seen.last().unwrap());
        }
        assert_eq!(seen, [0, 1, 2, 0, 1, 2]);
        assert_eq!(pacer.stats().frames, 6);
    }

    #[test]
    fn end_frame_assigns_increasing_targets() {
        let (gpu, mut chain, mut pacer) = setup(CompletionMode::Immediate, 2);
        let values: Vec<u64> = (0..4).map(|_| run_frame(&gpu, &mut chain, &mut pacer)).collect();
        assert_eq!(values, [1, 2, 3, 4]);
        assert_eq!(pacer.slots()[0].target_value(), 3);
        assert_eq!(pacer.slots()[1].target_value(), 4);
    }

    #[test]
    fn begin_twice_is_rejected() {
        let (_gpu, chain, mut pacer) = setup(CompletionMode::Immediate, 2);
        pacer.begin_frame(&chain).unwrap();
        assert!(matches!(
            pacer.begin_frame(&chain),
            Err(PacingError::FrameInProgress { slot: 0 })
        ));
        assert!(matches!(pacer.drain_all(), Err(PacingError::FrameInProgress { .. })));
    }

    #[test]
    fn end_without_begin_is_rejected() {
        let (_gpu, _chain, mut pacer) = setup(CompletionMode::Immediate, 2);
        assert!(matches!(pacer.end_frame(), Err(PacingError::NoFrameInProgress)));
    }

    #[test]
    fn out_of_range_back_buffer_is_rejected() {
        let gpu = SimulatedGpu::new(CompletionMode::Immediate);
        let mut chain = OffscreenSwapChain::new(3, 8, 8, BackBufferFormat::default()).unwrap();
        let mut pacer = FramePacer::new(gpu, &PacerConfig::with_buffer_count(2)).unwrap();
        chain.present().unwrap();
        chain.present().unwrap();
        assert!(matches!(
            pacer.begin_frame(&chain),
            Err(PacingError::SlotOutOfRange { index: 2, slots: 2 })
        ));
    }

    #[test]
    fn minimized_resize_is_ignored() {
        let (gpu, mut chain, mut pacer) = setup(CompletionMode::Manual, 2);
        run_frame(&gpu, &mut chain, &mut pacer);
        pacer.resize(&mut chain, 0, 0, BackBufferFormat::default()).unwrap();
        assert_eq!(pacer.stats().drains, 0);
        assert_eq!(chain.resizes(), 0);
        assert_eq!(pacer.in_flight(), 1);
        gpu.complete_all();
    }

    /// Comes back from every resize with one more back buffer.
    struct GrowingSwapChain {
        inner: OffscreenSwapChain,
    }

    impl SwapChain for GrowingSwapChain {
        fn buffer_count(&self) -> u32 {
            self.inner.buffer_count()
        }

        fn current_back_buffer_index(&self) -> u32 {
            self.inner.current_back_buffer_index()
        }

        fn present(&mut self) -> PacingResult<()> {
            self.inner.present()
        }

        fn resize(&mut self, width: u32, height: u32, format: BackBufferFormat) -> PacingResult<()> {
            self.inner = OffscreenSwapChain::new(self.inner.buffer_count() + 1, width, height, format)?;
            Ok(())
        }
    }

    #[test]
    fn buffer_count_change_still_rebases_slots() {
        let gpu = SimulatedGpu::new(CompletionMode::Immediate);
        let mut chain = GrowingSwapChain {
            inner: OffscreenSwapChain::new(2, 64, 64, BackBufferFormat::default()).unwrap(),
        };
        let mut pacer = FramePacer::for_swap_chain(gpu.clone(), &chain, &PacerConfig::default()).unwrap();
        for _ in 0..3 {
            let list = {
                let frame = pacer.begin_frame(&chain).unwrap();
                gpu.record(frame.allocator())
            };
            gpu.submit(&[&list]).unwrap();
            pacer.end_frame().unwrap();
            chain.present().unwrap();
        }
        assert_eq!(pacer.current_slot(), 0);

        let err = pacer.resize(&mut chain, 128, 128, BackBufferFormat::default()).unwrap_err();
        assert!(matches!(err, PacingError::Config(_)), "{:?}", err);

        let baseline = pacer.last_signaled_value();
        assert_eq!(baseline, 4);
        for slot in pacer.slots() {
            assert_eq!(slot.target_value(), baseline);
            assert_eq!(slot.state(), SlotState::Retired);
        }
        assert_eq!(pacer.current_slot(), 0);
        assert_eq!(pacer.in_flight(), 0);
    }

    #[test]
    fn drop_drain_is_bounded_for_a_stuck_gpu() {
        let gpu = SimulatedGpu::new(CompletionMode::Manual);
        let chain = OffscreenSwapChain::new(2, 64, 64, BackBufferFormat::default()).unwrap();
        let config = PacerConfig {
            drop_timeout_ms: 30,
            ..PacerConfig::default()
        };
        let mut pacer = FramePacer::for_swap_chain(gpu.clone(), &chain, &config).unwrap();
        assert_eq!(pacer.wait_timeout(), None);
        let list = {
            let frame = pacer.begin_frame(&chain).unwrap();
            gpu.record(frame.allocator())
        };
        gpu.submit(&[&list]).unwrap();
        pacer.end_frame().unwrap();

        let started = Instant::now();
        drop(pacer);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(30), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
        assert!(!gpu.is_idle());
        gpu.complete_all();
    }

    #[test]
    fn shutdown_drains() {
        let (gpu, mut chain, mut pacer) = setup(CompletionMode::Latency(Duration::from_millis(2)), 2);
        for _ in 0..4 {
            run_frame(&gpu, &mut chain, &mut pacer);
        }
        pacer.shutdown().unwrap();
        assert!(gpu.is_idle());
    }

    #[test]
    fn single_slot_waits_every_frame() {
        let (gpu, mut chain, mut pacer) = setup(CompletionMode::Latency(Duration::from_millis(20)), 1);
        for _ in 0..4 {
            run_frame(&gpu, &mut chain, &mut pacer);
        }
        assert_eq!(pacer.stats().stalls, 3);
    }
}
