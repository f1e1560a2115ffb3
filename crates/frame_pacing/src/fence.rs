use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{PacingError, PacingResult};
use crate::gpu::Gpu;

/// A GPU fence together with the last value this producer asked the queue to signal.
///
/// Only the owner may call [`FrameFence::signal`]; polling is free for everyone.
pub struct FrameFence<G: Gpu> {
    fence: G::Fence,
    last_signaled: u64,
}

impl<G: Gpu> FrameFence<G> {
    pub fn new(gpu: &G, initial_value: u64) -> PacingResult<Self> {
        let fence = gpu.create_fence(initial_value)?;
        debug!(initial_value, "Created frame fence");
        Ok(Self {
            fence,
            last_signaled: initial_value,
        })
    }

    /// Value of the most recent signal request (or the initial value).
    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }

    /// The value the next signal must use to keep the counter strictly increasing.
    pub fn next_value(&self) -> u64 {
        self.last_signaled + 1
    }

    /// Enqueues a signal of `value` on the queue behind all work submitted so far.
    ///
    /// # Panics
    ///
    /// If `value` is not greater than the last signaled value. Out of order signals
    /// leave completion ordering undefined, so this is a caller bug.
    pub fn signal(&mut self, gpu: &G, value: u64) -> PacingResult<()> {
        assert!(
            value > self.last_signaled,
            "fence values must increase: signaled {} after {}",
            value,
            self.last_signaled
        );
        gpu.signal(&self.fence, value)?;
        self.last_signaled = value;
        Ok(())
    }

    pub fn completed_value(&self, gpu: &G) -> PacingResult<u64> {
        gpu.completed_value(&self.fence)
    }

    pub fn is_complete(&self, gpu: &G, value: u64) -> PacingResult<bool> {
        Ok(self.completed_value(gpu)? >= value)
    }

    /// Blocks until the GPU reaches `value`.
    ///
    /// Returns `Ok(false)` without touching the OS wait when the value is already
    /// reached, `Ok(true)` when the thread actually blocked. A finite `timeout` that
    /// expires yields [`PacingError::Timeout`].
    ///
    /// A wake-up is only trusted once the completed value confirms it. Events left armed
    /// by an earlier wait that timed out can fire for an older value.
    pub fn wait_until(&self, gpu: &G, value: u64, timeout: Option<Duration>) -> PacingResult<bool> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut blocked = false;
        loop {
            let completed = self.completed_value(gpu)?;
            if completed >= value {
                return Ok(blocked);
            }

            // A deadline too far out to represent waits forever.
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            if blocked {
                debug!(value, completed, "Fence wait woke early, waiting again");
            } else {
                debug!(value, completed, "Waiting for fence");
            }

            let wait = gpu.register_completion_wait(&self.fence, value)?;
            blocked = true;
            if !gpu.block_on(&wait, remaining)? {
                let completed = self.completed_value(gpu)?;
                if completed >= value {
                    return Ok(true);
                }
                return Err(PacingError::Timeout {
                    value,
                    completed,
                    timeout: timeout.unwrap_or(Duration::MAX),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{CompletionMode, SimulatedGpu};

    #[test]
    fn wait_on_reached_value_does_not_block() {
        let gpu = SimulatedGpu::new(CompletionMode::Immediate);
        let mut fence = FrameFence::new(&gpu, 0).unwrap();
        fence.signal(&gpu, 1).unwrap();
        assert_eq!(fence.completed_value(&gpu).unwrap(), 1);
        assert!(!fence.wait_until(&gpu, 1, Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn zero_timeout_on_pending_value_times_out() {
        let gpu = SimulatedGpu::new(CompletionMode::Manual);
        let mut fence = FrameFence::new(&gpu, 0).unwrap();
        fence.signal(&gpu, 1).unwrap();

        let err = fence.wait_until(&gpu, 1, Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(
            err,
            PacingError::Timeout {
                value: 1,
                completed: 0,
                ..
            }
        ));
    }

    #[test]
    #[should_panic(expected = "fence values must increase")]
    fn repeated_value_panics() {
        let gpu = SimulatedGpu::new(CompletionMode::Immediate);
        let mut fence = FrameFence::new(&gpu, 0).unwrap();
        fence.signal(&gpu, 3).unwrap();
        let _ = fence.signal(&gpu, 3);
    }

    #[test]
    fn initial_value_counts_as_signaled() {
        let gpu = SimulatedGpu::new(CompletionMode::Manual);
        let fence = FrameFence::new(&gpu, 10).unwrap();
        assert_eq!(fence.last_signaled(), 10);
        assert_eq!(fence.next_value(), 11);
        assert!(fence.is_complete(&gpu, 10).unwrap());
    }
}
