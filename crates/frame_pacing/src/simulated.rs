//! A software stand-in for a device and its direct queue.
//!
//! The simulated queue keeps the one property the pacer relies on: signals complete in
//! the order they were enqueued, and only after the work submitted before them. When each
//! signal completes is up to the [`CompletionMode`], which lets tests hold the GPU back
//! and lets the sample run headless.
//!
//! It also plays debug layer for allocators: resetting an allocator whose commands are
//! still in flight fails with [`PacingError::Backend`] instead of corrupting anything.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::error::{PacingError, PacingResult};
use crate::gpu::Gpu;

/// When an enqueued signal becomes visible as the fence's completed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// The GPU finishes everything the moment it is signaled.
    Immediate,
    /// Nothing completes until [`SimulatedGpu::complete_next`] or friends release it.
    Manual,
    /// Each signal completes this long after it was enqueued.
    Latency(Duration),
}

impl Default for CompletionMode {
    fn default() -> Self {
        CompletionMode::Latency(Duration::from_millis(8))
    }
}

#[derive(Debug)]
pub struct SimFence {
    id: usize,
}

#[derive(Debug)]
pub struct SimAllocator {
    id: usize,
}

impl SimAllocator {
    pub fn id(&self) -> usize {
        self.id
    }
}

/// A closed command list. Only remembers which allocator backs it.
#[derive(Debug, Clone, Copy)]
pub struct SimCommandList {
    allocator: usize,
}

#[derive(Debug)]
pub struct SimWait {
    fence: usize,
    value: u64,
}

#[derive(Debug)]
struct PendingSignal {
    fence: usize,
    value: u64,
    due: Option<Instant>,
}

#[derive(Debug, Default)]
struct Timeline {
    completed: Vec<u64>,
    pending: VecDeque<PendingSignal>,
    /// Allocators referenced by work submitted since the last signal.
    unsignaled_work: Vec<usize>,
    /// Per allocator: the signal that retires its most recent submission.
    allocator_guard: Vec<Option<(usize, u64)>>,
    signal_log: Vec<u64>,
    submissions: u64,
    allocator_resets: u64,
    device_lost: Option<String>,
}

impl Timeline {
    fn check_device(&self) -> PacingResult<()> {
        match &self.device_lost {
            Some(reason) => Err(PacingError::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }

    fn retire_due(&mut self, now: Instant) {
        while let Some(front) = self.pending.front() {
            match front.due {
                Some(due) if due <= now => {}
                _ => break,
            }
            self.retire_front();
        }
    }

    fn retire_front(&mut self) -> Option<u64> {
        let signal = self.pending.pop_front()?;
        let completed = &mut self.completed[signal.fence];
        *completed = (*completed).max(signal.value);
        trace!(fence = signal.fence, value = signal.value, "Simulated signal completed");
        Some(signal.value)
    }

    fn next_due(&self) -> Option<Instant> {
        self.pending.front().and_then(|signal| signal.due)
    }
}

struct Shared {
    mode: CompletionMode,
    timeline: Mutex<Timeline>,
    progress: Condvar,
}

/// Cheaply cloneable handle to one simulated device and queue.
#[derive(Clone)]
pub struct SimulatedGpu {
    shared: Arc<Shared>,
}

impl SimulatedGpu {
    pub fn new(mode: CompletionMode) -> Self {
        Self {
            shared: Arc::new(Shared {
                mode,
                timeline: Mutex::new(Timeline::default()),
                progress: Condvar::new(),
            }),
        }
    }

    pub fn mode(&self) -> CompletionMode {
        self.shared.mode
    }

    /// Stands in for recording and closing a command list against `allocator`.
    pub fn record(&self, allocator: &SimAllocator) -> SimCommandList {
        SimCommandList {
            allocator: allocator.id,
        }
    }

    /// Completes the oldest outstanding signal. Returns its value, if there was one.
    pub fn complete_next(&self) -> Option<u64> {
        let value = self.shared.timeline.lock().retire_front();
        self.shared.progress.notify_all();
        value
    }

    /// Completes outstanding signals in queue order until `value` has been reached.
    pub fn complete_through(&self, value: u64) {
        {
            let mut timeline = self.shared.timeline.lock();
            while let Some(front) = timeline.pending.front() {
                if front.value > value {
                    break;
                }
                timeline.retire_front();
            }
        }
        self.shared.progress.notify_all();
    }

    pub fn complete_all(&self) {
        {
            let mut timeline = self.shared.timeline.lock();
            while timeline.retire_front().is_some() {}
        }
        self.shared.progress.notify_all();
    }

    /// Simulates a device removal. Every later call fails with `DeviceLost` and
    /// blocked waiters wake up to report it.
    pub fn lose_device(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "Simulated device lost");
        self.shared.timeline.lock().device_lost = Some(reason);
        self.shared.progress.notify_all();
    }

    /// Every value passed to `signal`, in order, across all fences.
    pub fn signal_log(&self) -> Vec<u64> {
        self.shared.timeline.lock().signal_log.clone()
    }

    pub fn pending_signals(&self) -> usize {
        let mut timeline = self.shared.timeline.lock();
        timeline.retire_due(Instant::now());
        timeline.pending.len()
    }

    pub fn submissions(&self) -> u64 {
        self.shared.timeline.lock().submissions
    }

    pub fn allocator_resets(&self) -> u64 {
        self.shared.timeline.lock().allocator_resets
    }

    /// True when every submission has been signaled and every signal has completed.
    pub fn is_idle(&self) -> bool {
        let mut timeline = self.shared.timeline.lock();
        timeline.retire_due(Instant::now());
        timeline.pending.is_empty() && timeline.unsignaled_work.is_empty()
    }
}

impl Gpu for SimulatedGpu {
    type Fence = SimFence;
    type Wait = SimWait;
    type Allocator = SimAllocator;
    type CommandList = SimCommandList;

    fn create_fence(&self, initial_value: u64) -> PacingResult<SimFence> {
        let mut timeline = self.shared.timeline.lock();
        timeline.check_device()?;
        timeline.completed.push(initial_value);
        Ok(SimFence {
            id: timeline.completed.len() - 1,
        })
    }

    fn create_command_allocator(&self) -> PacingResult<SimAllocator> {
        let mut timeline = self.shared.timeline.lock();
        timeline.check_device()?;
        timeline.allocator_guard.push(None);
        Ok(SimAllocator {
            id: timeline.allocator_guard.len() - 1,
        })
    }

    fn reset_allocator(&self, allocator: &SimAllocator) -> PacingResult<()> {
        let mut timeline = self.shared.timeline.lock();
        timeline.check_device()?;
        timeline.retire_due(Instant::now());

        if timeline.unsignaled_work.contains(&allocator.id) {
            return Err(PacingError::Backend(format!(
                "allocator {} reset with submitted work that was never signaled",
                allocator.id
            )));
        }
        if let Some((fence, value)) = timeline.allocator_guard[allocator.id] {
            let completed = timeline.completed[fence];
            if completed < value {
                return Err(PacingError::Backend(format!(
                    "allocator {} reset while fence value {} is in flight (completed {})",
                    allocator.id, value, completed
                )));
            }
        }
        timeline.allocator_resets += 1;
        Ok(())
    }

    fn submit(&self, command_lists: &[&SimCommandList]) -> PacingResult<()> {
        let mut timeline = self.shared.timeline.lock();
        timeline.check_device()?;
        for list in command_lists {
            timeline.unsignaled_work.push(list.allocator);
            timeline.submissions += 1;
        }
        Ok(())
    }

    fn signal(&self, fence: &SimFence, value: u64) -> PacingResult<()> {
        {
            let mut timeline = self.shared.timeline.lock();
            timeline.check_device()?;
            timeline.signal_log.push(value);
            for allocator in std::mem::take(&mut timeline.unsignaled_work) {
                timeline.allocator_guard[allocator] = Some((fence.id, value));
            }
            let due = match self.shared.mode {
                CompletionMode::Immediate => Some(Instant::now()),
                CompletionMode::Manual => None,
                CompletionMode::Latency(latency) => {
                    // Queue order: a signal cannot finish before the one ahead of it.
                    let ready = Instant::now() + latency;
                    let behind = timeline.pending.back().and_then(|signal| signal.due);
                    Some(behind.map_or(ready, |due| due.max(ready)))
                }
            };
            timeline.pending.push_back(PendingSignal {
                fence: fence.id,
                value,
                due,
            });
            if self.shared.mode == CompletionMode::Immediate {
                timeline.retire_due(Instant::now());
            }
        }
        self.shared.progress.notify_all();
        Ok(())
    }

    fn completed_value(&self, fence: &SimFence) -> PacingResult<u64> {
        let mut timeline = self.shared.timeline.lock();
        timeline.check_device()?;
        timeline.retire_due(Instant::now());
        Ok(timeline.completed[fence.id])
    }

    fn register_completion_wait(&self, fence: &SimFence, value: u64) -> PacingResult<SimWait> {
        self.shared.timeline.lock().check_device()?;
        Ok(SimWait {
            fence: fence.id,
            value,
        })
    }

    fn block_on(&self, wait: &SimWait, timeout: Option<Duration>) -> PacingResult<bool> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut timeline = self.shared.timeline.lock();
        loop {
            let now = Instant::now();
            timeline.check_device()?;
            timeline.retire_due(now);
            if timeline.completed[wait.fence] >= wait.value {
                return Ok(true);
            }
            if deadline.is_some_and(|deadline| deadline <= now) {
                return Ok(false);
            }

            let wake = match (deadline, timeline.next_due()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            match wake {
                Some(wake) => {
                    self.shared.progress.wait_until(&mut timeline, wake);
                }
                None => self.shared.progress.wait(&mut timeline),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_signals_complete_in_queue_order() {
        let gpu = SimulatedGpu::new(CompletionMode::Manual);
        let fence = gpu.create_fence(0).unwrap();
        gpu.signal(&fence, 1).unwrap();
        gpu.signal(&fence, 2).unwrap();

        assert_eq!(gpu.completed_value(&fence).unwrap(), 0);
        assert_eq!(gpu.complete_next(), Some(1));
        assert_eq!(gpu.completed_value(&fence).unwrap(), 1);
        gpu.complete_all();
        assert_eq!(gpu.completed_value(&fence).unwrap(), 2);
        assert_eq!(gpu.complete_next(), None);
    }

    #[test]
    fn reset_of_in_flight_allocator_is_rejected() {
        let gpu = SimulatedGpu::new(CompletionMode::Manual);
        let fence = gpu.create_fence(0).unwrap();
        let allocator = gpu.create_command_allocator().unwrap();

        let list = gpu.record(&allocator);
        gpu.submit(&[&list]).unwrap();
        assert!(matches!(
            gpu.reset_allocator(&allocator),
            Err(PacingError::Backend(_))
        ));

        gpu.signal(&fence, 1).unwrap();
        assert!(gpu.reset_allocator(&allocator).is_err());

        gpu.complete_through(1);
        gpu.reset_allocator(&allocator).unwrap();
        assert_eq!(gpu.allocator_resets(), 1);
        assert!(gpu.is_idle());
    }

    #[test]
    fn latency_mode_completes_after_delay() {
        let gpu = SimulatedGpu::new(CompletionMode::Latency(Duration::from_millis(5)));
        let fence = gpu.create_fence(0).unwrap();
        gpu.signal(&fence, 1).unwrap();

        let wait = gpu.register_completion_wait(&fence, 1).unwrap();
        assert!(gpu.block_on(&wait, Some(Duration::from_secs(5))).unwrap());
        assert_eq!(gpu.completed_value(&fence).unwrap(), 1);
    }

    #[test]
    fn lost_device_wakes_blocked_waiters() {
        let gpu = SimulatedGpu::new(CompletionMode::Manual);
        let fence = gpu.create_fence(0).unwrap();
        gpu.signal(&fence, 1).unwrap();
        let wait = gpu.register_completion_wait(&fence, 1).unwrap();

        let remote = gpu.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.lose_device("hung");
        });

        let err = gpu.block_on(&wait, None).unwrap_err();
        assert!(err.is_device_lost());
        handle.join().unwrap();
    }
}
