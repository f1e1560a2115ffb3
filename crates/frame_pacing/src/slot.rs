/// Where a frame slot's allocator currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// The CPU owns the allocator and is recording into it.
    Recording,
    /// Work recorded from the allocator has been submitted; the GPU owns it until the
    /// fence reaches the slot's target value.
    Submitted,
    /// The GPU is done with it. Safe to reset.
    Retired,
}

/// One frame in flight: an allocator and the fence value that frees it.
#[derive(Debug)]
pub struct FrameSlot<A> {
    index: usize,
    pub(crate) allocator: A,
    pub(crate) target_value: u64,
    pub(crate) state: SlotState,
}

impl<A> FrameSlot<A> {
    pub(crate) fn new(index: usize, allocator: A, baseline: u64) -> Self {
        Self {
            index,
            allocator,
            target_value: baseline,
            state: SlotState::Retired,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Fence value the GPU must reach before this slot's allocator can be reset.
    pub fn target_value(&self) -> u64 {
        self.target_value
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn is_in_flight(&self) -> bool {
        self.state == SlotState::Submitted
    }

    /// Moves the slot onto a new baseline after its old targets stopped meaning anything,
    /// e.g. once the swap chain was recreated.
    pub(crate) fn rebase(&mut self, baseline: u64) {
        self.target_value = baseline;
        self.state = SlotState::Retired;
    }
}
