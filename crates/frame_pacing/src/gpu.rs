//! Collaborator interfaces the pacer is written against.
//!
//! Nothing here records commands or creates swap chains; the owner of the render loop
//! does that with whatever backend it picked, and hands the pacer a [`Gpu`] for fence and
//! allocator work plus a [`SwapChain`] to read the presentation index from.

use std::time::Duration;

use serde::Deserialize;

use crate::error::PacingResult;

/// Device and queue operations consumed by [`FrameFence`](crate::FrameFence) and
/// [`FramePacer`](crate::FramePacer).
///
/// One `Gpu` value stands for one device plus one work queue. Signals are ordered with
/// respect to everything previously submitted on that queue.
pub trait Gpu {
    type Fence;
    /// Token returned by [`Gpu::register_completion_wait`], consumed by [`Gpu::block_on`].
    type Wait;
    type Allocator;
    type CommandList;

    fn create_fence(&self, initial_value: u64) -> PacingResult<Self::Fence>;

    fn create_command_allocator(&self) -> PacingResult<Self::Allocator>;

    /// Frees every command recorded into `allocator`. The caller guarantees the GPU is
    /// done with them.
    fn reset_allocator(&self, allocator: &Self::Allocator) -> PacingResult<()>;

    /// Hands closed command lists to the queue for execution, in order.
    fn submit(&self, command_lists: &[&Self::CommandList]) -> PacingResult<()>;

    /// Enqueues "set `fence` to `value`" behind all work submitted so far.
    fn signal(&self, fence: &Self::Fence, value: u64) -> PacingResult<()>;

    /// Highest value the GPU has written to `fence`. Never blocks.
    fn completed_value(&self, fence: &Self::Fence) -> PacingResult<u64>;

    /// Arms an OS wait that fires once `fence` reaches `value`.
    fn register_completion_wait(&self, fence: &Self::Fence, value: u64)
    -> PacingResult<Self::Wait>;

    /// Blocks on an armed wait. `None` waits forever. Returns `false` on timeout.
    fn block_on(&self, wait: &Self::Wait, timeout: Option<Duration>) -> PacingResult<bool>;
}

/// Back buffer formats the samples present with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackBufferFormat {
    /// 8-bit sRGB-range output.
    #[default]
    Rgba8Unorm,
    /// 10-bit output used for ST.2084 HDR.
    Rgb10a2Unorm,
    /// Half-float scRGB output.
    Rgba16Float,
}

/// Presentation operations the pacer needs.
pub trait SwapChain {
    fn buffer_count(&self) -> u32;

    /// Back buffer the next frame renders into. Changes after every present and resize.
    fn current_back_buffer_index(&self) -> u32;

    fn present(&mut self) -> PacingResult<()>;

    /// Recreates the back buffers. Only called by the pacer after a full drain.
    fn resize(&mut self, width: u32, height: u32, format: BackBufferFormat) -> PacingResult<()>;
}
