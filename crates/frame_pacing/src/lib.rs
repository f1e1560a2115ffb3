//! Frame pacing for explicit graphics APIs.
//!
//! Every Direct3D12 hello-world sample carries its own copy of the same dance: a command
//! allocator per back buffer, one fence with a growing counter, a signal after each
//! submit and a wait before an allocator is reused. This crate is that dance, once.
//!
//! - [`FrameFence`]: the counter plus "signal after GPU work" and "block until reached".
//! - [`FramePacer`]: the per-slot allocators and the state machine deciding when the CPU
//!   may reuse them.
//!
//! The device, queue and swap chain stay with the caller behind the [`Gpu`] and
//! [`SwapChain`] traits. [`SimulatedGpu`] and [`OffscreenSwapChain`] implement them
//! without any hardware; `d3d12::D3d12Queue` implements [`Gpu`] on Windows.
//!
//! ```
//! use frame_pacing::{
//!     BackBufferFormat, CompletionMode, FramePacer, Gpu, OffscreenSwapChain, PacerConfig,
//!     SimulatedGpu, SwapChain,
//! };
//! # fn main() -> Result<(), frame_pacing::PacingError> {
//! let gpu = SimulatedGpu::new(CompletionMode::Immediate);
//! let mut swap_chain = OffscreenSwapChain::new(2, 1280, 720, BackBufferFormat::default())?;
//! let mut pacer = FramePacer::for_swap_chain(gpu.clone(), &swap_chain, &PacerConfig::default())?;
//!
//! for _ in 0..3 {
//!     let list = {
//!         let frame = pacer.begin_frame(&swap_chain)?;
//!         gpu.record(frame.allocator())
//!     };
//!     gpu.submit(&[&list])?;
//!     pacer.end_frame()?;
//!     swap_chain.present()?;
//! }
//! pacer.shutdown()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod fence;
mod gpu;
mod offscreen;
mod pacer;
mod simulated;
mod slot;

#[cfg(windows)]
pub mod d3d12;

pub use config::{MAX_BUFFER_COUNT, PacerConfig};
pub use error::{PacingError, PacingResult};
pub use fence::FrameFence;
pub use gpu::{BackBufferFormat, Gpu, SwapChain};
pub use offscreen::OffscreenSwapChain;
pub use pacer::{ActiveFrame, FramePacer, PacerStats};
pub use simulated::{
    CompletionMode, SimAllocator, SimCommandList, SimFence, SimWait, SimulatedGpu,
};
pub use slot::{FrameSlot, SlotState};
