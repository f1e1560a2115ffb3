//! [`Gpu`] over a Direct3D12 device and direct command queue.

use std::time::Duration;

use tracing::{debug, warn};
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::*;
use windows::core::Interface;

use crate::error::{PacingError, PacingResult};
use crate::gpu::Gpu;

/// HRESULTs after which the device has to be recreated.
const DEVICE_LOST_CODES: [windows::core::HRESULT; 4] = [
    DXGI_ERROR_DEVICE_REMOVED,
    DXGI_ERROR_DEVICE_RESET,
    DXGI_ERROR_DEVICE_HUNG,
    DXGI_ERROR_DRIVER_INTERNAL_ERROR,
];

pub fn map_error(error: windows::core::Error) -> PacingError {
    if DEVICE_LOST_CODES.contains(&error.code()) {
        PacingError::DeviceLost(error.to_string())
    } else {
        PacingError::Backend(error.to_string())
    }
}

/// Whole milliseconds for `WaitForSingleObjectEx`, rounded up so a sub-millisecond
/// timeout still waits instead of polling. Capped just below `INFINITE`.
fn timeout_millis(timeout: Duration) -> u32 {
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    u32::try_from(millis).unwrap_or(INFINITE - 1).min(INFINITE - 1)
}

/// A device plus the direct queue frames are submitted to.
#[derive(Clone)]
pub struct D3d12Queue {
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
}

impl D3d12Queue {
    pub fn new(device: &ID3D12Device) -> PacingResult<Self> {
        let desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            ..Default::default()
        };
        let queue: ID3D12CommandQueue =
            unsafe { device.CreateCommandQueue(&desc) }.map_err(map_error)?;
        Ok(Self {
            device: device.clone(),
            queue,
        })
    }

    pub fn device(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn queue(&self) -> &ID3D12CommandQueue {
        &self.queue
    }

    /// Creates a closed direct command list backed by `allocator`.
    pub fn create_command_list(
        &self,
        allocator: &ID3D12CommandAllocator,
    ) -> PacingResult<ID3D12GraphicsCommandList> {
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, allocator, None)
        }
        .map_err(map_error)?;
        // Command lists are created in the recording state; the render loop resets first.
        unsafe { list.Close() }.map_err(map_error)?;
        Ok(list)
    }

    fn removed_reason(&self) -> String {
        match unsafe { self.device.GetDeviceRemovedReason() } {
            Ok(()) => "fence reported device removal".to_string(),
            Err(e) => e.to_string(),
        }
    }
}

/// An `ID3D12Fence` with the event its waits are delivered through.
pub struct D3d12Fence {
    fence: ID3D12Fence,
    event: HANDLE,
}

impl D3d12Fence {
    pub fn raw(&self) -> &ID3D12Fence {
        &self.fence
    }
}

impl Drop for D3d12Fence {
    fn drop(&mut self) {
        if !self.event.is_invalid() {
            if let Err(e) = unsafe { CloseHandle(self.event) } {
                warn!("Failed to close fence event: {:?}", e);
            }
        }
    }
}

impl Gpu for D3d12Queue {
    type Fence = D3d12Fence;
    type Wait = HANDLE;
    type Allocator = ID3D12CommandAllocator;
    type CommandList = ID3D12GraphicsCommandList;

    fn create_fence(&self, initial_value: u64) -> PacingResult<D3d12Fence> {
        let fence: ID3D12Fence =
            unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
                .map_err(map_error)?;
        let event = unsafe { CreateEventA(None, false, false, None) }.map_err(map_error)?;
        debug!("Created D3D12 fence and completion event");
        Ok(D3d12Fence { fence, event })
    }

    fn create_command_allocator(&self) -> PacingResult<ID3D12CommandAllocator> {
        unsafe {
            self.device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
        }
        .map_err(map_error)
    }

    fn reset_allocator(&self, allocator: &ID3D12CommandAllocator) -> PacingResult<()> {
        unsafe { allocator.Reset() }.map_err(map_error)
    }

    fn submit(&self, command_lists: &[&ID3D12GraphicsCommandList]) -> PacingResult<()> {
        let lists = command_lists
            .iter()
            .map(|list| list.cast::<ID3D12CommandList>().map(Some))
            .collect::<windows::core::Result<Vec<_>>>()
            .map_err(map_error)?;
        unsafe { self.queue.ExecuteCommandLists(&lists) };
        Ok(())
    }

    fn signal(&self, fence: &D3d12Fence, value: u64) -> PacingResult<()> {
        unsafe { self.queue.Signal(&fence.fence, value) }.map_err(map_error)
    }

    fn completed_value(&self, fence: &D3d12Fence) -> PacingResult<u64> {
        let value = unsafe { fence.fence.GetCompletedValue() };
        // A removed device reports every fence as complete.
        if value == u64::MAX {
            return Err(PacingError::DeviceLost(self.removed_reason()));
        }
        Ok(value)
    }

    fn register_completion_wait(&self, fence: &D3d12Fence, value: u64) -> PacingResult<HANDLE> {
        // Drop a signal left behind by a wait that timed out before its value completed.
        unsafe { ResetEvent(fence.event) }.map_err(map_error)?;
        unsafe { fence.fence.SetEventOnCompletion(value, fence.event) }.map_err(map_error)?;
        Ok(fence.event)
    }

    fn block_on(&self, wait: &HANDLE, timeout: Option<Duration>) -> PacingResult<bool> {
        let milliseconds = match timeout {
            Some(timeout) => timeout_millis(timeout),
            None => INFINITE,
        };
        match unsafe { WaitForSingleObjectEx(*wait, milliseconds, false) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            other => Err(PacingError::Backend(format!(
                "waiting on fence event returned {:?}: {}",
                other,
                windows::core::Error::from_win32()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_round_up_to_whole_milliseconds() {
        assert_eq!(timeout_millis(Duration::ZERO), 0);
        assert_eq!(timeout_millis(Duration::from_micros(500)), 1);
        assert_eq!(timeout_millis(Duration::from_millis(16)), 16);
        assert_eq!(timeout_millis(Duration::from_micros(16_001)), 17);
        assert_eq!(timeout_millis(Duration::MAX), INFINITE - 1);
    }

    #[test]
    fn device_removal_codes_map_to_device_lost() {
        let hung = windows::core::Error::from(DXGI_ERROR_DEVICE_HUNG);
        assert!(map_error(hung).is_device_lost());
        let invalid = windows::core::Error::from(E_INVALIDARG);
        assert!(matches!(map_error(invalid), PacingError::Backend(_)));
    }
}
