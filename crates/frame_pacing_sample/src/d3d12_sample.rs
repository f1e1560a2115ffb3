use eyre::eyre;
use frame_pacing::d3d12::D3d12Queue;
use frame_pacing::{FramePacer, OffscreenSwapChain};
use tracing::{debug, info, warn};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::command_line::SampleCommandLine;
use crate::render_loop::{FrameRecorder, log_summary, run_frames};
use crate::sample_config::SampleConfig;
use crate::sample_error::SampleResult;

fn create_device(use_warp_device: bool) -> SampleResult<ID3D12Device> {
    let mut debug_flags = DXGI_CREATE_FACTORY_FLAGS(0);
    if cfg!(debug_assertions) {
        unsafe {
            let mut debug: Option<ID3D12Debug> = None;
            if let Some(debug) = D3D12GetDebugInterface(&mut debug).ok().and(debug) {
                debug.EnableDebugLayer();
                debug_flags |= DXGI_CREATE_FACTORY_DEBUG;
                info!("D3D12 Debug Layer Enabled");
            } else {
                warn!("D3D12 Debug Layer unavailable");
            }
        }
    }

    let dxgi_factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(debug_flags) }?;

    let adapter = if use_warp_device {
        info!("Using WARP adapter");
        unsafe { dxgi_factory.EnumWarpAdapter()? }
    } else {
        get_hardware_adapter(&dxgi_factory)?
    };

    let mut device: Option<ID3D12Device> = None;
    unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }?;
    Ok(device.ok_or_else(|| eyre!("D3D12CreateDevice succeeded without a device"))?)
}

/// First hardware adapter that can create a feature level 11.0 device.
fn get_hardware_adapter(factory: &IDXGIFactory4) -> SampleResult<IDXGIAdapter1> {
    for i in 0.. {
        let adapter = match unsafe { factory.EnumAdapters1(i) } {
            Ok(adapter) => adapter,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => return Err(e.into()),
        };

        let desc = unsafe { adapter.GetDesc1()? };
        let adapter_name = String::from_utf16_lossy(&desc.Description);
        let adapter_name = adapter_name.trim_end_matches('\0');

        if (DXGI_ADAPTER_FLAG(desc.Flags as i32) & DXGI_ADAPTER_FLAG_SOFTWARE)
            != DXGI_ADAPTER_FLAG_NONE
        {
            debug!(adapter = adapter_name, "Skipping software adapter");
            continue;
        }

        if unsafe {
            D3D12CreateDevice(
                &adapter,
                D3D_FEATURE_LEVEL_11_0,
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
        }
        .is_ok()
        {
            info!(adapter = adapter_name, "Using hardware adapter");
            return Ok(adapter);
        }
    }
    Err(eyre!("No suitable hardware adapter found").into())
}

/// Records an empty command list each frame. The list is created against the first
/// allocator it sees and reset onto whichever allocator the pacer hands out after that.
#[derive(Default)]
struct D3d12Recorder {
    command_list: Option<ID3D12GraphicsCommandList>,
}

impl FrameRecorder<D3d12Queue> for D3d12Recorder {
    fn record(
        &mut self,
        gpu: &D3d12Queue,
        allocator: &ID3D12CommandAllocator,
        _frame_number: u64,
    ) -> SampleResult<ID3D12GraphicsCommandList> {
        let command_list = match &self.command_list {
            Some(command_list) => command_list.clone(),
            None => {
                let command_list = gpu.create_command_list(allocator)?;
                self.command_list = Some(command_list.clone());
                command_list
            }
        };
        unsafe {
            command_list.Reset(allocator, None)?;
            command_list.Close()?;
        }
        Ok(command_list)
    }
}

pub fn run(command_line: &SampleCommandLine, config: &SampleConfig) -> SampleResult<()> {
    let device = create_device(command_line.use_warp_device)?;
    let gpu = D3d12Queue::new(&device)?;

    // No window, so the back buffers only exist as indices.
    let mut swap_chain = OffscreenSwapChain::new(
        config.pacer.buffer_count,
        config.width,
        config.height,
        config.format,
    )?;
    let mut pacer = FramePacer::for_swap_chain(gpu.clone(), &swap_chain, &config.pacer)?;
    let mut recorder = D3d12Recorder::default();

    run_frames(&gpu, &mut swap_chain, &mut pacer, &mut recorder, config)?;

    log_summary(pacer.stats());
    pacer.shutdown()?;
    Ok(())
}
