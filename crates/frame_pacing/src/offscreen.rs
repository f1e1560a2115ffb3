use tracing::info;

use crate::error::{PacingError, PacingResult};
use crate::gpu::{BackBufferFormat, SwapChain};

/// A swap chain with no window behind it.
///
/// Presenting flips to the next back buffer the way a flip-model swap chain does, so the
/// pacer sees the same index sequence it would with a real one.
#[derive(Debug, Clone)]
pub struct OffscreenSwapChain {
    buffer_count: u32,
    current: u32,
    width: u32,
    height: u32,
    format: BackBufferFormat,
    presents: u64,
    resizes: u32,
}

impl OffscreenSwapChain {
    pub fn new(
        buffer_count: u32,
        width: u32,
        height: u32,
        format: BackBufferFormat,
    ) -> PacingResult<Self> {
        if buffer_count == 0 {
            return Err(PacingError::Config(
                "a swap chain needs at least one back buffer".into(),
            ));
        }
        Ok(Self {
            buffer_count,
            current: 0,
            width,
            height,
            format,
            presents: 0,
            resizes: 0,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> BackBufferFormat {
        self.format
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn resizes(&self) -> u32 {
        self.resizes
    }
}

impl SwapChain for OffscreenSwapChain {
    fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.current
    }

    fn present(&mut self) -> PacingResult<()> {
        self.presents += 1;
        self.current = (self.current + 1) % self.buffer_count;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32, format: BackBufferFormat) -> PacingResult<()> {
        info!(width, height, ?format, "Resizing offscreen back buffers");
        self.width = width;
        self.height = height;
        self.format = format;
        self.resizes += 1;
        // Recreated buffers start over at index zero, like ResizeBuffers.
        self.current = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_cycles_back_buffers() {
        let mut chain = OffscreenSwapChain::new(3, 64, 64, BackBufferFormat::default()).unwrap();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(chain.current_back_buffer_index());
            chain.present().unwrap();
        }
        assert_eq!(seen, [0, 1, 2, 0]);
        assert_eq!(chain.presents(), 4);
    }

    #[test]
    fn resize_restarts_at_first_buffer() {
        let mut chain = OffscreenSwapChain::new(2, 64, 64, BackBufferFormat::Rgba8Unorm).unwrap();
        chain.present().unwrap();
        chain.resize(128, 32, BackBufferFormat::Rgba16Float).unwrap();
        assert_eq!(chain.current_back_buffer_index(), 0);
        assert_eq!(chain.size(), (128, 32));
        assert_eq!(chain.format(), BackBufferFormat::Rgba16Float);
    }

    #[test]
    fn zero_buffers_is_rejected() {
        assert!(OffscreenSwapChain::new(0, 1, 1, BackBufferFormat::default()).is_err());
    }
}
