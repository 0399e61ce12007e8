//! 交换链
//!
//! 后备缓冲的 RTV 在 RTV 堆中连续分配。调整大小时通过 `override_handle`
//! 在同一位置重建视图，RTV 索引在整个生命周期内保持不变。

use tracing::{debug, info};

use crate::core::error::Result;
use crate::gfx::types::{DescriptorHeapKind, Format, RawResourceId, ResourceState, SurfaceTarget, SwapChainDesc, ViewDesc};

use super::descriptor::{CpuDescriptorHandle, DescriptorHandle};
use super::device::Device;

/// 后备缓冲
#[derive(Debug, Clone, Copy)]
pub struct BackBuffer {
    pub resource: RawResourceId,
    pub rtv: DescriptorHandle,
}

impl BackBuffer {
    pub fn rtv_cpu(&self) -> CpuDescriptorHandle {
        self.rtv.cpu
    }
}

/// 交换链
pub struct SwapChain {
    desc: SwapChainDesc,
    vsync: bool,
    /// 连续 RTV 区间的起点
    rtv_base: DescriptorHandle,
    buffers: Vec<BackBuffer>,
}

impl SwapChain {
    pub const FORMAT: Format = Format::Rgba8Unorm;

    pub fn new(device: &mut Device, surface: SurfaceTarget, width: u32, height: u32, vsync: bool) -> Result<Self> {
        let desc = SwapChainDesc {
            width: width.max(1),
            height: height.max(1),
            buffer_count: device.frame_count(),
            format: Self::FORMAT,
        };

        let rtv_base = device.heap_mut(DescriptorHeapKind::Rtv).allocate(desc.buffer_count)?;
        let resources = device.backend_mut().create_swapchain(surface, &desc)?;

        let mut swapchain = Self { desc, vsync, rtv_base, buffers: Vec::new() };
        swapchain.bind_back_buffers(device, resources)?;

        info!(
            width = swapchain.desc.width,
            height = swapchain.desc.height,
            buffers = swapchain.desc.buffer_count,
            vsync,
            "Swapchain created"
        );
        Ok(swapchain)
    }

    /// 为后备缓冲写入 RTV 并以 `Present` 状态登记
    fn bind_back_buffers(&mut self, device: &mut Device, resources: Vec<RawResourceId>) -> Result<()> {
        let increment = device.rtv_heap().allocator().increment_size();
        self.buffers.clear();

        for (i, resource) in resources.into_iter().enumerate() {
            let rtv = self.rtv_base.offset(i as u32, increment);
            device.write_view(DescriptorHeapKind::Rtv, &rtv, resource, &ViewDesc::Rtv { format: self.desc.format })?;
            device
                .tracker_mut()
                .register(resource, &format!("BackBuffer{}", i), ResourceState::Present);
            self.buffers.push(BackBuffer { resource, rtv });
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> Format {
        self.desc.format
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffers.len() as u32
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }

    /// 当前后备缓冲索引，也就是本帧使用的帧槽位
    pub fn current_index(&self, device: &Device) -> u32 {
        device.backend().current_back_buffer_index()
    }

    pub fn back_buffer(&self, index: u32) -> Option<&BackBuffer> {
        self.buffers.get(index as usize)
    }

    pub fn present(&self, device: &mut Device) -> Result<()> {
        device.backend_mut().present(self.vsync)
    }

    /// 调整大小，调用方必须保证 GPU 已空闲
    pub fn resize(&mut self, device: &mut Device, width: u32, height: u32) -> Result<()> {
        let (width, height) = (width.max(1), height.max(1));
        for buffer in &self.buffers {
            device.tracker_mut().forget(buffer.resource);
        }

        let resources = device.backend_mut().resize_swapchain(width, height)?;
        self.desc.width = width;
        self.desc.height = height;

        // 在原位置重建 RTV
        self.rtv_base = device
            .heap_mut(DescriptorHeapKind::Rtv)
            .override_handle(&self.rtv_base, self.desc.buffer_count)?;
        self.bind_back_buffers(device, resources)?;

        debug!(width, height, rtv_base = self.rtv_base.index(), "Swapchain resized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::test_support::test_device;

    #[test]
    fn test_back_buffers_registered_as_present() {
        let mut device = test_device(3);
        let swapchain = SwapChain::new(&mut device, SurfaceTarget::Headless, 320, 240, false).unwrap();

        assert_eq!(swapchain.buffer_count(), 3);
        for i in 0..3 {
            let buffer = swapchain.back_buffer(i).unwrap();
            assert_eq!(buffer.rtv.index(), i);
            assert_eq!(device.tracker().state(buffer.resource), Some(ResourceState::Present));
        }
        assert_eq!(swapchain.current_index(&device), 0);
    }

    #[test]
    fn test_present_advances_index() {
        let mut device = test_device(2);
        let swapchain = SwapChain::new(&mut device, SurfaceTarget::Headless, 64, 64, true).unwrap();
        swapchain.present(&mut device).unwrap();
        assert_eq!(swapchain.current_index(&device), 1);
        swapchain.present(&mut device).unwrap();
        assert_eq!(swapchain.current_index(&device), 0);
    }

    #[test]
    fn test_resize_keeps_rtv_indices() {
        let mut device = test_device(2);
        let mut swapchain = SwapChain::new(&mut device, SurfaceTarget::Headless, 64, 64, false).unwrap();
        let before: Vec<_> = (0..2).map(|i| *swapchain.back_buffer(i).unwrap()).collect();

        // 其他 RTV 分配在交换链之后
        let other = device.heap_mut(DescriptorHeapKind::Rtv).allocate(1).unwrap();
        assert_eq!(other.index(), 2);

        device.flush().unwrap();
        swapchain.resize(&mut device, 128, 96).unwrap();
        assert_eq!((swapchain.width(), swapchain.height()), (128, 96));

        for (i, old) in before.iter().enumerate() {
            let new = swapchain.back_buffer(i as u32).unwrap();
            assert_eq!(new.rtv.index(), old.rtv.index());
            assert_eq!(new.rtv.cpu, old.rtv.cpu);
            assert_ne!(new.resource, old.resource);
            assert_eq!(device.tracker().state(old.resource), None);
            assert_eq!(device.tracker().state(new.resource), Some(ResourceState::Present));
        }
    }
}
