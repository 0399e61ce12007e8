//! RHI 上下文
//!
//! 把设备、交换链、每槽位命令列表和场景深度缓冲组织成帧循环：
//!
//! ```text
//! begin_frame:  slot = 当前后备缓冲索引
//!               等待 pending[slot] → 回收延迟释放的对象 → 用 slot 的分配器打开命令列表
//!               绑定着色器可见堆、视口、裁剪矩形
//! (各 Pass 录制命令)
//! present:      关闭并提交 → 呈现 → 发出新的 fence 值记为 pending[slot]
//! ```

use tracing::{debug, info, trace};

use crate::core::config::Config;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GpuBackend;
use crate::gfx::types::{PrimitiveTopology, QueueKind, RawResourceId, ResourceState, ScissorRect, SurfaceTarget, Viewport};

use super::arena::DepthBufferHandle;
use super::command::CommandList;
use super::device::{self, Device, DeviceDesc};
use super::pipeline::PipelineState;
use super::resource::DepthBuffer;
use super::swapchain::{BackBuffer, SwapChain};
use super::sync::FenceValue;

/// 上下文创建参数
#[derive(Debug, Clone)]
pub struct ContextDesc {
    pub device: DeviceDesc,
    pub surface: SurfaceTarget,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

impl ContextDesc {
    pub fn from_config(config: &Config, surface: SurfaceTarget) -> Self {
        Self {
            device: DeviceDesc::from_config(&config.graphics),
            surface,
            width: config.window.width,
            height: config.window.height,
            vsync: config.graphics.vsync,
        }
    }
}

/// 本帧信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// 帧槽位（= 后备缓冲索引）
    pub slot: u32,
    /// 从 0 开始的帧序号
    pub frame_number: u64,
    /// 打开命令列表前是否阻塞等待了 GPU
    pub waited: bool,
}

/// RHI 上下文
pub struct RhiContext {
    // 析构顺序：依赖设备的对象在前
    swapchain: SwapChain,
    list: CommandList,
    depth: DepthBufferHandle,
    viewport: Viewport,
    scissor: ScissorRect,
    /// 正在录制的帧槽位
    frame: Option<u32>,
    frame_number: u64,
    device: Device,
}

impl RhiContext {
    pub fn new(backend: Box<dyn GpuBackend>, desc: &ContextDesc) -> Result<Self> {
        let mut device = Device::new(backend, &desc.device)?;
        let swapchain = SwapChain::new(&mut device, desc.surface, desc.width, desc.height, desc.vsync)?;
        let frame_count = device.frame_count();
        let list = CommandList::new(device.backend_mut(), QueueKind::Graphics, frame_count, "Frame")?;
        let (width, height) = (swapchain.width(), swapchain.height());
        // 场景深度只需要 DSV，线性深度另由 GBuffer 输出
        let depth = device.create_depth_buffer("Scene Depth", width, height, false)?;

        info!(width, height, frames = device.frame_count(), "RHI context initialized");
        Ok(Self {
            swapchain,
            list,
            depth,
            viewport: Viewport::full(width, height),
            scissor: ScissorRect::full(width, height),
            frame: None,
            frame_number: 0,
            device,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    pub fn swapchain(&self) -> &SwapChain {
        &self.swapchain
    }

    pub fn width(&self) -> u32 {
        self.swapchain.width()
    }

    pub fn height(&self) -> u32 {
        self.swapchain.height()
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.swapchain.set_vsync(vsync);
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// 正在录制的帧槽位
    pub fn frame_slot(&self) -> Result<u32> {
        self.frame
            .ok_or_else(|| GraphicsError::InvalidCommandListState("No frame in progress".into()).into())
    }

    pub fn is_recording(&self) -> bool {
        self.frame.is_some()
    }

    pub fn list(&mut self) -> &mut CommandList {
        &mut self.list
    }

    pub fn depth_buffer(&self) -> Result<&DepthBuffer> {
        self.device.depth_buffer(self.depth)
    }

    /// 本帧的后备缓冲
    pub fn back_buffer(&self) -> Result<BackBuffer> {
        let slot = self.frame_slot()?;
        self.swapchain
            .back_buffer(slot)
            .copied()
            .ok_or_else(|| GraphicsError::SwapchainError(format!("No back buffer for slot {}", slot)).into())
    }

    /// 开始一帧
    pub fn begin_frame(&mut self) -> Result<FrameInfo> {
        if self.frame.is_some() {
            return Err(GraphicsError::InvalidCommandListState("begin_frame called while a frame is open".into()).into());
        }

        let slot = self.swapchain.current_index(&self.device);
        let waited = self.device.wait_for_slot(slot)?;
        self.device.collect_garbage();

        let last_use = self.device.fence().pending_value(slot);
        self.list.open(self.device.backend_mut(), slot, last_use)?;
        self.list.set_descriptor_heap(self.device.srv_heap().id())?;
        self.list.set_viewport(self.viewport)?;
        self.list.set_scissor(self.scissor)?;
        self.list.set_topology(PrimitiveTopology::TriangleList)?;

        self.frame = Some(slot);
        trace!(slot, frame = self.frame_number, waited, "Frame begun");
        Ok(FrameInfo { slot, frame_number: self.frame_number, waited })
    }

    /// 录制一次转换屏障；调试构建会先校验声明的 before 状态
    pub fn transition(&mut self, resource: RawResourceId, before: ResourceState, after: ResourceState) -> Result<()> {
        device::transition(&mut self.list, self.device.tracker_mut(), resource, before, after)
    }

    /// 进入 Pass 作用域
    pub fn begin_pass(&mut self, name: &str) {
        trace!(pass = name, "Pass begun");
        self.device.tracker_mut().begin_scope(name);
    }

    /// 离开 Pass 作用域，检查转换是否成对
    pub fn end_pass(&mut self) -> Result<()> {
        self.device.tracker_mut().end_scope()
    }

    pub fn set_pipeline(&mut self, pipeline: &PipelineState) -> Result<()> {
        self.list.set_root_signature(pipeline.root_signature)?;
        self.list.set_pipeline(pipeline.pipeline)
    }

    /// 结束一帧：提交、呈现并为本槽位发出信号
    pub fn present(&mut self) -> Result<FenceValue> {
        let slot = self.frame_slot()?;
        self.list.close()?;
        self.device.submit(&mut self.list)?;
        self.frame = None;

        self.swapchain.present(&mut self.device)?;
        let value = self.device.signal_frame(slot)?;

        trace!(slot, frame = self.frame_number, fence = value.value(), "Frame presented");
        self.frame_number += 1;
        Ok(value)
    }

    /// 窗口尺寸变化
    ///
    /// 等待 GPU 空闲后重建后备缓冲与深度缓冲。
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.frame.is_some() {
            return Err(GraphicsError::InvalidCommandListState("Resize during an open frame".into()).into());
        }
        let (width, height) = (width.max(1), height.max(1));
        if width == self.width() && height == self.height() {
            return Ok(());
        }

        self.device.flush()?;
        self.swapchain.resize(&mut self.device, width, height)?;

        self.device.destroy_depth_buffer(self.depth)?;
        self.depth = self.device.create_depth_buffer("Scene Depth", width, height, false)?;

        self.viewport = Viewport::full(width, height);
        self.scissor = ScissorRect::full(width, height);
        debug!(width, height, "RHI context resized");
        Ok(())
    }

    /// 等待 GPU 空闲
    pub fn flush(&mut self) -> Result<()> {
        self.device.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::software::{CompletionMode, JournalEvent, SoftwareBackend};
    use crate::gfx::types::Format;
    use crate::renderer::resource::BufferDesc;
    use crate::renderer::test_support::context_desc;

    fn context(frames: u32, mode: CompletionMode) -> (RhiContext, crate::gfx::software::SoftwareProbe) {
        let backend = SoftwareBackend::with_completion(mode);
        let probe = backend.probe();
        let ctx = RhiContext::new(Box::new(backend), &context_desc(frames, 64, 64)).unwrap();
        (ctx, probe)
    }

    #[test]
    fn test_frame_slots_follow_back_buffer() {
        let (mut ctx, _) = context(3, CompletionMode::Immediate);
        let slots: Vec<u32> = (0..5)
            .map(|_| {
                let info = ctx.begin_frame().unwrap();
                ctx.present().unwrap();
                info.slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
        assert_eq!(ctx.frame_number(), 5);
    }

    #[test]
    fn test_waits_only_when_slot_reused() {
        let (mut ctx, probe) = context(3, CompletionMode::Deferred);
        probe.clear_journal();

        let waited: Vec<bool> = (0..6)
            .map(|_| {
                let info = ctx.begin_frame().unwrap();
                ctx.present().unwrap();
                info.waited
            })
            .collect();
        assert_eq!(waited, vec![false, false, false, true, true, true]);

        // 每次复用分配器时，它上一次提交的 fence 值都已完成
        probe.with_journal(|journal| {
            let resets: Vec<u64> = journal
                .events()
                .iter()
                .filter_map(|e| match e {
                    JournalEvent::ResetAllocator { completed, .. } => Some(*completed),
                    _ => None,
                })
                .collect();
            assert_eq!(resets.len(), 6);
            assert!(resets[3] >= resets[0]);
        });
    }

    #[test]
    fn test_signals_strictly_increase() {
        let (mut ctx, probe) = context(2, CompletionMode::Immediate);
        let values: Vec<u64> = (0..4)
            .map(|_| {
                ctx.begin_frame().unwrap();
                ctx.present().unwrap().value()
            })
            .collect();
        assert!(values.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(probe.signaled_value(), *values.last().unwrap());
    }

    #[test]
    fn test_begin_twice_rejected() {
        let (mut ctx, _) = context(2, CompletionMode::Immediate);
        ctx.begin_frame().unwrap();
        assert!(ctx.begin_frame().is_err());
        assert!(ctx.on_resize(32, 32).is_err());
        ctx.present().unwrap();
        assert!(ctx.present().is_err());
    }

    #[test]
    fn test_failed_present_keeps_frame_open() {
        let (mut ctx, _) = context(2, CompletionMode::Immediate);
        let info = ctx.begin_frame().unwrap();
        ctx.list().close().unwrap();

        assert!(ctx.present().is_err());
        assert!(ctx.is_recording());
        assert_eq!(ctx.frame_slot().unwrap(), info.slot);
        assert!(ctx.begin_frame().is_err());
        assert_eq!(ctx.frame_number(), 0);
    }

    #[test]
    fn test_back_buffer_transition_validated() {
        let (mut ctx, _) = context(2, CompletionMode::Immediate);
        ctx.begin_frame().unwrap();
        let back = ctx.back_buffer().unwrap();

        ctx.begin_pass("Composite");
        // 错误的 before 状态
        assert!(ctx.transition(back.resource, ResourceState::RenderTarget, ResourceState::Present).is_err());
        ctx.transition(back.resource, ResourceState::Present, ResourceState::RenderTarget).unwrap();
        ctx.transition(back.resource, ResourceState::RenderTarget, ResourceState::Present).unwrap();
        ctx.end_pass().unwrap();
        ctx.present().unwrap();
    }

    #[test]
    fn test_resize_recreates_depth() {
        let (mut ctx, _) = context(2, CompletionMode::Deferred);
        ctx.begin_frame().unwrap();
        ctx.present().unwrap();

        let old_dsv = ctx.depth_buffer().unwrap().dsv().index();
        ctx.on_resize(200, 100).unwrap();
        assert_eq!((ctx.width(), ctx.height()), (200, 100));

        let depth = ctx.depth_buffer().unwrap();
        assert_eq!((depth.width(), depth.height()), (200, 100));
        assert_ne!(depth.dsv().index(), old_dsv);

        let info = ctx.begin_frame().unwrap();
        assert_eq!(info.slot, 0);
        ctx.present().unwrap();
    }

    #[test]
    fn test_destroyed_mid_frame_outlives_its_frame() {
        let (mut ctx, probe) = context(2, CompletionMode::Deferred);
        let scratch = ctx
            .device_mut()
            .create_render_texture("Scratch", 16, 16, Format::Rgba16Float, [0.0; 4])
            .unwrap();
        ctx.flush().unwrap();

        ctx.begin_frame().unwrap();
        let target = ctx.device().render_texture(scratch).unwrap().resource().id();
        ctx.begin_pass("Scratch");
        ctx.transition(target, ResourceState::PixelShaderResource, ResourceState::RenderTarget).unwrap();
        ctx.transition(target, ResourceState::RenderTarget, ResourceState::PixelShaderResource).unwrap();
        ctx.end_pass().unwrap();
        ctx.device_mut().destroy_render_texture(scratch).unwrap();

        // 帧内的上传会发出并等待自己的 fence 值
        let late = ctx.device_mut().create_buffer(BufferDesc::vertex("Late", 16, 4), &[0u8; 64]).unwrap();
        let live = ctx.device().memory().stats().live_resources;
        let frame_value = ctx.present().unwrap();

        let info = ctx.begin_frame().unwrap();
        assert!(!info.waited);
        assert!(probe.completed_value() < frame_value.value());
        assert_eq!(ctx.device().memory().stats().live_resources, live);
        assert!(ctx.device().pending_releases() > 0);
        ctx.present().unwrap();

        // 复用槽位 0 时才等到那一帧完成
        let info = ctx.begin_frame().unwrap();
        assert!(info.waited);
        assert!(probe.completed_value() >= frame_value.value());
        assert_eq!(ctx.device().memory().stats().live_resources, live - 1);
        ctx.present().unwrap();

        ctx.device_mut().destroy_buffer(late).unwrap();
    }
}
