//! 软件参考后端
//!
//! 在 CPU 内存上实现 `GpuBackend` 的全部语义：资源是字节数组，
//! 拷贝与清除真实执行，绘制只计数，fence 由 `CompletionMode` 决定何时完成。
//! 它让渲染核心可以在没有 GPU 的环境中运行，也是同步与描述符逻辑测试的基础。

mod allocator;
mod journal;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use half::f16;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::core::config::FeatureLevel;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GpuBackend;
use crate::gfx::command::Command;
use crate::gfx::types::*;

pub use allocator::{BlockAllocator, SubAllocation, DEFAULT_BLOCK_SIZE};
pub use journal::{CompletionMode, Journal, JournalEvent, SoftwareProbe, DEFAULT_JOURNAL_CAPACITY};
use journal::FenceState;

/// 软件后端的创建参数
#[derive(Debug, Clone)]
pub struct SoftwareBackendDesc {
    pub completion: CompletionMode,
    /// 暴露给适配器选择逻辑的适配器列表
    pub adapters: Vec<AdapterInfo>,
    pub capabilities: DeviceCapabilities,
    pub block_size: u64,
    /// 执行日志保留的事件数
    pub journal_capacity: usize,
}

impl Default for SoftwareBackendDesc {
    fn default() -> Self {
        Self {
            completion: CompletionMode::Deferred,
            adapters: vec![AdapterInfo {
                index: 0,
                name: "Software Reference Adapter".to_string(),
                vendor_id: 0x1414,
                device_id: 0x008c,
                dedicated_video_memory: 256 * 1024 * 1024,
                max_feature_level: FeatureLevel::Level12_2,
                is_software: true,
            }],
            capabilities: DeviceCapabilities {
                feature_level: FeatureLevel::Level12_2,
                shader_model: (6, 6),
                wave_ops: true,
                wave_lane_count_min: 32,
                raytracing_tier: RaytracingTier::NotSupported,
                mesh_shader_tier: MeshShaderTier::NotSupported,
                resource_binding_tier: ResourceBindingTier::Tier3,
            },
            block_size: DEFAULT_BLOCK_SIZE,
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct SoftResource {
    desc: ResourceDesc,
    placement: MemoryPlacement,
    data: Vec<u8>,
    allocation: SubAllocation,
}

#[derive(Debug)]
struct SoftHeap {
    kind: DescriptorHeapKind,
    views: Vec<Option<(RawResourceId, ViewDesc)>>,
}

#[derive(Debug)]
struct SoftSwapChain {
    desc: SwapChainDesc,
    buffers: Vec<RawResourceId>,
    current: u32,
}

/// 软件参考后端
pub struct SoftwareBackend {
    desc: SoftwareBackendDesc,
    feature_level: Option<FeatureLevel>,
    queues: Vec<QueueKind>,
    next_resource: u64,
    resources: HashMap<RawResourceId, SoftResource>,
    memory: BlockAllocator,
    heaps: Vec<SoftHeap>,
    allocators: Vec<QueueKind>,
    root_signatures: Vec<String>,
    pipelines: Vec<String>,
    swapchain: Option<SoftSwapChain>,
    journal: Arc<Mutex<Journal>>,
    fence: Arc<Mutex<FenceState>>,
}

/// 伪造的描述符地址基址，保证 CPU 句柄非零
const CPU_HEAP_BASE: usize = 0x1000_0000;
const GPU_HEAP_BASE: u64 = 0x8000_0000_0000;
const HEAP_STRIDE: usize = 0x0100_0000;

impl SoftwareBackend {
    pub fn new(desc: SoftwareBackendDesc) -> Self {
        let memory = BlockAllocator::new(desc.block_size);
        let journal = Journal::with_capacity(desc.journal_capacity);
        Self {
            desc,
            feature_level: None,
            queues: Vec::new(),
            next_resource: 1,
            resources: HashMap::new(),
            memory,
            heaps: Vec::new(),
            allocators: Vec::new(),
            root_signatures: Vec::new(),
            pipelines: Vec::new(),
            swapchain: None,
            journal: Arc::new(Mutex::new(journal)),
            fence: Arc::new(Mutex::new(FenceState::default())),
        }
    }

    pub fn with_completion(completion: CompletionMode) -> Self {
        Self::new(SoftwareBackendDesc { completion, ..Default::default() })
    }

    /// 观察句柄
    pub fn probe(&self) -> SoftwareProbe {
        SoftwareProbe {
            journal: Arc::clone(&self.journal),
            fence: Arc::clone(&self.fence),
        }
    }

    fn record(&self, event: JournalEvent) {
        self.journal.lock().push(event);
    }

    fn ensure_device(&self) -> Result<()> {
        if self.feature_level.is_none() {
            return Err(GraphicsError::DeviceCreation("Device has not been created".into()).into());
        }
        Ok(())
    }

    fn resource(&self, id: RawResourceId) -> Result<&SoftResource> {
        self.resources
            .get(&id)
            .ok_or_else(|| GraphicsError::CommandExecution(format!("Unknown {}", id)).into())
    }

    fn resource_mut(&mut self, id: RawResourceId) -> Result<&mut SoftResource> {
        self.resources
            .get_mut(&id)
            .ok_or_else(|| GraphicsError::CommandExecution(format!("Unknown {}", id)).into())
    }

    fn create_resource_inner(
        &mut self,
        desc: &ResourceDesc,
        placement: MemoryPlacement,
    ) -> RawResourceId {
        let bytes = desc.packed_size();
        let alignment = if desc.is_buffer() { CONSTANT_BUFFER_ALIGNMENT } else { 64 * 1024 };
        let allocation = self.memory.allocate(placement, bytes, alignment);

        let id = RawResourceId(self.next_resource);
        self.next_resource += 1;

        self.resources.insert(
            id,
            SoftResource {
                desc: desc.clone(),
                placement,
                data: vec![0; bytes as usize],
                allocation,
            },
        );
        self.record(JournalEvent::CreateResource {
            resource: id,
            label: desc.label.clone(),
            placement,
            bytes,
        });
        trace!(resource = %id, label = %desc.label, bytes, "Software resource created");
        id
    }

    fn create_back_buffers(&mut self, desc: &SwapChainDesc) -> Vec<RawResourceId> {
        (0..desc.buffer_count)
            .map(|i| {
                let buffer = ResourceDesc::texture_2d(
                    format!("BackBuffer{}", i),
                    desc.width,
                    desc.height,
                    desc.format,
                )
                .with_flags(ResourceFlags::RENDER_TARGET);
                self.create_resource_inner(&buffer, MemoryPlacement::DeviceLocal)
            })
            .collect()
    }

    fn execute_command(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::Barrier(barriers) => {
                for barrier in barriers {
                    self.resource(barrier.resource)?;
                    self.record(JournalEvent::Barrier {
                        resource: barrier.resource,
                        before: barrier.before,
                        after: barrier.after,
                    });
                }
            }
            Command::CopyBuffer { dst, dst_offset, src, src_offset, size } => {
                let bytes = read_range(self.resource(*src)?, *src_offset, *size as usize)?;
                write_range(self.resource_mut(*dst)?, *dst_offset, &bytes)?;
            }
            Command::CopyBufferToTexture { dst, subresource, src, src_offset, footprint } => {
                let source = self.resource(*src)?;
                let mut rows = Vec::with_capacity(footprint.row_bytes() as usize * footprint.height as usize);
                for row in 0..footprint.height as u64 {
                    let offset = src_offset + row * footprint.row_pitch as u64;
                    rows.extend(read_range(source, offset, footprint.row_bytes() as usize)?);
                }
                let target = self.resource_mut(*dst)?;
                let base = subresource_offset(&target.desc, *subresource);
                write_range(target, base, &rows)?;
            }
            Command::CopyTextureToBuffer { dst, dst_offset, src, subresource, footprint } => {
                let source = self.resource(*src)?;
                let base = subresource_offset(&source.desc, *subresource);
                let row_bytes = footprint.row_bytes() as usize;
                let mut rows = Vec::with_capacity(footprint.height as usize);
                for row in 0..footprint.height as u64 {
                    rows.push(read_range(source, base + row * row_bytes as u64, row_bytes)?);
                }
                let target = self.resource_mut(*dst)?;
                for (row, bytes) in rows.iter().enumerate() {
                    let offset = dst_offset + row as u64 * footprint.row_pitch as u64;
                    write_range(target, offset, bytes)?;
                }
            }
            Command::ClearRenderTarget { resource, color, .. } => {
                let target = self.resource_mut(*resource)?;
                let texel = encode_color(target.desc.format, *color);
                fill(&mut target.data, &texel);
            }
            Command::ClearDepth { resource, depth, .. } => {
                let target = self.resource_mut(*resource)?;
                fill(&mut target.data, &depth.to_le_bytes());
            }
            Command::SetRootConstantBuffer { resource, .. } => {
                self.resource(*resource)?;
            }
            Command::SetIndexBuffer(view) => {
                if let Some(resource) = view.resource {
                    self.resource(resource)?;
                }
            }
            Command::SetDescriptorHeap(heap) => {
                if self.heaps.get(heap.0 as usize).is_none() {
                    return Err(GraphicsError::CommandExecution("Unknown descriptor heap".into()).into());
                }
            }
            Command::SetRootSignature(id) => {
                if self.root_signatures.get(id.0 as usize).is_none() {
                    return Err(GraphicsError::CommandExecution("Unknown root signature".into()).into());
                }
            }
            Command::SetPipeline(id) => {
                if self.pipelines.get(id.0 as usize).is_none() {
                    return Err(GraphicsError::CommandExecution("Unknown pipeline".into()).into());
                }
            }
            Command::SetRootConstants { .. }
            | Command::SetRenderTargets { .. }
            | Command::SetViewport(_)
            | Command::SetScissor(_)
            | Command::SetTopology(_)
            | Command::Draw { .. }
            | Command::DrawIndexed { .. } => {}
        }
        Ok(())
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new(SoftwareBackendDesc::default())
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "Software"
    }

    fn enumerate_adapters(&mut self) -> Result<Vec<AdapterInfo>> {
        Ok(self.desc.adapters.clone())
    }

    fn create_device(&mut self, adapter: &AdapterInfo, feature_level: FeatureLevel) -> Result<()> {
        let known = self.desc.adapters.iter().find(|a| a.index == adapter.index);
        match known {
            Some(a) if a.max_feature_level >= feature_level => {
                self.feature_level = Some(feature_level);
                info!(adapter = %a.name, feature_level = feature_level.name(), "Software device created");
                Ok(())
            }
            _ => Err(GraphicsError::DeviceCreation(format!(
                "Adapter '{}' does not support feature level {}",
                adapter.name,
                feature_level.name()
            ))
            .into()),
        }
    }

    fn query_capabilities(&self) -> Result<DeviceCapabilities> {
        let feature_level = self
            .feature_level
            .ok_or_else(|| GraphicsError::DeviceCreation("Device has not been created".into()))?;
        Ok(DeviceCapabilities { feature_level, ..self.desc.capabilities })
    }

    fn create_queue(&mut self, kind: QueueKind) -> Result<()> {
        self.ensure_device()?;
        self.queues.push(kind);
        debug!(queue = ?kind, "Software queue created");
        Ok(())
    }

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
        label: &str,
    ) -> Result<(RawHeapId, DescriptorHeapInfo)> {
        self.ensure_device()?;
        let index = self.heaps.len();
        self.heaps.push(SoftHeap { kind, views: vec![None; capacity as usize] });

        let info = DescriptorHeapInfo {
            cpu_start: CPU_HEAP_BASE + index * HEAP_STRIDE,
            gpu_start: kind
                .is_shader_visible()
                .then(|| GPU_HEAP_BASE + (index * HEAP_STRIDE) as u64),
            increment_size: match kind {
                DescriptorHeapKind::CbvSrvUav => 32,
                DescriptorHeapKind::Rtv | DescriptorHeapKind::Dsv => 8,
            },
        };
        debug!(heap = label, kind = kind.name(), capacity, "Software descriptor heap created");
        Ok((RawHeapId(index as u32), info))
    }

    fn write_view(
        &mut self,
        heap: RawHeapId,
        index: u32,
        resource: RawResourceId,
        view: &ViewDesc,
    ) -> Result<()> {
        self.resource(resource)?;
        let heap = self
            .heaps
            .get_mut(heap.0 as usize)
            .ok_or_else(|| GraphicsError::ResourceCreation("Unknown descriptor heap".into()))?;
        let kind = heap.kind;
        let slot = heap.views.get_mut(index as usize).ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("Descriptor index {} outside {} heap", index, kind.name()))
        })?;
        *slot = Some((resource, *view));
        Ok(())
    }

    fn create_resource(
        &mut self,
        desc: &ResourceDesc,
        placement: MemoryPlacement,
        _initial_state: ResourceState,
    ) -> Result<RawResourceId> {
        self.ensure_device()?;
        if !desc.is_buffer() && (desc.width == 0 || desc.height == 0) {
            return Err(GraphicsError::ResourceCreation(format!("'{}' has zero extent", desc.label)).into());
        }
        Ok(self.create_resource_inner(desc, placement))
    }

    fn destroy_resource(&mut self, resource: RawResourceId) {
        if let Some(res) = self.resources.remove(&resource) {
            self.memory.free(res.allocation);
            self.record(JournalEvent::DestroyResource { resource });
        }
    }

    fn write_buffer(&mut self, resource: RawResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let target = self.resource_mut(resource)?;
        if !target.placement.is_cpu_visible() {
            return Err(GraphicsError::CommandExecution(format!(
                "Map of '{}' failed: {} memory is not CPU visible",
                target.desc.label,
                target.placement.name()
            ))
            .into());
        }
        write_range(target, offset, data)
    }

    fn read_buffer(&mut self, resource: RawResourceId, offset: u64, len: usize) -> Result<Vec<u8>> {
        let source = self.resource(resource)?;
        if !source.placement.is_cpu_visible() {
            return Err(GraphicsError::CommandExecution(format!(
                "Map of '{}' failed: {} memory is not CPU visible",
                source.desc.label,
                source.placement.name()
            ))
            .into());
        }
        read_range(source, offset, len)
    }

    fn create_command_allocator(&mut self, queue: QueueKind) -> Result<AllocatorId> {
        self.ensure_device()?;
        self.allocators.push(queue);
        Ok(AllocatorId(self.allocators.len() as u32 - 1))
    }

    fn reset_command_allocator(&mut self, allocator: AllocatorId) -> Result<()> {
        if self.allocators.get(allocator.0 as usize).is_none() {
            return Err(GraphicsError::CommandExecution("Unknown command allocator".into()).into());
        }
        let completed = self.fence.lock().completed;
        self.record(JournalEvent::ResetAllocator { allocator, completed });
        Ok(())
    }

    fn execute(&mut self, queue: QueueKind, allocator: AllocatorId, commands: &[Command]) -> Result<()> {
        if !self.queues.contains(&queue) {
            return Err(GraphicsError::CommandExecution(format!("Queue {:?} was not created", queue)).into());
        }
        for command in commands {
            self.execute_command(command)?;
        }
        self.record(JournalEvent::Execute {
            queue,
            allocator,
            commands: commands.len(),
            draws: commands.iter().filter(|c| c.is_draw()).count(),
        });
        Ok(())
    }

    fn signal(&mut self, _queue: QueueKind, value: u64) -> Result<()> {
        {
            let mut fence = self.fence.lock();
            if value <= fence.signaled {
                return Err(GraphicsError::CommandExecution(format!(
                    "Fence value {} is not greater than last signal {}",
                    value, fence.signaled
                ))
                .into());
            }
            fence.signaled = value;
            if self.desc.completion == CompletionMode::Immediate {
                fence.completed = value;
            }
        }
        self.record(JournalEvent::Signal { value });
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.fence.lock().completed
    }

    fn wait_for_value(&mut self, value: u64, timeout: Option<Duration>) -> Result<()> {
        let completed_before = {
            let mut fence = self.fence.lock();
            if fence.completed >= value {
                return Ok(());
            }
            if value > fence.signaled {
                // 没有任何提交会发出这个值
                return Err(match timeout {
                    Some(timeout) => GraphicsError::FenceTimeout {
                        value,
                        completed: fence.completed,
                        timeout_ms: timeout.as_millis() as u64,
                    },
                    None => GraphicsError::CommandExecution(format!(
                        "Wait for fence value {} that was never signaled",
                        value
                    )),
                }
                .into());
            }
            let before = fence.completed;
            fence.completed = value;
            before
        };
        self.record(JournalEvent::Wait { value, completed_before });
        Ok(())
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> Result<RootSignatureId> {
        self.ensure_device()?;
        if desc.cost() > MAX_ROOT_SIGNATURE_DWORDS {
            return Err(GraphicsError::PipelineCreation(format!(
                "Root signature '{}' uses {} DWORDs",
                desc.label,
                desc.cost()
            ))
            .into());
        }
        self.root_signatures.push(desc.label.clone());
        Ok(RootSignatureId(self.root_signatures.len() as u32 - 1))
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> Result<PipelineId> {
        self.ensure_device()?;
        if self.root_signatures.get(desc.root_signature.0 as usize).is_none() {
            return Err(GraphicsError::PipelineCreation(format!("'{}' uses an unknown root signature", desc.label)).into());
        }
        if desc.render_target_formats.len() > MAX_RENDER_TARGETS {
            return Err(GraphicsError::PipelineCreation(format!(
                "'{}' binds {} render targets",
                desc.label,
                desc.render_target_formats.len()
            ))
            .into());
        }
        self.pipelines.push(desc.label.clone());
        Ok(PipelineId(self.pipelines.len() as u32 - 1))
    }

    fn create_swapchain(&mut self, _surface: SurfaceTarget, desc: &SwapChainDesc) -> Result<Vec<RawResourceId>> {
        self.ensure_device()?;
        let buffers = self.create_back_buffers(desc);
        self.swapchain = Some(SoftSwapChain { desc: *desc, buffers: buffers.clone(), current: 0 });
        info!(width = desc.width, height = desc.height, buffers = desc.buffer_count, "Software swap chain created");
        Ok(buffers)
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<Vec<RawResourceId>> {
        let mut swapchain = self
            .swapchain
            .take()
            .ok_or_else(|| GraphicsError::SwapchainError("Swap chain has not been created".into()))?;
        for buffer in swapchain.buffers.drain(..) {
            self.destroy_resource(buffer);
        }
        swapchain.desc.width = width;
        swapchain.desc.height = height;
        swapchain.buffers = self.create_back_buffers(&swapchain.desc);
        swapchain.current = 0;

        let buffers = swapchain.buffers.clone();
        self.swapchain = Some(swapchain);
        Ok(buffers)
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.swapchain.as_ref().map_or(0, |s| s.current)
    }

    fn present(&mut self, _vsync: bool) -> Result<()> {
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| GraphicsError::SwapchainError("Swap chain has not been created".into()))?;
        let back_buffer = swapchain.current;
        swapchain.current = (swapchain.current + 1) % swapchain.desc.buffer_count;
        self.record(JournalEvent::Present { back_buffer });
        Ok(())
    }
}

fn out_of_range(label: &str, offset: u64, len: usize, size: usize) -> crate::core::error::RenderError {
    GraphicsError::CommandExecution(format!(
        "Access {}..{} outside '{}' ({} bytes)",
        offset,
        offset + len as u64,
        label,
        size
    ))
    .into()
}

fn read_range(resource: &SoftResource, offset: u64, len: usize) -> Result<Vec<u8>> {
    let start = offset as usize;
    resource
        .data
        .get(start..start + len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| out_of_range(&resource.desc.label, offset, len, resource.data.len()))
}

fn write_range(resource: &mut SoftResource, offset: u64, bytes: &[u8]) -> Result<()> {
    let start = offset as usize;
    let size = resource.data.len();
    match resource.data.get_mut(start..start + bytes.len()) {
        Some(target) => {
            target.copy_from_slice(bytes);
            Ok(())
        }
        None => Err(out_of_range(&resource.desc.label, offset, bytes.len(), size)),
    }
}

/// 紧密排列下子资源的起始偏移
fn subresource_offset(desc: &ResourceDesc, subresource: u32) -> u64 {
    (0..subresource)
        .map(|sub| {
            let (w, h) = desc.subresource_extent(sub);
            w as u64 * h as u64 * desc.format.bytes_per_pixel() as u64
        })
        .sum()
}

fn fill(data: &mut [u8], texel: &[u8]) {
    for chunk in data.chunks_mut(texel.len()) {
        let n = chunk.len();
        chunk.copy_from_slice(&texel[..n]);
    }
}

fn encode_color(format: Format, color: [f32; 4]) -> Vec<u8> {
    let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    match format {
        Format::Rgba8Unorm | Format::Rgba8UnormSrgb => color.iter().map(|&c| unorm(c)).collect(),
        Format::Bgra8Unorm => vec![unorm(color[2]), unorm(color[1]), unorm(color[0]), unorm(color[3])],
        Format::Rgba16Float => color.iter().flat_map(|&c| f16::from_f32(c).to_le_bytes()).collect(),
        Format::Rg16Float => color[..2].iter().flat_map(|&c| f16::from_f32(c).to_le_bytes()).collect(),
        Format::Rgba32Float => color.iter().flat_map(|c| c.to_le_bytes()).collect(),
        Format::Rg32Float => color[..2].iter().flat_map(|c| c.to_le_bytes()).collect(),
        Format::R32Float | Format::D32Float => color[0].to_le_bytes().to_vec(),
        Format::R32Uint => (color[0] as u32).to_le_bytes().to_vec(),
        Format::Unknown => vec![0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> SoftwareBackend {
        let mut backend = SoftwareBackend::default();
        let adapters = backend.enumerate_adapters().unwrap();
        backend.create_device(&adapters[0], FeatureLevel::Level12_0).unwrap();
        backend.create_queue(QueueKind::Graphics).unwrap();
        backend
    }

    #[test]
    fn test_half_float_clear_rounds_to_nearest() {
        let halves = |bytes: Vec<u8>| -> Vec<u16> {
            bytes.chunks(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect()
        };
        // 1 + 0.75 ulp 向上舍入，截断会得到 0x3c00
        let rgba = encode_color(Format::Rgba16Float, [1.000_732_421_875, -2.0, 0.5, 1.0e9]);
        assert_eq!(halves(rgba), vec![0x3c01, 0xc000, 0x3800, 0x7c00]);

        let rg = encode_color(Format::Rg16Float, [0.0, 0.25, 9.0, 9.0]);
        assert_eq!(halves(rg), vec![0x0000, 0x3400]);
    }

    #[test]
    fn test_texture_copy_round_trip() {
        let mut backend = device();
        let allocator = backend.create_command_allocator(QueueKind::Graphics).unwrap();

        let footprint = TextureFootprint::new(Format::Rgba8Unorm, 2, 2);
        let upload = backend
            .create_resource(&ResourceDesc::buffer("upload", footprint.total_bytes()), MemoryPlacement::UploadVisible, ResourceState::GenericRead)
            .unwrap();
        let texture = backend
            .create_resource(&ResourceDesc::texture_2d("tex", 2, 2, Format::Rgba8Unorm), MemoryPlacement::CopyDestination, ResourceState::CopyDest)
            .unwrap();
        let readback = backend
            .create_resource(&ResourceDesc::buffer("readback", footprint.total_bytes()), MemoryPlacement::Readback, ResourceState::CopyDest)
            .unwrap();

        let pixels: Vec<u8> = (0..16).collect();
        for row in 0..2u64 {
            let start = (row * 8) as usize;
            backend.write_buffer(upload, row * footprint.row_pitch as u64, &pixels[start..start + 8]).unwrap();
        }

        let commands = vec![
            Command::CopyBufferToTexture { dst: texture, subresource: 0, src: upload, src_offset: 0, footprint },
            Command::CopyTextureToBuffer { dst: readback, dst_offset: 0, src: texture, subresource: 0, footprint },
        ];
        backend.execute(QueueKind::Graphics, allocator, &commands).unwrap();

        let row1 = backend.read_buffer(readback, footprint.row_pitch as u64, 8).unwrap();
        assert_eq!(row1, pixels[8..16].to_vec());
    }

    #[test]
    fn test_device_local_is_not_mappable() {
        let mut backend = device();
        let buffer = backend
            .create_resource(&ResourceDesc::buffer("vb", 64), MemoryPlacement::DeviceLocal, ResourceState::Common)
            .unwrap();
        assert!(backend.write_buffer(buffer, 0, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_deferred_fence_completes_on_wait() {
        let mut backend = device();
        let probe = backend.probe();

        backend.signal(QueueKind::Graphics, 1).unwrap();
        assert_eq!(backend.completed_value(), 0);

        backend.wait_for_value(1, None).unwrap();
        assert_eq!(backend.completed_value(), 1);
        assert_eq!(probe.with_journal(|j| j.waits()), vec![1]);

        // 已完成的值不会再次阻塞
        backend.wait_for_value(1, None).unwrap();
        assert_eq!(probe.with_journal(|j| j.waits()), vec![1]);
    }

    #[test]
    fn test_wait_on_unsignaled_value_times_out() {
        let mut backend = device();
        let err = backend.wait_for_value(5, Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(
            err,
            crate::core::error::RenderError::Graphics(GraphicsError::FenceTimeout { value: 5, .. })
        ));
    }

    #[test]
    fn test_signal_must_increase() {
        let mut backend = device();
        backend.signal(QueueKind::Graphics, 2).unwrap();
        assert!(backend.signal(QueueKind::Graphics, 2).is_err());
    }

    #[test]
    fn test_present_cycles_back_buffers() {
        let mut backend = device();
        let desc = SwapChainDesc { width: 8, height: 8, buffer_count: 3, format: Format::Rgba8Unorm };
        backend.create_swapchain(SurfaceTarget::Headless, &desc).unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(backend.current_back_buffer_index());
            backend.present(true).unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_clear_render_target() {
        let mut backend = device();
        let allocator = backend.create_command_allocator(QueueKind::Graphics).unwrap();
        let target = backend
            .create_resource(
                &ResourceDesc::texture_2d("rt", 1, 1, Format::Rgba8Unorm).with_flags(ResourceFlags::RENDER_TARGET),
                MemoryPlacement::DeviceLocal,
                ResourceState::RenderTarget,
            )
            .unwrap();
        let readback = backend
            .create_resource(&ResourceDesc::buffer("rb", 256), MemoryPlacement::Readback, ResourceState::CopyDest)
            .unwrap();

        let footprint = TextureFootprint::new(Format::Rgba8Unorm, 1, 1);
        let commands = vec![
            Command::ClearRenderTarget { rtv: 1, resource: target, color: [1.0, 0.0, 0.5, 1.0] },
            Command::CopyTextureToBuffer { dst: readback, dst_offset: 0, src: target, subresource: 0, footprint },
        ];
        backend.execute(QueueKind::Graphics, allocator, &commands).unwrap();
        assert_eq!(backend.read_buffer(readback, 0, 4).unwrap(), vec![255, 0, 128, 255]);
    }
}
