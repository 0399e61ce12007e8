//! 设备
//!
//! `Device` 持有后端、三个共享描述符堆、命令队列、帧 fence、内存分配器、
//! 资源状态影子表以及所有资源竞技场，并提供：
//! - 适配器选择与能力探测
//! - 同步的“上传并等待”原语（完整的 GPU 空闲，只用于加载期）
//! - 调试回读
//! - 按 fence 值延迟释放资源与描述符
//!
//! 资源工厂方法（`create_buffer` 等）见 `resource` 模块。

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::config::{FeatureLevel, GraphicsConfig};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GpuBackend;
use crate::gfx::types::{
    align_up, AdapterInfo, DescriptorHeapKind, DeviceCapabilities, MemoryPlacement, QueueKind,
    RawResourceId, ResourceDesc, ResourceState, TextureFootprint, TransitionBarrier, ViewDesc,
};

use super::arena::{Arena, BufferHandle, ConstantBufferHandle, DepthBufferHandle, RenderTextureHandle, TextureHandle};
use super::command::{CommandList, CommandQueue};
use super::descriptor::{DescriptorHandle, DescriptorHeap};
use super::memory::{AllocatedResource, MemoryAllocator};
use super::resource::{Buffer, ConstantBuffer, DepthBuffer, RenderTexture, Texture};
use super::state::ResourceStateTracker;
use super::sync::{Fence, FenceValue, ReleaseQueue};

/// 纹理子资源在上传缓冲区中的起始对齐
const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

/// 设备创建参数
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    pub frame_count: u32,
    pub srv_heap_capacity: u32,
    pub rtv_heap_capacity: u32,
    pub dsv_heap_capacity: u32,
    pub minimum_feature_level: FeatureLevel,
    pub preferred_feature_level: FeatureLevel,
    pub fence_timeout: Option<Duration>,
    /// 是否启用资源状态校验（默认仅调试构建）
    pub validate_states: bool,
}

impl DeviceDesc {
    pub fn from_config(config: &GraphicsConfig) -> Self {
        Self {
            frame_count: config.frame_count,
            srv_heap_capacity: config.srv_heap_capacity,
            rtv_heap_capacity: config.rtv_heap_capacity,
            dsv_heap_capacity: config.dsv_heap_capacity,
            minimum_feature_level: config.minimum_feature_level,
            preferred_feature_level: config.preferred_feature_level,
            fence_timeout: config.fence_timeout(),
            validate_states: cfg!(debug_assertions),
        }
    }
}

impl Default for DeviceDesc {
    fn default() -> Self {
        Self::from_config(&GraphicsConfig::default())
    }
}

/// 选择适配器与创建设备使用的特性等级
///
/// 排序规则：硬件适配器优先于软件适配器，其次是支持的最高特性等级，
/// 再次是显存大小。设备以 `min(适配器最高等级, preferred)` 创建，
/// 不满足 `minimum` 的适配器被排除。
pub fn select_adapter(
    adapters: &[AdapterInfo],
    minimum: FeatureLevel,
    preferred: FeatureLevel,
) -> Result<(AdapterInfo, FeatureLevel)> {
    let best = adapters
        .iter()
        .filter(|a| a.max_feature_level >= minimum)
        .max_by(|a, b| {
            (!a.is_software, a.max_feature_level, a.dedicated_video_memory, std::cmp::Reverse(a.index))
                .cmp(&(!b.is_software, b.max_feature_level, b.dedicated_video_memory, std::cmp::Reverse(b.index)))
        });

    let Some(adapter) = best else {
        return Err(GraphicsError::AdapterNotFound(format!(
            "None of {} adapter(s) supports feature level {}",
            adapters.len(),
            minimum.name()
        ))
        .into());
    };

    let level = adapter.max_feature_level.min(preferred);
    if level < preferred {
        warn!(
            adapter = %adapter.name,
            preferred = preferred.name(),
            selected = level.name(),
            "Preferred feature level unavailable, falling back"
        );
    }
    Ok((adapter.clone(), level))
}

/// 等待 GPU 完成后才能释放的对象
#[derive(Debug)]
pub(crate) enum Retired {
    Resource(AllocatedResource),
    Descriptor(DescriptorHeapKind, DescriptorHandle),
}

/// 设备
pub struct Device {
    backend: Box<dyn GpuBackend>,
    adapter: AdapterInfo,
    capabilities: DeviceCapabilities,
    frame_count: u32,

    graphics_queue: CommandQueue,
    compute_queue: CommandQueue,
    copy_queue: CommandQueue,

    srv_heap: DescriptorHeap,
    rtv_heap: DescriptorHeap,
    dsv_heap: DescriptorHeap,

    fence: Fence,
    memory: MemoryAllocator,
    tracker: ResourceStateTracker,

    upload_list: CommandList,
    /// 上传列表最近一次提交的 fence 值
    upload_fence: FenceValue,

    /// 尚未提交的帧可能仍在引用，等下一次信号时才确定释放点
    unstamped: Vec<Retired>,
    releases: ReleaseQueue<Retired>,

    pub(crate) buffers: Arena<BufferHandle, Buffer>,
    pub(crate) constant_buffers: Arena<ConstantBufferHandle, ConstantBuffer>,
    pub(crate) textures: Arena<TextureHandle, Texture>,
    pub(crate) depth_buffers: Arena<DepthBufferHandle, DepthBuffer>,
    pub(crate) render_textures: Arena<RenderTextureHandle, RenderTexture>,
}

impl Device {
    /// 创建设备
    ///
    /// 适配器或设备创建失败不可恢复，错误直接返回给应用外壳。
    pub fn new(mut backend: Box<dyn GpuBackend>, desc: &DeviceDesc) -> Result<Self> {
        let adapters = backend.enumerate_adapters()?;
        for adapter in &adapters {
            debug!(
                index = adapter.index,
                name = %adapter.name,
                max_feature_level = adapter.max_feature_level.name(),
                software = adapter.is_software,
                "Adapter found"
            );
        }

        let (adapter, feature_level) =
            select_adapter(&adapters, desc.minimum_feature_level, desc.preferred_feature_level)?;
        backend.create_device(&adapter, feature_level)?;

        let capabilities = backend.query_capabilities()?;
        info!(
            backend = backend.name(),
            adapter = %adapter.name,
            feature_level = capabilities.feature_level.name(),
            shader_model = ?capabilities.shader_model,
            wave_ops = capabilities.wave_ops,
            raytracing = ?capabilities.raytracing_tier,
            mesh_shader = ?capabilities.mesh_shader_tier,
            binding_tier = ?capabilities.resource_binding_tier,
            "Device created"
        );
        if !capabilities.supports_dynamic_resources() {
            warn!("Adapter lacks SM 6.6 / resource binding tier 3, bindless indexing may fail");
        }

        let graphics_queue = CommandQueue::new(backend.as_mut(), QueueKind::Graphics)?;
        let compute_queue = CommandQueue::new(backend.as_mut(), QueueKind::Compute)?;
        let copy_queue = CommandQueue::new(backend.as_mut(), QueueKind::Copy)?;

        let srv_heap = DescriptorHeap::new(
            backend.as_mut(),
            DescriptorHeapKind::CbvSrvUav,
            desc.srv_heap_capacity,
            "Bindless CBV/SRV/UAV Heap",
        )?;
        let rtv_heap = DescriptorHeap::new(backend.as_mut(), DescriptorHeapKind::Rtv, desc.rtv_heap_capacity, "RTV Heap")?;
        let dsv_heap = DescriptorHeap::new(backend.as_mut(), DescriptorHeapKind::Dsv, desc.dsv_heap_capacity, "DSV Heap")?;

        let upload_list = CommandList::new(backend.as_mut(), QueueKind::Graphics, 1, "Upload")?;

        Ok(Self {
            backend,
            adapter,
            capabilities,
            frame_count: desc.frame_count,
            graphics_queue,
            compute_queue,
            copy_queue,
            srv_heap,
            rtv_heap,
            dsv_heap,
            fence: Fence::new(desc.frame_count, desc.fence_timeout),
            memory: MemoryAllocator::new(),
            tracker: ResourceStateTracker::with_validation(desc.validate_states),
            upload_list,
            upload_fence: FenceValue::ZERO,
            unstamped: Vec::new(),
            releases: ReleaseQueue::new(),
            buffers: Arena::new("buffer"),
            constant_buffers: Arena::new("constant buffer"),
            textures: Arena::new("texture"),
            depth_buffers: Arena::new("depth buffer"),
            render_textures: Arena::new("render texture"),
        })
    }

    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn GpuBackend {
        self.backend.as_mut()
    }

    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn graphics_queue(&self) -> &CommandQueue {
        &self.graphics_queue
    }

    /// 已创建但热路径不使用的队列
    pub fn compute_queue(&self) -> &CommandQueue {
        &self.compute_queue
    }

    pub fn copy_queue(&self) -> &CommandQueue {
        &self.copy_queue
    }

    pub fn srv_heap(&self) -> &DescriptorHeap {
        &self.srv_heap
    }

    pub fn rtv_heap(&self) -> &DescriptorHeap {
        &self.rtv_heap
    }

    pub fn dsv_heap(&self) -> &DescriptorHeap {
        &self.dsv_heap
    }

    pub fn heap_mut(&mut self, kind: DescriptorHeapKind) -> &mut DescriptorHeap {
        match kind {
            DescriptorHeapKind::CbvSrvUav => &mut self.srv_heap,
            DescriptorHeapKind::Rtv => &mut self.rtv_heap,
            DescriptorHeapKind::Dsv => &mut self.dsv_heap,
        }
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    pub fn memory(&self) -> &MemoryAllocator {
        &self.memory
    }

    pub fn tracker(&self) -> &ResourceStateTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ResourceStateTracker {
        &mut self.tracker
    }

    /// 在已分配的槽位写入视图
    pub fn write_view(
        &mut self,
        kind: DescriptorHeapKind,
        handle: &DescriptorHandle,
        resource: RawResourceId,
        view: &ViewDesc,
    ) -> Result<()> {
        let heap = match kind {
            DescriptorHeapKind::CbvSrvUav => &self.srv_heap,
            DescriptorHeapKind::Rtv => &self.rtv_heap,
            DescriptorHeapKind::Dsv => &self.dsv_heap,
        };
        heap.write_view(self.backend.as_mut(), handle, resource, view)
    }

    /// 分配单个描述符并写入视图
    pub(crate) fn create_view(
        &mut self,
        kind: DescriptorHeapKind,
        resource: RawResourceId,
        view: &ViewDesc,
    ) -> Result<DescriptorHandle> {
        let handle = self.heap_mut(kind).allocate(1)?;
        if let Err(e) = self.write_view(kind, &handle, resource, view) {
            self.heap_mut(kind).release(&handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// 创建资源并登记到状态影子表
    pub(crate) fn allocate_resource(
        &mut self,
        desc: &ResourceDesc,
        placement: MemoryPlacement,
        state: ResourceState,
    ) -> Result<AllocatedResource> {
        let resource = self.memory.allocate(self.backend.as_mut(), desc, placement, state)?;
        self.tracker.register(resource.id(), resource.label(), resource.initial_state());
        Ok(resource)
    }

    /// 写入 CPU 可见资源
    pub(crate) fn write_resource(&mut self, resource: &AllocatedResource, offset: u64, data: &[u8]) -> Result<()> {
        self.memory.write(self.backend.as_mut(), resource, offset, data)
    }

    /// 立即释放资源；调用方保证 GPU 已不再引用它
    fn release_now(&mut self, retired: Retired) {
        match retired {
            Retired::Resource(resource) => {
                self.tracker.forget(resource.id());
                self.memory.release(self.backend.as_mut(), resource);
            }
            Retired::Descriptor(kind, handle) => self.heap_mut(kind).release(&handle),
        }
    }

    /// 延迟释放资源：在下一次 fence 信号完成之后才真正释放
    pub(crate) fn retire_resource(&mut self, resource: AllocatedResource) {
        self.unstamped.push(Retired::Resource(resource));
    }

    /// 延迟归还单个描述符到堆的空闲列表
    pub(crate) fn retire_descriptor(&mut self, kind: DescriptorHeapKind, handle: DescriptorHandle) {
        if !handle.is_null() {
            self.unstamped.push(Retired::Descriptor(kind, handle));
        }
    }

    pub(crate) fn retire_all(&mut self, items: Vec<Retired>) {
        for item in items {
            if let Retired::Descriptor(_, handle) = &item {
                if handle.is_null() {
                    continue;
                }
            }
            self.unstamped.push(item);
        }
    }

    fn stamp_retired(&mut self, value: FenceValue) {
        for retired in self.unstamped.drain(..) {
            self.releases.retire(retired, value);
        }
    }

    /// 等待中的延迟释放数量
    pub fn pending_releases(&self) -> usize {
        self.unstamped.len() + self.releases.len()
    }

    /// 释放 GPU 已经完成使用的对象
    pub fn collect_garbage(&mut self) {
        let completed = self.fence.completed_value(self.backend.as_ref());
        let ready = self.releases.collect(completed);
        if !ready.is_empty() {
            debug!(count = ready.len(), completed = completed.value(), "Releasing retired objects");
        }
        for retired in ready {
            self.release_now(retired);
        }
    }

    /// 复用帧槽位之前等待它的上一次提交
    pub fn wait_for_slot(&mut self, slot: u32) -> Result<bool> {
        self.fence.wait_for_slot(self.backend.as_mut(), slot)
    }

    /// 为帧槽位的提交发出信号
    pub fn signal_frame(&mut self, slot: u32) -> Result<FenceValue> {
        let value = self.fence.signal_slot(self.backend.as_mut(), QueueKind::Graphics, slot)?;
        self.stamp_retired(value);
        Ok(value)
    }

    /// 提交命令列表到图形队列
    pub fn submit(&mut self, list: &mut CommandList) -> Result<()> {
        self.graphics_queue.submit(self.backend.as_mut(), list)
    }

    /// 等待 GPU 完全空闲，并释放所有延迟对象
    pub fn flush(&mut self) -> Result<()> {
        self.fence.flush(self.backend.as_mut(), QueueKind::Graphics)?;
        let value = self.fence.current_value();
        self.stamp_retired(value);
        self.collect_garbage();
        Ok(())
    }

    /// 上传并等待
    ///
    /// 在专用的上传命令列表上录制 `record`，提交到图形队列，发出信号并阻塞到完成。
    /// 这是一次完整的 GPU 空闲（等待的值晚于之前所有提交），只应在加载期使用。
    pub fn upload_and_wait<F>(&mut self, label: &str, record: F) -> Result<()>
    where
        F: FnOnce(&mut CommandList, &mut ResourceStateTracker) -> Result<()>,
    {
        self.upload_list.open(self.backend.as_mut(), 0, self.upload_fence)?;
        if let Err(e) = record(&mut self.upload_list, &mut self.tracker) {
            // 丢弃录制了一半的命令
            self.upload_list.close()?;
            return Err(e);
        }
        self.upload_list.close()?;
        self.graphics_queue.submit(self.backend.as_mut(), &mut self.upload_list)?;

        // unstamped 留给下一次帧信号或 flush 盖章
        let value = self.fence.signal(self.backend.as_mut(), QueueKind::Graphics)?;
        self.fence.wait_for_value(self.backend.as_mut(), value)?;
        self.upload_fence = value;
        debug!(label, fence = value.value(), "Upload complete (GPU idle)");
        Ok(())
    }

    /// 把数据上传到以 CopyDest 状态创建的缓冲区，并转换到 `final_state`
    pub(crate) fn upload_buffer_data(
        &mut self,
        dst: &AllocatedResource,
        data: &[u8],
        final_state: ResourceState,
    ) -> Result<()> {
        let staging_desc = ResourceDesc::buffer(format!("{} (upload)", dst.label()), data.len() as u64);
        let staging = self.allocate_resource(&staging_desc, MemoryPlacement::UploadVisible, ResourceState::GenericRead)?;

        let (dst_id, src_id, size) = (dst.id(), staging.id(), data.len() as u64);
        let result = self.write_resource(&staging, 0, data).and_then(|_| {
            self.upload_and_wait(dst.label(), |list, tracker| {
                list.copy_buffer(dst_id, 0, src_id, 0, size)?;
                transition(list, tracker, dst_id, ResourceState::CopyDest, final_state)
            })
        });

        self.release_now(Retired::Resource(staging));
        result
    }

    /// 把各子资源的紧密排列数据上传到纹理，并转换到 `final_state`
    pub(crate) fn upload_texture_data(
        &mut self,
        dst: &AllocatedResource,
        subresources: &[&[u8]],
        final_state: ResourceState,
    ) -> Result<()> {
        let desc = dst.desc().clone();
        let mut layouts = Vec::with_capacity(subresources.len());
        let mut total = 0u64;
        for (sub, data) in subresources.iter().enumerate() {
            let (width, height) = desc.subresource_extent(sub as u32);
            let footprint = TextureFootprint::new(desc.format, width, height);
            let expected = footprint.row_bytes() as usize * height as usize;
            if data.len() != expected {
                return Err(GraphicsError::ResourceCreation(format!(
                    "'{}' subresource {} has {} bytes, expected {}",
                    desc.label,
                    sub,
                    data.len(),
                    expected
                ))
                .into());
            }
            let offset = align_up(total, TEXTURE_PLACEMENT_ALIGNMENT);
            layouts.push((offset, footprint));
            total = offset + footprint.total_bytes();
        }

        let staging_desc = ResourceDesc::buffer(format!("{} (upload)", desc.label), total);
        let staging = self.allocate_resource(&staging_desc, MemoryPlacement::UploadVisible, ResourceState::GenericRead)?;

        let mut result = Ok(());
        'write: for ((offset, footprint), data) in layouts.iter().zip(subresources) {
            let row_bytes = footprint.row_bytes() as usize;
            for (row, bytes) in data.chunks(row_bytes).enumerate() {
                let row_offset = offset + row as u64 * footprint.row_pitch as u64;
                result = self.write_resource(&staging, row_offset, bytes);
                if result.is_err() {
                    break 'write;
                }
            }
        }

        let (dst_id, src_id) = (dst.id(), staging.id());
        let result = result.and_then(|_| {
            self.upload_and_wait(&desc.label, |list, tracker| {
                for (sub, (offset, footprint)) in layouts.iter().enumerate() {
                    list.copy_buffer_to_texture(dst_id, sub as u32, src_id, *offset, *footprint)?;
                }
                transition(list, tracker, dst_id, ResourceState::CopyDest, final_state)
            })
        });

        self.release_now(Retired::Resource(staging));
        result
    }

    /// 调试回读：把资源内容拷贝到回读缓冲区并等待
    ///
    /// `state` 是资源当前所处的状态，回读结束后恢复。纹理返回所有子资源的紧密排列数据。
    pub fn read_back(&mut self, resource: &AllocatedResource, state: ResourceState) -> Result<Vec<u8>> {
        let desc = resource.desc().clone();

        let mut layouts = Vec::new();
        let total = if desc.is_buffer() {
            desc.width
        } else {
            let mut total = 0u64;
            for sub in 0..desc.subresource_count() {
                let (width, height) = desc.subresource_extent(sub);
                let footprint = TextureFootprint::new(desc.format, width, height);
                let offset = align_up(total, TEXTURE_PLACEMENT_ALIGNMENT);
                layouts.push((offset, footprint));
                total = offset + footprint.total_bytes();
            }
            total
        };

        let readback_desc = ResourceDesc::buffer(format!("{} (readback)", desc.label), total);
        let readback = self.allocate_resource(&readback_desc, MemoryPlacement::Readback, ResourceState::CopyDest)?;

        let (src_id, dst_id) = (resource.id(), readback.id());
        let copied = self.upload_and_wait(&desc.label, |list, tracker| {
            transition(list, tracker, src_id, state, ResourceState::CopySource)?;
            if desc.is_buffer() {
                list.copy_buffer(dst_id, 0, src_id, 0, desc.width)?;
            } else {
                for (sub, (offset, footprint)) in layouts.iter().enumerate() {
                    list.copy_texture_to_buffer(dst_id, *offset, src_id, sub as u32, *footprint)?;
                }
            }
            transition(list, tracker, src_id, ResourceState::CopySource, state)
        });

        let result = copied.and_then(|_| {
            if desc.is_buffer() {
                return self.memory.read(self.backend.as_mut(), &readback, 0, desc.width as usize);
            }
            let mut bytes = Vec::with_capacity(desc.packed_size() as usize);
            for (offset, footprint) in &layouts {
                for row in 0..footprint.height as u64 {
                    let row_offset = offset + row * footprint.row_pitch as u64;
                    bytes.extend(self.memory.read(
                        self.backend.as_mut(),
                        &readback,
                        row_offset,
                        footprint.row_bytes() as usize,
                    )?);
                }
            }
            Ok(bytes)
        });

        self.release_now(Retired::Resource(readback));
        result
    }

    /// 释放所有资源（关闭时调用，要求 GPU 已空闲）
    fn release_all(&mut self) {
        let mut retired: Vec<Retired> = self.unstamped.drain(..).collect();
        retired.extend(self.releases.drain_all());

        for buffer in self.buffers.drain() {
            retired.extend(buffer.into_retired());
        }
        for cb in self.constant_buffers.drain() {
            retired.extend(cb.into_retired());
        }
        for texture in self.textures.drain() {
            retired.extend(texture.into_retired());
        }
        for depth in self.depth_buffers.drain() {
            retired.extend(depth.into_retired());
        }
        for rt in self.render_textures.drain() {
            retired.extend(rt.into_retired());
        }

        for item in retired {
            self.release_now(item);
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.fence.flush(self.backend.as_mut(), QueueKind::Graphics) {
            warn!(error = %e, "GPU did not go idle during shutdown");
        }
        self.release_all();
        debug!(live = self.memory.stats().live_resources, "Device destroyed");
    }
}

/// 校验并录制一次转换屏障
pub fn transition(
    list: &mut CommandList,
    tracker: &mut ResourceStateTracker,
    resource: RawResourceId,
    before: ResourceState,
    after: ResourceState,
) -> Result<()> {
    if before == after {
        return Ok(());
    }
    tracker.transition(resource, before, after)?;
    list.resource_barrier(vec![TransitionBarrier { resource, before, after }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::types::{Format, ResourceBindingTier};
    use crate::renderer::test_support::test_device;

    fn adapter(index: u32, level: FeatureLevel, software: bool, memory: u64) -> AdapterInfo {
        AdapterInfo {
            index,
            name: format!("adapter{}", index),
            vendor_id: 0,
            device_id: 0,
            dedicated_video_memory: memory,
            max_feature_level: level,
            is_software: software,
        }
    }

    #[test]
    fn test_select_prefers_hardware() {
        let adapters = vec![
            adapter(0, FeatureLevel::Level12_2, true, 0),
            adapter(1, FeatureLevel::Level12_0, false, 1 << 30),
        ];
        let (selected, level) =
            select_adapter(&adapters, FeatureLevel::Level11_0, FeatureLevel::Level12_1).unwrap();
        assert_eq!(selected.index, 1);
        // 偏好等级不可用时回退到适配器支持的最高等级
        assert_eq!(level, FeatureLevel::Level12_0);
    }

    #[test]
    fn test_select_highest_feature_level() {
        let adapters = vec![
            adapter(0, FeatureLevel::Level11_1, false, 8 << 30),
            adapter(1, FeatureLevel::Level12_2, false, 1 << 30),
        ];
        let (selected, level) =
            select_adapter(&adapters, FeatureLevel::Level11_0, FeatureLevel::Level12_1).unwrap();
        assert_eq!(selected.index, 1);
        assert_eq!(level, FeatureLevel::Level12_1);
    }

    #[test]
    fn test_select_falls_back_to_software() {
        let adapters = vec![
            adapter(0, FeatureLevel::Level11_0, false, 1 << 30),
            adapter(1, FeatureLevel::Level12_1, true, 0),
        ];
        let (selected, _) = select_adapter(&adapters, FeatureLevel::Level12_0, FeatureLevel::Level12_1).unwrap();
        assert_eq!(selected.index, 1);
    }

    #[test]
    fn test_no_adapter_meets_minimum() {
        let adapters = vec![adapter(0, FeatureLevel::Level11_0, false, 0)];
        assert!(select_adapter(&adapters, FeatureLevel::Level12_0, FeatureLevel::Level12_1).is_err());
    }

    #[test]
    fn test_device_creation() {
        let device = test_device(3);
        assert_eq!(device.frame_count(), 3);
        assert_eq!(device.capabilities().resource_binding_tier, ResourceBindingTier::Tier3);
        assert_eq!(device.srv_heap().stats().capacity, 256);
        assert_eq!(device.srv_heap().stats().used, 0);
        assert!(device.srv_heap().allocator().capacity() > 0);
    }

    #[test]
    fn test_upload_round_trip() {
        let mut device = test_device(2);
        let pattern: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let upload = device
            .allocate_resource(&ResourceDesc::buffer("pattern", 1000), MemoryPlacement::UploadVisible, ResourceState::GenericRead)
            .unwrap();
        device.write_resource(&upload, 0, &pattern).unwrap();

        let local = device
            .allocate_resource(&ResourceDesc::buffer("local", 1000), MemoryPlacement::CopyDestination, ResourceState::CopyDest)
            .unwrap();
        let (dst, src) = (local.id(), upload.id());
        device
            .upload_and_wait("copy", |list, tracker| {
                list.copy_buffer(dst, 0, src, 0, 1000)?;
                transition(list, tracker, dst, ResourceState::CopyDest, ResourceState::AllShaderResource)
            })
            .unwrap();

        let bytes = device.read_back(&local, ResourceState::AllShaderResource).unwrap();
        assert_eq!(bytes, pattern);
        assert_eq!(device.tracker().state(local.id()), Some(ResourceState::AllShaderResource));

        device.retire_resource(upload);
        device.retire_resource(local);
    }

    #[test]
    fn test_texture_upload_round_trip() {
        let mut device = test_device(2);
        let desc = ResourceDesc::texture_2d("checker", 5, 3, Format::Rgba8Unorm).with_mip_levels(2);
        let texture = device
            .allocate_resource(&desc, MemoryPlacement::CopyDestination, ResourceState::CopyDest)
            .unwrap();

        let mip0: Vec<u8> = (0..5 * 3 * 4).map(|i| i as u8).collect();
        let mip1: Vec<u8> = (0..2 * 4).map(|i| 200 + i as u8).collect();
        device
            .upload_texture_data(&texture, &[&mip0, &mip1], ResourceState::PixelShaderResource)
            .unwrap();

        let bytes = device.read_back(&texture, ResourceState::PixelShaderResource).unwrap();
        assert_eq!(bytes.len(), mip0.len() + mip1.len());
        assert_eq!(&bytes[..mip0.len()], &mip0[..]);
        assert_eq!(&bytes[mip0.len()..], &mip1[..]);
        device.retire_resource(texture);
    }

    #[test]
    fn test_wrong_subresource_size_rejected() {
        let mut device = test_device(2);
        let desc = ResourceDesc::texture_2d("bad", 4, 4, Format::Rgba8Unorm);
        let texture = device
            .allocate_resource(&desc, MemoryPlacement::CopyDestination, ResourceState::CopyDest)
            .unwrap();
        assert!(device.upload_texture_data(&texture, &[&[0u8; 12]], ResourceState::PixelShaderResource).is_err());
        device.retire_resource(texture);
    }

    #[test]
    fn test_deferred_release_waits_for_fence() {
        let mut device = test_device(2);
        let resource = device
            .allocate_resource(&ResourceDesc::buffer("temp", 64), MemoryPlacement::DeviceLocal, ResourceState::Common)
            .unwrap();
        let live_before = device.memory().stats().live_resources;

        device.retire_resource(resource);
        device.collect_garbage();
        // 还没有信号，释放点未确定
        assert_eq!(device.memory().stats().live_resources, live_before);

        device.signal_frame(0).unwrap();
        device.collect_garbage();
        // 信号已发出但 GPU 尚未完成
        assert_eq!(device.memory().stats().live_resources, live_before);
        assert_eq!(device.pending_releases(), 1);

        device.wait_for_slot(0).unwrap();
        device.collect_garbage();
        assert_eq!(device.memory().stats().live_resources, live_before - 1);
        assert_eq!(device.pending_releases(), 0);
    }

    #[test]
    fn test_retired_descriptor_recycled() {
        let mut device = test_device(2);
        let a = device.heap_mut(DescriptorHeapKind::CbvSrvUav).allocate(1).unwrap();
        device.retire_descriptor(DescriptorHeapKind::CbvSrvUav, a);
        device.flush().unwrap();
        let b = device.heap_mut(DescriptorHeapKind::CbvSrvUav).allocate(1).unwrap();
        assert_eq!(a.index(), b.index());
    }

    #[test]
    fn test_readback_leaves_pending_releases_unstamped() {
        let mut device = test_device(2);
        let doomed = device
            .allocate_resource(&ResourceDesc::buffer("doomed", 64), MemoryPlacement::DeviceLocal, ResourceState::Common)
            .unwrap();
        let other = device
            .allocate_resource(&ResourceDesc::buffer("other", 16), MemoryPlacement::DeviceLocal, ResourceState::Common)
            .unwrap();
        let live_before = device.memory().stats().live_resources;

        device.retire_resource(doomed);
        // 回读会让 GPU 完全空闲，但释放点仍要等下一次帧信号
        device.read_back(&other, ResourceState::Common).unwrap();
        device.collect_garbage();
        assert_eq!(device.memory().stats().live_resources, live_before);
        assert_eq!(device.pending_releases(), 1);

        device.signal_frame(0).unwrap();
        device.wait_for_slot(0).unwrap();
        device.collect_garbage();
        assert_eq!(device.memory().stats().live_resources, live_before - 1);
        device.retire_resource(other);
    }
}
