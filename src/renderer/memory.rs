//! GPU 内存分配
//!
//! `MemoryAllocator` 通过后端的子分配器创建资源。资源与其子分配一一绑定，
//! 由 `AllocatedResource` 独占持有，必须通过 `release` 一起释放；
//! 它不能被复制，也就不可能出现只释放其中一半的情况。
//!
//! 放置类别在创建时确定，之后不可改变：
//! - `DeviceLocal`：稳态 GPU 读取
//! - `UploadVisible`：CPU 可写的暂存内存
//! - `CopyDestination`：上传数据的最终驻留位置
//! - `Readback`：调试回读

use tracing::{debug, trace};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GpuBackend;
use crate::gfx::types::{MemoryPlacement, RawResourceId, ResourceDesc, ResourceState};

/// 独占持有的 GPU 资源（资源 + 子分配）
#[derive(Debug)]
pub struct AllocatedResource {
    id: RawResourceId,
    desc: ResourceDesc,
    placement: MemoryPlacement,
    initial_state: ResourceState,
}

impl AllocatedResource {
    pub fn id(&self) -> RawResourceId {
        self.id
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn label(&self) -> &str {
        &self.desc.label
    }

    pub fn placement(&self) -> MemoryPlacement {
        self.placement
    }

    pub fn initial_state(&self) -> ResourceState {
        self.initial_state
    }

    /// 缓冲区字节数
    pub fn size(&self) -> u64 {
        self.desc.packed_size()
    }
}

/// 内存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub live_resources: usize,
    pub device_bytes: u64,
    pub upload_bytes: u64,
    pub readback_bytes: u64,
}

/// 资源工厂
#[derive(Debug, Default)]
pub struct MemoryAllocator {
    stats: MemoryStats,
}

impl MemoryAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放置类别决定的初始状态
    ///
    /// `DeviceLocal` 使用调用方请求的状态，其他类别的状态由内存类型固定。
    pub fn initial_state(placement: MemoryPlacement, requested: ResourceState) -> ResourceState {
        match placement {
            MemoryPlacement::DeviceLocal => requested,
            MemoryPlacement::UploadVisible => ResourceState::GenericRead,
            MemoryPlacement::CopyDestination | MemoryPlacement::Readback => ResourceState::CopyDest,
        }
    }

    /// 创建资源
    pub fn allocate(
        &mut self,
        backend: &mut dyn GpuBackend,
        desc: &ResourceDesc,
        placement: MemoryPlacement,
        requested_state: ResourceState,
    ) -> Result<AllocatedResource> {
        let initial_state = Self::initial_state(placement, requested_state);
        let id = backend.create_resource(desc, placement, initial_state)?;

        let bytes = desc.packed_size();
        self.stats.live_resources += 1;
        *self.bytes_mut(placement) += bytes;

        debug!(
            label = %desc.label,
            placement = placement.name(),
            bytes,
            state = initial_state.name(),
            "Resource created"
        );

        Ok(AllocatedResource {
            id,
            desc: desc.clone(),
            placement,
            initial_state,
        })
    }

    /// 释放资源及其子分配
    pub fn release(&mut self, backend: &mut dyn GpuBackend, resource: AllocatedResource) {
        let bytes = resource.size();
        backend.destroy_resource(resource.id);

        self.stats.live_resources = self.stats.live_resources.saturating_sub(1);
        let counter = self.bytes_mut(resource.placement);
        *counter = counter.saturating_sub(bytes);
        trace!(label = %resource.desc.label, "Resource released");
    }

    /// 写入 CPU 可见资源
    pub fn write(
        &self,
        backend: &mut dyn GpuBackend,
        resource: &AllocatedResource,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        if resource.placement != MemoryPlacement::UploadVisible {
            return Err(GraphicsError::CommandExecution(format!(
                "'{}' is {} memory and cannot be written by the CPU",
                resource.label(),
                resource.placement.name()
            ))
            .into());
        }
        backend.write_buffer(resource.id, offset, data)
    }

    /// 读取 CPU 可见资源
    pub fn read(
        &self,
        backend: &mut dyn GpuBackend,
        resource: &AllocatedResource,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>> {
        if !resource.placement.is_cpu_visible() {
            return Err(GraphicsError::CommandExecution(format!(
                "'{}' is {} memory and cannot be read by the CPU",
                resource.label(),
                resource.placement.name()
            ))
            .into());
        }
        backend.read_buffer(resource.id, offset, len)
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    fn bytes_mut(&mut self, placement: MemoryPlacement) -> &mut u64 {
        match placement {
            MemoryPlacement::DeviceLocal | MemoryPlacement::CopyDestination => &mut self.stats.device_bytes,
            MemoryPlacement::UploadVisible => &mut self.stats.upload_bytes,
            MemoryPlacement::Readback => &mut self.stats.readback_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FeatureLevel;
    use crate::gfx::software::SoftwareBackend;

    fn backend() -> SoftwareBackend {
        let mut backend = SoftwareBackend::default();
        let adapters = backend.enumerate_adapters().unwrap();
        backend.create_device(&adapters[0], FeatureLevel::Level12_0).unwrap();
        backend
    }

    #[test]
    fn test_initial_state_by_placement() {
        use ResourceState::*;
        assert_eq!(MemoryAllocator::initial_state(MemoryPlacement::UploadVisible, Common), GenericRead);
        assert_eq!(MemoryAllocator::initial_state(MemoryPlacement::CopyDestination, Common), CopyDest);
        assert_eq!(
            MemoryAllocator::initial_state(MemoryPlacement::DeviceLocal, PixelShaderResource),
            PixelShaderResource
        );
    }

    #[test]
    fn test_allocate_and_release_together() {
        let mut backend = backend();
        let probe = backend.probe();
        let mut memory = MemoryAllocator::new();

        let upload = memory
            .allocate(&mut backend, &ResourceDesc::buffer("staging", 1024), MemoryPlacement::UploadVisible, ResourceState::Common)
            .unwrap();
        let local = memory
            .allocate(&mut backend, &ResourceDesc::buffer("vertices", 512), MemoryPlacement::DeviceLocal, ResourceState::Common)
            .unwrap();

        assert_eq!(memory.stats().live_resources, 2);
        assert_eq!(memory.stats().upload_bytes, 1024);
        assert_eq!(memory.stats().device_bytes, 512);

        memory.release(&mut backend, upload);
        memory.release(&mut backend, local);
        assert_eq!(memory.stats(), MemoryStats::default());
        assert_eq!(probe.with_journal(|j| j.live_resources()), 0);
    }

    #[test]
    fn test_cpu_write_requires_upload_placement() {
        let mut backend = backend();
        let mut memory = MemoryAllocator::new();
        let local = memory
            .allocate(&mut backend, &ResourceDesc::buffer("local", 64), MemoryPlacement::DeviceLocal, ResourceState::Common)
            .unwrap();
        assert!(memory.write(&mut backend, &local, 0, &[0u8; 16]).is_err());

        let upload = memory
            .allocate(&mut backend, &ResourceDesc::buffer("upload", 64), MemoryPlacement::UploadVisible, ResourceState::Common)
            .unwrap();
        memory.write(&mut backend, &upload, 16, &[7u8; 16]).unwrap();
        assert_eq!(memory.read(&mut backend, &upload, 16, 16).unwrap(), vec![7u8; 16]);
    }
}
