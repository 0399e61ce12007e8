//! 描述符管理模块
//!
//! Bindless 模型下，着色器通过整数索引访问资源。本模块提供：
//! - `DescriptorAllocator`：固定容量描述符表上的游标分配器，索引稳定且确定
//! - `DescriptorHeap`：后端描述符堆 + 分配器
//! - `DescriptorHandle`：CPU / GPU 地址与稳定索引
//!
//! # 分配策略
//!
//! - 连续分配走游标（bump）。从空堆顺序分配 `n` 个描述符得到索引 `0..n`
//! - 单个长生命周期描述符可以通过延迟释放归还到空闲列表，之后的单个分配优先复用
//! - `reset()` 把整个堆倒回到槽位 0，之前发出的所有句柄失效（代数递增）
//! - 越界分配立即返回 `DescriptorHeapExhausted`
//!
//! # DirectX 12 描述符类型
//!
//! - **RTV** (Render Target View)：渲染目标视图，用于渲染输出
//! - **DSV** (Depth Stencil View)：深度模板视图，用于深度测试
//! - **CBV/SRV/UAV**：着色器可见的 bindless 表

use tracing::{debug, trace};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GpuBackend;
use crate::gfx::types::{DescriptorHeapInfo, DescriptorHeapKind, RawHeapId, RawResourceId, ViewDesc};

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuDescriptorHandle {
    /// 句柄指针值，0 表示未分配
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    pub fn new(ptr: usize) -> Self {
        Self { ptr }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self { ptr: self.ptr + count as usize * increment_size as usize }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    pub fn new(ptr: u64) -> Self {
        Self { ptr }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self { ptr: self.ptr + count as u64 * increment_size as u64 }
    }
}

/// 描述符句柄
///
/// 值类型，可以自由复制；堆是槽位的唯一所有者。
/// 着色器拿到的是 `index()`，不是地址。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorHandle {
    pub cpu: CpuDescriptorHandle,
    /// GPU 可见句柄（仅对着色器可见的堆有效）
    pub gpu: Option<GpuDescriptorHandle>,
    index: u32,
    /// 发出句柄时堆的代数
    epoch: u32,
}

impl DescriptorHandle {
    /// 空句柄
    pub fn null() -> Self {
        Self::default()
    }

    /// CPU 地址为 0 表示未分配
    pub fn is_null(&self) -> bool {
        self.cpu.ptr == 0
    }

    /// 相对堆起点的稳定索引
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// 偏移句柄（用于连续分配的区间）
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            cpu: self.cpu.offset(count, increment_size),
            gpu: self.gpu.map(|g| g.offset(count, increment_size)),
            index: self.index + count,
            epoch: self.epoch,
        }
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapStats {
    pub kind: DescriptorHeapKind,
    /// 总容量
    pub capacity: u32,
    /// 已使用数量
    pub used: u32,
    /// 可用数量
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    pub fn new(kind: DescriptorHeapKind, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self { kind, capacity, used, available, usage_ratio }
    }
}

/// 描述符分配器
///
/// 只管理索引与地址推导，不接触后端。单线程使用。
#[derive(Debug)]
pub struct DescriptorAllocator {
    kind: DescriptorHeapKind,
    capacity: u32,
    increment_size: u32,
    cpu_base: usize,
    gpu_base: Option<u64>,
    /// 下一个空闲槽位
    cursor: u32,
    /// 归还的单个槽位
    free_list: Vec<u32>,
    epoch: u32,
}

impl DescriptorAllocator {
    pub fn new(kind: DescriptorHeapKind, capacity: u32, info: DescriptorHeapInfo) -> Self {
        Self {
            kind,
            capacity,
            increment_size: info.increment_size,
            cpu_base: info.cpu_start,
            gpu_base: info.gpu_start,
            cursor: 0,
            free_list: Vec::new(),
            epoch: 0,
        }
    }

    fn handle_at(&self, index: u32) -> DescriptorHandle {
        DescriptorHandle {
            cpu: CpuDescriptorHandle::new(self.cpu_base + index as usize * self.increment_size as usize),
            gpu: self
                .gpu_base
                .map(|base| GpuDescriptorHandle::new(base + index as u64 * self.increment_size as u64)),
            index,
            epoch: self.epoch,
        }
    }

    fn exhausted(&self, requested: u32) -> GraphicsError {
        GraphicsError::DescriptorHeapExhausted {
            heap: self.kind.name(),
            capacity: self.capacity,
            requested,
            allocated: self.allocated_count(),
        }
    }

    /// 分配 `count` 个连续槽位，返回第一个槽位的句柄
    pub fn allocate(&mut self, count: u32) -> Result<DescriptorHandle> {
        if count == 0 {
            return Err(GraphicsError::ResourceCreation("Zero-sized descriptor allocation".into()).into());
        }

        if count == 1 {
            if let Some(index) = self.free_list.pop() {
                trace!(heap = self.kind.name(), index, "Descriptor slot reused");
                return Ok(self.handle_at(index));
            }
        }

        let end = self.cursor.checked_add(count).filter(|end| *end <= self.capacity);
        let Some(end) = end else {
            return Err(self.exhausted(count).into());
        };

        let handle = self.handle_at(self.cursor);
        self.cursor = end;
        Ok(handle)
    }

    /// 为索引已经固定的句柄重新推导地址
    ///
    /// 返回的句柄索引与传入的相同，只刷新地址和代数；
    /// 游标会越过该区间，保证之后的分配不会与之重叠。
    /// 游标与区间起点之间被跳过的槽位进入空闲列表，之后按单个槽位复用。
    pub fn override_handle(&mut self, handle: &DescriptorHandle, count: u32) -> Result<DescriptorHandle> {
        let end = handle.index.checked_add(count).filter(|end| *end <= self.capacity);
        let Some(end) = end else {
            return Err(self.exhausted(count).into());
        };

        self.free_list.retain(|i| *i < handle.index || *i >= end);
        if handle.index > self.cursor {
            self.free_list.extend((self.cursor..handle.index).rev());
        }
        self.cursor = self.cursor.max(end);
        Ok(self.handle_at(handle.index))
    }

    /// 倒回到槽位 0，所有已发出的句柄失效
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.free_list.clear();
        self.epoch = self.epoch.wrapping_add(1);
        debug!(heap = self.kind.name(), epoch = self.epoch, "Descriptor heap reset");
    }

    /// 立即归还单个槽位；调用方保证 GPU 已不再引用它
    ///
    /// 只归还 `handle` 指向的那一个槽位。多槽位的连续区间（交换链 RTV 等）
    /// 与堆同生命周期，只在 `reset` 时整体回收。
    pub fn release(&mut self, handle: &DescriptorHandle) {
        if !self.is_current(handle) {
            return;
        }
        debug_assert!(
            handle.index < self.cursor && !self.free_list.contains(&handle.index),
            "descriptor {} released twice",
            handle.index
        );
        self.free_list.push(handle.index);
    }

    /// 句柄是否属于当前代
    pub fn is_current(&self, handle: &DescriptorHandle) -> bool {
        !handle.is_null() && handle.epoch == self.epoch
    }

    pub fn allocated_count(&self) -> u32 {
        self.cursor - self.free_list.len() as u32
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn increment_size(&self) -> u32 {
        self.increment_size
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn stats(&self) -> DescriptorHeapStats {
        DescriptorHeapStats::new(self.kind, self.capacity, self.allocated_count())
    }
}

/// 描述符堆
///
/// 后端堆对象与分配器的组合。
#[derive(Debug)]
pub struct DescriptorHeap {
    id: RawHeapId,
    label: String,
    allocator: DescriptorAllocator,
}

impl DescriptorHeap {
    pub fn new(
        backend: &mut dyn GpuBackend,
        kind: DescriptorHeapKind,
        capacity: u32,
        label: &str,
    ) -> Result<Self> {
        let (id, info) = backend.create_descriptor_heap(kind, capacity, label)?;
        debug!(heap = label, kind = kind.name(), capacity, increment = info.increment_size, "Descriptor heap created");

        Ok(Self {
            id,
            label: label.to_string(),
            allocator: DescriptorAllocator::new(kind, capacity, info),
        })
    }

    pub fn id(&self) -> RawHeapId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn allocate(&mut self, count: u32) -> Result<DescriptorHandle> {
        self.allocator.allocate(count)
    }

    pub fn override_handle(&mut self, handle: &DescriptorHandle, count: u32) -> Result<DescriptorHandle> {
        self.allocator.override_handle(handle, count)
    }

    pub fn reset(&mut self) {
        self.allocator.reset();
    }

    pub fn release(&mut self, handle: &DescriptorHandle) {
        self.allocator.release(handle);
    }

    /// 在句柄指向的槽位写入视图
    pub fn write_view(
        &self,
        backend: &mut dyn GpuBackend,
        handle: &DescriptorHandle,
        resource: RawResourceId,
        view: &ViewDesc,
    ) -> Result<()> {
        if !self.allocator.is_current(handle) {
            return Err(GraphicsError::StaleHandle { kind: "descriptor" }.into());
        }
        backend.write_view(self.id, handle.index(), resource, view)
    }

    pub fn allocator(&self) -> &DescriptorAllocator {
        &self.allocator
    }

    pub fn stats(&self) -> DescriptorHeapStats {
        self.allocator.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(capacity: u32) -> DescriptorAllocator {
        DescriptorAllocator::new(
            DescriptorHeapKind::CbvSrvUav,
            capacity,
            DescriptorHeapInfo { cpu_start: 1000, gpu_start: Some(2000), increment_size: 32 },
        )
    }

    #[test]
    fn test_handle_offset() {
        let handle = allocator(16).allocate(1).unwrap();
        let offset = handle.offset(5, 32);
        assert_eq!(offset.cpu.ptr, 1160); // 1000 + 5 * 32
        assert_eq!(offset.gpu.unwrap().ptr, 2160);
        assert_eq!(offset.index(), 5);
    }

    #[test]
    fn test_sequential_indices() {
        let mut allocator = allocator(64);
        for expected in 0..40 {
            let handle = allocator.allocate(1).unwrap();
            assert_eq!(handle.index(), expected);
            assert_eq!(handle.cpu.ptr, 1000 + expected as usize * 32);
        }
        assert_eq!(allocator.allocated_count(), 40);
    }

    #[test]
    fn test_reset_reproduces_indices() {
        let mut allocator = allocator(64);
        let sizes = [1, 3, 2, 7, 1];

        let first: Vec<u32> = sizes.iter().map(|n| allocator.allocate(*n).unwrap().index()).collect();
        allocator.reset();
        let second: Vec<u32> = sizes.iter().map(|n| allocator.allocate(*n).unwrap().index()).collect();

        assert_eq!(first, vec![0, 1, 4, 6, 13]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_reset_invalidates_old_handles() {
        let mut allocator = allocator(8);
        let old = allocator.allocate(1).unwrap();
        allocator.reset();
        assert!(!allocator.is_current(&old));
        let fresh = allocator.allocate(1).unwrap();
        assert!(allocator.is_current(&fresh));
    }

    #[test]
    fn test_overallocation_fails_fast() {
        let mut allocator = allocator(4);
        allocator.allocate(3).unwrap();
        let err = allocator.allocate(2).unwrap_err();
        assert!(matches!(
            err,
            crate::core::error::RenderError::Graphics(GraphicsError::DescriptorHeapExhausted {
                capacity: 4,
                requested: 2,
                allocated: 3,
                ..
            })
        ));
        // 剩余的一个槽位仍然可用
        assert_eq!(allocator.allocate(1).unwrap().index(), 3);
        assert!(allocator.allocate(1).is_err());
    }

    #[test]
    fn test_override_keeps_index() {
        let mut allocator = allocator(16);
        allocator.allocate(2).unwrap();
        let handle = allocator.allocate(1).unwrap();
        assert_eq!(handle.index(), 2);

        allocator.reset();
        let refreshed = allocator.override_handle(&handle, 1).unwrap();
        assert_eq!(refreshed.index(), handle.index());
        assert_eq!(refreshed.cpu, handle.cpu);
        assert!(allocator.is_current(&refreshed));

        // 游标越过被覆盖的区间，跳过的 0..2 可以复用
        assert_eq!(allocator.allocated_count(), 1);
        let reused: Vec<u32> = (0..2).map(|_| allocator.allocate(1).unwrap().index()).collect();
        assert_eq!(reused, vec![0, 1]);
        assert_eq!(allocator.allocate(1).unwrap().index(), 3);
    }

    #[test]
    fn test_override_inside_cursor_claims_free_slots() {
        let mut allocator = allocator(8);
        let handles: Vec<_> = (0..4).map(|_| allocator.allocate(1).unwrap()).collect();
        allocator.release(&handles[1]);
        allocator.release(&handles[2]);

        allocator.override_handle(&handles[1], 2).unwrap();
        assert_eq!(allocator.allocated_count(), 4);
        assert_eq!(allocator.allocate(1).unwrap().index(), 4);
    }

    #[test]
    fn test_released_slot_is_reused() {
        let mut allocator = allocator(16);
        let a = allocator.allocate(1).unwrap();
        let _b = allocator.allocate(1).unwrap();

        allocator.release(&a);
        assert_eq!(allocator.allocated_count(), 1);
        assert_eq!(allocator.allocate(1).unwrap().index(), a.index());
        // 连续分配不使用空闲列表
        assert_eq!(allocator.allocate(2).unwrap().index(), 2);
    }

    #[test]
    fn test_null_handle() {
        let handle = DescriptorHandle::null();
        assert!(handle.is_null());
        assert!(!allocator(4).is_current(&handle));
    }

    #[test]
    fn test_descriptor_heap_stats() {
        let stats = DescriptorHeapStats::new(DescriptorHeapKind::Rtv, 100, 50);
        assert_eq!(stats.capacity, 100);
        assert_eq!(stats.available, 50);
        assert_eq!(stats.usage_ratio, 0.5);
    }
}
