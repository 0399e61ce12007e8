//! 图形后端的统一抽象接口
//!
//! 渲染核心只通过 `GpuBackend` 与图形 API 交互。DX12 后端把调用翻译成
//! D3D12 API；软件后端在 CPU 内存上模拟同样的语义，用于无 GPU 环境和测试。
//!
//! 接口刻意保持“薄”：描述符分配、状态跟踪、帧同步策略全部在核心层实现，
//! 后端只暴露原语（创建资源、写视图、执行命令流、信号 / 等待 fence）。

use std::time::Duration;

use crate::core::config::FeatureLevel;
use crate::core::error::Result;

use super::command::Command;
use super::types::{
    AdapterInfo, AllocatorId, DescriptorHeapInfo, DescriptorHeapKind, DeviceCapabilities,
    GraphicsPipelineDesc, MemoryPlacement, PipelineId, QueueKind, RawHeapId, RawResourceId,
    ResourceDesc, ResourceState, RootSignatureDesc, RootSignatureId, SurfaceTarget, SwapChainDesc,
    ViewDesc,
};

/// 图形后端的统一接口
pub trait GpuBackend {
    /// 后端名称，用于日志输出
    fn name(&self) -> &'static str;

    /// 枚举可用的物理适配器
    fn enumerate_adapters(&mut self) -> Result<Vec<AdapterInfo>>;

    /// 在指定适配器上以指定特性等级创建逻辑设备
    fn create_device(&mut self, adapter: &AdapterInfo, feature_level: FeatureLevel) -> Result<()>;

    /// 查询可选硬件特性
    fn query_capabilities(&self) -> Result<DeviceCapabilities>;

    /// 创建命令队列（每种类型一个）
    fn create_queue(&mut self, kind: QueueKind) -> Result<()>;

    /// 创建描述符堆
    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
        label: &str,
    ) -> Result<(RawHeapId, DescriptorHeapInfo)>;

    /// 在堆的指定槽位写入视图
    fn write_view(
        &mut self,
        heap: RawHeapId,
        index: u32,
        resource: RawResourceId,
        view: &ViewDesc,
    ) -> Result<()>;

    /// 创建资源；资源与其内存分配一一绑定
    fn create_resource(
        &mut self,
        desc: &ResourceDesc,
        placement: MemoryPlacement,
        initial_state: ResourceState,
    ) -> Result<RawResourceId>;

    /// 释放资源及其内存分配
    fn destroy_resource(&mut self, resource: RawResourceId);

    /// 写入 CPU 可见资源（映射 - 拷贝 - 解除映射）
    fn write_buffer(&mut self, resource: RawResourceId, offset: u64, data: &[u8]) -> Result<()>;

    /// 读取 CPU 可见资源
    fn read_buffer(&mut self, resource: RawResourceId, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// 创建命令分配器
    fn create_command_allocator(&mut self, queue: QueueKind) -> Result<AllocatorId>;

    /// 重置命令分配器，调用方保证 GPU 已不再使用其中的命令
    fn reset_command_allocator(&mut self, allocator: AllocatorId) -> Result<()>;

    /// 把录制的命令流提交到队列
    fn execute(&mut self, queue: QueueKind, allocator: AllocatorId, commands: &[Command]) -> Result<()>;

    /// 在队列上发出 fence 信号
    fn signal(&mut self, queue: QueueKind, value: u64) -> Result<()>;

    /// GPU 已完成的 fence 值
    fn completed_value(&self) -> u64;

    /// 阻塞直到 fence 达到 `value`；`timeout` 为 `None` 时无限等待
    fn wait_for_value(&mut self, value: u64, timeout: Option<Duration>) -> Result<()>;

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> Result<RootSignatureId>;

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> Result<PipelineId>;

    /// 创建交换链，返回后备缓冲资源
    fn create_swapchain(
        &mut self,
        surface: SurfaceTarget,
        desc: &SwapChainDesc,
    ) -> Result<Vec<RawResourceId>>;

    /// 调整交换链尺寸；调用方必须先释放所有后备缓冲引用并等待 GPU 空闲
    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<Vec<RawResourceId>>;

    /// 当前后备缓冲索引
    fn current_back_buffer_index(&self) -> u32;

    /// 呈现当前后备缓冲
    fn present(&mut self, vsync: bool) -> Result<()>;
}
