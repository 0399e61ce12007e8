//! 命令列表管理模块
//!
//! 命令列表在 CPU 端录制 `Command` 流，由 `CommandQueue` 提交给后端。
//!
//! # 状态机
//!
//! `Initial` → `open` → `Recording` → `close` → `Closed` → `submit` → `Submitted` → `open` ...
//!
//! 每个流水线帧槽位一个命令分配器。`open(slot)` 会重置该槽位的分配器，
//! 因此要求 fence 已经完成该槽位上一次提交的值，否则拒绝打开。

use std::fmt;

use tracing::trace;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GpuBackend;
use crate::gfx::command::Command;
use crate::gfx::types::{
    AllocatorId, IndexBufferView, PipelineId, PrimitiveTopology, QueueKind, RawHeapId,
    RawResourceId, RootSignatureId, ScissorRect, TextureFootprint, TransitionBarrier, Viewport,
};

use super::descriptor::CpuDescriptorHandle;
use super::sync::FenceValue;

/// 命令列表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// 初始状态
    Initial,
    /// 正在记录
    Recording,
    /// 已完成记录
    Closed,
    /// 已提交到队列
    Submitted,
}

impl fmt::Display for CommandListState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandListState::Initial => "Initial",
            CommandListState::Recording => "Recording",
            CommandListState::Closed => "Closed",
            CommandListState::Submitted => "Submitted",
        };
        f.write_str(name)
    }
}

/// 命令列表
pub struct CommandList {
    label: String,
    queue: QueueKind,
    /// 每个帧槽位一个分配器
    allocators: Vec<AllocatorId>,
    slot: u32,
    state: CommandListState,
    commands: Vec<Command>,
}

impl CommandList {
    /// 创建命令列表，为每个槽位创建一个分配器
    pub fn new(
        backend: &mut dyn GpuBackend,
        queue: QueueKind,
        slots: u32,
        label: impl Into<String>,
    ) -> Result<Self> {
        let allocators = (0..slots)
            .map(|_| backend.create_command_allocator(queue))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            label: label.into(),
            queue,
            allocators,
            slot: 0,
            state: CommandListState::Initial,
            commands: Vec::new(),
        })
    }

    fn invalid_state(&self, operation: &str) -> GraphicsError {
        GraphicsError::InvalidCommandListState(format!(
            "{} on '{}' in state {}",
            operation, self.label, self.state
        ))
    }

    /// 使用槽位 `slot` 的分配器开始录制
    ///
    /// `last_use` 是该槽位上一次提交对应的 fence 值；GPU 尚未完成它时返回错误，
    /// 因为分配器可能仍被 GPU 使用。
    pub fn open(&mut self, backend: &mut dyn GpuBackend, slot: u32, last_use: FenceValue) -> Result<()> {
        if self.state == CommandListState::Recording {
            return Err(self.invalid_state("open").into());
        }

        let allocator = *self.allocators.get(slot as usize).ok_or_else(|| {
            GraphicsError::InvalidCommandListState(format!("'{}' has no allocator for slot {}", self.label, slot))
        })?;

        if backend.completed_value() < last_use.value() {
            return Err(GraphicsError::InvalidCommandListState(format!(
                "Allocator for slot {} of '{}' is still in flight (fence {})",
                slot,
                self.label,
                last_use.value()
            ))
            .into());
        }

        backend.reset_command_allocator(allocator)?;
        self.commands.clear();
        self.slot = slot;
        self.state = CommandListState::Recording;
        trace!(list = %self.label, slot, "Command list opened");
        Ok(())
    }

    /// 结束录制
    pub fn close(&mut self) -> Result<()> {
        if self.state != CommandListState::Recording {
            return Err(self.invalid_state("close").into());
        }
        self.state = CommandListState::Closed;
        Ok(())
    }

    fn record(&mut self, command: Command) -> Result<()> {
        if self.state != CommandListState::Recording {
            return Err(self.invalid_state("record").into());
        }
        self.commands.push(command);
        Ok(())
    }

    pub fn resource_barrier(&mut self, barriers: Vec<TransitionBarrier>) -> Result<()> {
        if barriers.is_empty() {
            return Ok(());
        }
        self.record(Command::Barrier(barriers))
    }

    pub fn copy_buffer(
        &mut self,
        dst: RawResourceId,
        dst_offset: u64,
        src: RawResourceId,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.record(Command::CopyBuffer { dst, dst_offset, src, src_offset, size })
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        dst: RawResourceId,
        subresource: u32,
        src: RawResourceId,
        src_offset: u64,
        footprint: TextureFootprint,
    ) -> Result<()> {
        self.record(Command::CopyBufferToTexture { dst, subresource, src, src_offset, footprint })
    }

    pub fn copy_texture_to_buffer(
        &mut self,
        dst: RawResourceId,
        dst_offset: u64,
        src: RawResourceId,
        subresource: u32,
        footprint: TextureFootprint,
    ) -> Result<()> {
        self.record(Command::CopyTextureToBuffer { dst, dst_offset, src, subresource, footprint })
    }

    pub fn clear_render_target(
        &mut self,
        rtv: CpuDescriptorHandle,
        resource: RawResourceId,
        color: [f32; 4],
    ) -> Result<()> {
        self.record(Command::ClearRenderTarget { rtv: rtv.ptr, resource, color })
    }

    pub fn clear_depth(&mut self, dsv: CpuDescriptorHandle, resource: RawResourceId, depth: f32) -> Result<()> {
        self.record(Command::ClearDepth { dsv: dsv.ptr, resource, depth })
    }

    pub fn set_descriptor_heap(&mut self, heap: RawHeapId) -> Result<()> {
        self.record(Command::SetDescriptorHeap(heap))
    }

    pub fn set_root_signature(&mut self, root_signature: RootSignatureId) -> Result<()> {
        self.record(Command::SetRootSignature(root_signature))
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineId) -> Result<()> {
        self.record(Command::SetPipeline(pipeline))
    }

    pub fn set_root_constants(&mut self, parameter: u32, values: &[u32]) -> Result<()> {
        self.record(Command::SetRootConstants { parameter, values: values.to_vec() })
    }

    pub fn set_root_constant_buffer(&mut self, parameter: u32, resource: RawResourceId, offset: u64) -> Result<()> {
        self.record(Command::SetRootConstantBuffer { parameter, resource, offset })
    }

    pub fn set_render_targets(
        &mut self,
        rtvs: &[CpuDescriptorHandle],
        dsv: Option<CpuDescriptorHandle>,
    ) -> Result<()> {
        self.record(Command::SetRenderTargets {
            rtvs: rtvs.iter().map(|h| h.ptr).collect(),
            dsv: dsv.map(|h| h.ptr),
        })
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.record(Command::SetViewport(viewport))
    }

    pub fn set_scissor(&mut self, scissor: ScissorRect) -> Result<()> {
        self.record(Command::SetScissor(scissor))
    }

    pub fn set_topology(&mut self, topology: PrimitiveTopology) -> Result<()> {
        self.record(Command::SetTopology(topology))
    }

    pub fn set_index_buffer(&mut self, view: IndexBufferView) -> Result<()> {
        self.record(Command::SetIndexBuffer(view))
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> Result<()> {
        self.record(Command::Draw { vertex_count, instance_count, first_vertex: 0, first_instance: 0 })
    }

    pub fn draw_indexed(&mut self, index_count: u32, first_index: u32, base_vertex: i32) -> Result<()> {
        self.record(Command::DrawIndexed {
            index_count,
            instance_count: 1,
            first_index,
            base_vertex,
            first_instance: 0,
        })
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == CommandListState::Recording
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// 命令队列
#[derive(Debug)]
pub struct CommandQueue {
    kind: QueueKind,
}

impl CommandQueue {
    pub fn new(backend: &mut dyn GpuBackend, kind: QueueKind) -> Result<Self> {
        backend.create_queue(kind)?;
        Ok(Self { kind })
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// 提交已关闭的命令列表；同一队列上提交顺序即执行顺序
    pub fn submit(&self, backend: &mut dyn GpuBackend, list: &mut CommandList) -> Result<()> {
        if list.state != CommandListState::Closed {
            return Err(list.invalid_state("submit").into());
        }
        if list.queue != self.kind {
            return Err(GraphicsError::InvalidCommandListState(format!(
                "'{}' was created for the {:?} queue",
                list.label, list.queue
            ))
            .into());
        }

        backend.execute(self.kind, list.allocators[list.slot as usize], &list.commands)?;
        list.state = CommandListState::Submitted;
        trace!(list = %list.label, commands = list.commands.len(), "Command list submitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FeatureLevel;
    use crate::gfx::software::{JournalEvent, SoftwareBackend};
    use crate::renderer::sync::Fence;

    fn setup() -> (SoftwareBackend, CommandQueue, Fence) {
        let mut backend = SoftwareBackend::default();
        let adapters = backend.enumerate_adapters().unwrap();
        backend.create_device(&adapters[0], FeatureLevel::Level12_0).unwrap();
        let queue = CommandQueue::new(&mut backend, QueueKind::Graphics).unwrap();
        (backend, queue, Fence::new(2, None))
    }

    #[test]
    fn test_state_machine() {
        let (mut backend, queue, fence) = setup();
        let mut list = CommandList::new(&mut backend, QueueKind::Graphics, 2, "main").unwrap();
        assert_eq!(list.state(), CommandListState::Initial);

        // 未打开时不能录制或关闭
        assert!(list.draw(3, 1).is_err());
        assert!(list.close().is_err());

        list.open(&mut backend, 0, fence.pending_value(0)).unwrap();
        assert!(list.open(&mut backend, 0, fence.pending_value(0)).is_err());
        list.draw(3, 1).unwrap();

        // 录制中不能提交
        assert!(queue.submit(&mut backend, &mut list).is_err());

        list.close().unwrap();
        queue.submit(&mut backend, &mut list).unwrap();
        assert_eq!(list.state(), CommandListState::Submitted);
        assert!(queue.submit(&mut backend, &mut list).is_err());
        assert_eq!(backend.probe().with_journal(|j| j.total_draws()), 1);
    }

    #[test]
    fn test_open_refuses_in_flight_slot() {
        let (mut backend, queue, mut fence) = setup();
        let mut list = CommandList::new(&mut backend, QueueKind::Graphics, 2, "main").unwrap();

        list.open(&mut backend, 0, fence.pending_value(0)).unwrap();
        list.close().unwrap();
        queue.submit(&mut backend, &mut list).unwrap();
        fence.signal_slot(&mut backend, QueueKind::Graphics, 0).unwrap();

        assert!(list.open(&mut backend, 0, fence.pending_value(0)).is_err());
        // 另一个槽位不受影响
        list.open(&mut backend, 1, fence.pending_value(1)).unwrap();
        list.close().unwrap();

        fence.wait_for_slot(&mut backend, 0).unwrap();
        list.open(&mut backend, 0, fence.pending_value(0)).unwrap();
    }

    #[test]
    fn test_allocator_reset_recorded_per_slot() {
        let (mut backend, _queue, fence) = setup();
        let probe = backend.probe();
        let mut list = CommandList::new(&mut backend, QueueKind::Graphics, 2, "main").unwrap();

        list.open(&mut backend, 1, fence.pending_value(1)).unwrap();
        list.close().unwrap();

        let resets = probe.with_journal(|j| {
            j.events()
                .iter()
                .filter(|e| matches!(e, JournalEvent::ResetAllocator { .. }))
                .count()
        });
        assert_eq!(resets, 1);
        assert_eq!(list.slot(), 1);
    }
}
