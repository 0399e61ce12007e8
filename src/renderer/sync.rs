//! GPU 同步机制模块
//!
//! 帧流水线的核心约定：每个流水线帧槽位一个命令分配器。复用槽位 `i` 的分配器之前，
//! CPU 必须阻塞到 `completed_value >= pending[i]`。
//!
//! 每帧的顺序：
//! 1. 选择 `frame_index` = 当前后备缓冲索引
//! 2. 等待该槽位上一次使用的 fence 值，然后用该槽位的分配器录制命令
//! 3. 关闭命令列表并提交
//! 4. 发出一个严格递增的新 fence 值，记为 `pending[frame_index]`
//!
//! fence 值在整个 `Fence` 对象上单调递增、从不复用。CPU 最多领先 GPU N-1 帧，
//! 只有在槽位将被回收而 GPU 尚未完成它的上一次使用时才会阻塞。

use std::time::Duration;

use tracing::{debug, trace};

use crate::core::error::Result;
use crate::gfx::backend::GpuBackend;
use crate::gfx::types::QueueKind;

/// Fence 值
///
/// 用于CPU-GPU同步的单调递增值。
/// CPU可以等待GPU完成特定Fence值对应的工作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub const ZERO: FenceValue = FenceValue(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个Fence值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// 帧流水线 fence
///
/// 后端持有原生 fence 对象，这里只维护 CPU 侧的计数与每个槽位的待完成值。
#[derive(Debug)]
pub struct Fence {
    /// 最后一次发出的信号值
    current: FenceValue,
    /// 每个帧槽位最近一次提交对应的信号值
    pending: Vec<FenceValue>,
    /// 等待上限；`None` 为无限等待
    timeout: Option<Duration>,
}

impl Fence {
    pub fn new(frame_count: u32, timeout: Option<Duration>) -> Self {
        Self {
            current: FenceValue::ZERO,
            pending: vec![FenceValue::ZERO; frame_count as usize],
            timeout,
        }
    }

    pub fn frame_count(&self) -> u32 {
        self.pending.len() as u32
    }

    /// 最后一次发出的信号值
    pub fn current_value(&self) -> FenceValue {
        self.current
    }

    /// 槽位的待完成值
    pub fn pending_value(&self, slot: u32) -> FenceValue {
        self.pending[slot as usize]
    }

    pub fn completed_value(&self, backend: &dyn GpuBackend) -> FenceValue {
        FenceValue(backend.completed_value())
    }

    pub fn is_completed(&self, backend: &dyn GpuBackend, value: FenceValue) -> bool {
        self.completed_value(backend) >= value
    }

    /// 发出一个新的信号值（不绑定槽位，用于上传和刷新）
    pub fn signal(&mut self, backend: &mut dyn GpuBackend, queue: QueueKind) -> Result<FenceValue> {
        let value = self.current.next();
        backend.signal(queue, value.0)?;
        self.current = value;
        trace!(value = value.0, "Fence signaled");
        Ok(value)
    }

    /// 为槽位的提交发出信号，并记录为该槽位的待完成值
    ///
    /// 必须在该槽位的提交已经发出之后调用。
    pub fn signal_slot(
        &mut self,
        backend: &mut dyn GpuBackend,
        queue: QueueKind,
        slot: u32,
    ) -> Result<FenceValue> {
        let value = self.signal(backend, queue)?;
        self.pending[slot as usize] = value;
        Ok(value)
    }

    /// 阻塞到 fence 达到 `value`
    pub fn wait_for_value(&self, backend: &mut dyn GpuBackend, value: FenceValue) -> Result<()> {
        let completed = self.completed_value(backend);
        if completed >= value {
            return Ok(());
        }
        debug!(value = value.0, completed = completed.0, "Waiting for fence");
        backend.wait_for_value(value.0, self.timeout)
    }

    /// 复用槽位之前的等待
    ///
    /// 槽位从未提交过，或者 GPU 已经完成时立即返回；返回值表示是否真的阻塞了。
    pub fn wait_for_slot(&self, backend: &mut dyn GpuBackend, slot: u32) -> Result<bool> {
        let pending = self.pending_value(slot);
        if pending == FenceValue::ZERO || self.is_completed(backend, pending) {
            return Ok(false);
        }
        debug!(slot, value = pending.0, "Frame slot still in flight");
        self.wait_for_value(backend, pending)?;
        Ok(true)
    }

    /// 等待 GPU 完全空闲
    pub fn flush(&mut self, backend: &mut dyn GpuBackend, queue: QueueKind) -> Result<()> {
        let value = self.signal(backend, queue)?;
        self.wait_for_value(backend, value)
    }
}

/// 按 fence 值延迟释放的队列
///
/// 条目在入队时记录最后一次可能引用它的 fence 值，只有当 GPU 完成该值后才会被取出。
#[derive(Debug)]
pub struct ReleaseQueue<T> {
    entries: Vec<(FenceValue, T)>,
}

impl<T> ReleaseQueue<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn retire(&mut self, item: T, last_use: FenceValue) {
        self.entries.push((last_use, item));
    }

    /// 取出所有已经安全的条目
    pub fn collect(&mut self, completed: FenceValue) -> Vec<T> {
        let (ready, waiting): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|(value, _)| *value <= completed);
        self.entries = waiting;
        ready.into_iter().map(|(_, item)| item).collect()
    }

    /// 忽略 fence 取出全部条目（GPU 已空闲时使用）
    pub fn drain_all(&mut self) -> Vec<T> {
        self.entries.drain(..).map(|(_, item)| item).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for ReleaseQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FeatureLevel;
    use crate::gfx::software::SoftwareBackend;
    use crate::gfx::CompletionMode;

    fn backend(mode: CompletionMode) -> SoftwareBackend {
        let mut backend = SoftwareBackend::with_completion(mode);
        let adapters = backend.enumerate_adapters().unwrap();
        backend.create_device(&adapters[0], FeatureLevel::Level12_0).unwrap();
        backend.create_queue(QueueKind::Graphics).unwrap();
        backend
    }

    #[test]
    fn test_fence_value() {
        let fence = FenceValue::new(1);
        assert_eq!(fence.next().value(), 2);
        assert!(FenceValue::new(1) < FenceValue::new(2));
    }

    #[test]
    fn test_signal_values_strictly_increase() {
        let mut backend = backend(CompletionMode::Deferred);
        let mut fence = Fence::new(3, None);

        let values: Vec<u64> = (0..6)
            .map(|i| fence.signal_slot(&mut backend, QueueKind::Graphics, i % 3).unwrap().value())
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(fence.pending_value(0).value(), 4);
        assert_eq!(fence.pending_value(2).value(), 6);
    }

    #[test]
    fn test_unused_slot_never_waits() {
        let mut backend = backend(CompletionMode::Deferred);
        let fence = Fence::new(2, None);
        assert!(!fence.wait_for_slot(&mut backend, 1).unwrap());
        assert!(backend.probe().with_journal(|j| j.waits().is_empty()));
    }

    #[test]
    fn test_wait_for_slot_blocks_until_pending() {
        let mut backend = backend(CompletionMode::Deferred);
        let probe = backend.probe();
        let mut fence = Fence::new(2, None);

        fence.signal_slot(&mut backend, QueueKind::Graphics, 0).unwrap();
        fence.signal_slot(&mut backend, QueueKind::Graphics, 1).unwrap();

        assert!(fence.wait_for_slot(&mut backend, 0).unwrap());
        assert_eq!(probe.completed_value(), 1);

        // GPU 已经越过槽位 1
        probe.complete_up_to(2);
        assert!(!fence.wait_for_slot(&mut backend, 1).unwrap());
        assert_eq!(probe.with_journal(|j| j.waits()), vec![1]);
    }

    #[test]
    fn test_immediate_completion_never_blocks() {
        let mut backend = backend(CompletionMode::Immediate);
        let mut fence = Fence::new(2, None);
        for i in 0..4 {
            fence.signal_slot(&mut backend, QueueKind::Graphics, i % 2).unwrap();
            assert!(!fence.wait_for_slot(&mut backend, (i + 1) % 2).unwrap());
        }
    }

    #[test]
    fn test_flush_waits_for_everything() {
        let mut backend = backend(CompletionMode::Deferred);
        let mut fence = Fence::new(2, None);
        fence.signal_slot(&mut backend, QueueKind::Graphics, 0).unwrap();
        fence.flush(&mut backend, QueueKind::Graphics).unwrap();
        assert_eq!(backend.completed_value(), 2);
    }

    #[test]
    fn test_release_queue() {
        let mut queue = ReleaseQueue::new();
        queue.retire("a", FenceValue::new(1));
        queue.retire("b", FenceValue::new(3));
        queue.retire("c", FenceValue::new(2));

        assert!(queue.collect(FenceValue::ZERO).is_empty());
        assert_eq!(queue.collect(FenceValue::new(2)), vec!["a", "c"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_all(), vec!["b"]);
        assert!(queue.is_empty());
    }
}
