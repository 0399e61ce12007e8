//! 软件后端的执行日志
//!
//! 软件后端把每个可观察的 GPU 事件追加到日志中，测试通过 `SoftwareProbe`
//! 检查同步行为（哪次等待真的阻塞了、命令分配器在什么时刻被重置等），
//! 也可以手动推进模拟 GPU 的完成进度。
//!
//! 日志是有界的环形缓冲区，长时间运行时只保留最近的事件。

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::gfx::types::{AllocatorId, MemoryPlacement, QueueKind, RawResourceId, ResourceState};

/// 模拟 GPU 的 fence 完成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// 工作只在 CPU 等待时才“完成”，用于精确观察等待
    Deferred,
    /// 信号发出即完成
    Immediate,
}

/// 可观察的 GPU 事件
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEvent {
    CreateResource {
        resource: RawResourceId,
        label: String,
        placement: MemoryPlacement,
        bytes: u64,
    },
    DestroyResource {
        resource: RawResourceId,
    },
    ResetAllocator {
        allocator: AllocatorId,
        /// 重置时 GPU 已完成的 fence 值
        completed: u64,
    },
    Barrier {
        resource: RawResourceId,
        before: ResourceState,
        after: ResourceState,
    },
    Execute {
        queue: QueueKind,
        allocator: AllocatorId,
        commands: usize,
        draws: usize,
    },
    Signal {
        value: u64,
    },
    /// 一次真正阻塞的等待
    Wait {
        value: u64,
        completed_before: u64,
    },
    Present {
        back_buffer: u32,
    },
}

/// 默认保留的事件数
pub const DEFAULT_JOURNAL_CAPACITY: usize = 16 * 1024;

/// 事件日志
#[derive(Debug)]
pub struct Journal {
    events: VecDeque<JournalEvent>,
    capacity: usize,
    /// 创建减销毁，不受淘汰与清空影响
    live: usize,
    evicted: u64,
}

impl Default for Journal {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl Journal {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { events: VecDeque::with_capacity(capacity.min(1024)), capacity, live: 0, evicted: 0 }
    }

    pub fn push(&mut self, event: JournalEvent) {
        match event {
            JournalEvent::CreateResource { .. } => self.live += 1,
            JournalEvent::DestroyResource { .. } => self.live = self.live.saturating_sub(1),
            _ => {}
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.evicted += 1;
        }
        self.events.push_back(event);
    }

    /// 保留窗口内的事件，按发生顺序
    pub fn events(&self) -> &VecDeque<JournalEvent> {
        &self.events
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 因容量上限被丢弃的事件数
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// 所有信号值，按发出顺序
    pub fn signals(&self) -> Vec<u64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                JournalEvent::Signal { value } => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// 所有阻塞等待的目标值
    pub fn waits(&self) -> Vec<u64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                JournalEvent::Wait { value, .. } => Some(*value),
                _ => None,
            })
            .collect()
    }

    pub fn total_draws(&self) -> usize {
        self.events
            .iter()
            .map(|e| match e {
                JournalEvent::Execute { draws, .. } => *draws,
                _ => 0,
            })
            .sum()
    }

    pub fn presents(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, JournalEvent::Present { .. }))
            .count()
    }

    /// 后端上仍存活的资源数
    pub fn live_resources(&self) -> usize {
        self.live
    }
}

/// 模拟 fence 的状态
#[derive(Debug, Default)]
pub(crate) struct FenceState {
    pub signaled: u64,
    pub completed: u64,
}

/// 测试用的观察句柄，可以在后端被移交给设备之后继续使用
#[derive(Debug, Clone)]
pub struct SoftwareProbe {
    pub(crate) journal: Arc<Mutex<Journal>>,
    pub(crate) fence: Arc<Mutex<FenceState>>,
}

impl SoftwareProbe {
    /// 在锁内访问日志
    pub fn with_journal<R>(&self, f: impl FnOnce(&Journal) -> R) -> R {
        f(&self.journal.lock())
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    pub fn completed_value(&self) -> u64 {
        self.fence.lock().completed
    }

    pub fn signaled_value(&self) -> u64 {
        self.fence.lock().signaled
    }

    /// 让模拟 GPU 完成到 `value`（不超过已发出的最大信号值）
    pub fn complete_up_to(&self, value: u64) {
        let mut fence = self.fence.lock();
        let target = value.min(fence.signaled);
        if target > fence.completed {
            fence.completed = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_queries() {
        let mut journal = Journal::default();
        journal.push(JournalEvent::Signal { value: 1 });
        journal.push(JournalEvent::Wait { value: 1, completed_before: 0 });
        journal.push(JournalEvent::Signal { value: 2 });
        journal.push(JournalEvent::Present { back_buffer: 0 });

        assert_eq!(journal.signals(), vec![1, 2]);
        assert_eq!(journal.waits(), vec![1]);
        assert_eq!(journal.presents(), 1);
    }

    #[test]
    fn test_journal_keeps_most_recent_events() {
        let mut journal = Journal::with_capacity(4);
        journal.push(JournalEvent::CreateResource {
            resource: RawResourceId(1),
            label: "vb".into(),
            placement: MemoryPlacement::DeviceLocal,
            bytes: 64,
        });
        for value in 1..=10 {
            journal.push(JournalEvent::Signal { value });
        }

        assert_eq!(journal.events().len(), 4);
        assert_eq!(journal.signals(), vec![7, 8, 9, 10]);
        assert_eq!(journal.evicted(), 7);
        // 创建事件已被淘汰，计数仍然正确
        assert_eq!(journal.live_resources(), 1);

        journal.clear();
        journal.push(JournalEvent::DestroyResource { resource: RawResourceId(1) });
        assert_eq!(journal.live_resources(), 0);
    }

    #[test]
    fn test_probe_never_completes_past_signal() {
        let probe = SoftwareProbe {
            journal: Arc::new(Mutex::new(Journal::default())),
            fence: Arc::new(Mutex::new(FenceState { signaled: 3, completed: 0 })),
        };
        probe.complete_up_to(10);
        assert_eq!(probe.completed_value(), 3);
    }
}
