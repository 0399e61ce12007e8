//! 软件后端的块式子分配器
//!
//! 模拟驱动侧的堆分配：每种放置类别维护若干固定大小的内存块，
//! 资源从块内按对齐要求首次适配分配；超过块大小的资源独占一个块。
//! 释放时合并相邻的空闲区间，块完全空闲后归还。

use std::ops::Range;

use crate::gfx::types::MemoryPlacement;

/// 默认块大小：64 MiB
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// 一次子分配
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAllocation {
    pub block: usize,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug)]
struct MemoryBlock {
    placement: MemoryPlacement,
    size: u64,
    /// 按起始地址排序的空闲区间
    free: Vec<Range<u64>>,
    live: usize,
}

impl MemoryBlock {
    fn new(placement: MemoryPlacement, size: u64) -> Self {
        Self { placement, size, free: vec![0..size], live: 0 }
    }

    fn try_allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        for i in 0..self.free.len() {
            let range = self.free[i].clone();
            let start = crate::gfx::types::align_up(range.start, alignment);
            if start + size > range.end {
                continue;
            }

            let mut replacement = Vec::with_capacity(2);
            if start > range.start {
                replacement.push(range.start..start);
            }
            if start + size < range.end {
                replacement.push(start + size..range.end);
            }
            self.free.splice(i..=i, replacement);
            self.live += 1;
            return Some(start);
        }
        None
    }

    fn release(&mut self, offset: u64, size: u64) {
        let pos = self.free.partition_point(|r| r.start < offset);
        self.free.insert(pos, offset..offset + size);
        self.live -= 1;

        // 合并相邻区间
        let mut merged: Vec<Range<u64>> = Vec::with_capacity(self.free.len());
        for range in self.free.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end == range.start => last.end = range.end,
                _ => merged.push(range),
            }
        }
        self.free = merged;
    }

    fn is_empty(&self) -> bool {
        self.live == 0
    }
}

/// 块式子分配器
#[derive(Debug)]
pub struct BlockAllocator {
    block_size: u64,
    blocks: Vec<Option<MemoryBlock>>,
}

impl BlockAllocator {
    pub fn new(block_size: u64) -> Self {
        Self { block_size, blocks: Vec::new() }
    }

    /// 分配内存；总是成功（软件后端不模拟显存耗尽）
    pub fn allocate(&mut self, placement: MemoryPlacement, size: u64, alignment: u64) -> SubAllocation {
        let size = size.max(1);

        if size <= self.block_size {
            for (index, slot) in self.blocks.iter_mut().enumerate() {
                if let Some(block) = slot {
                    if block.placement != placement {
                        continue;
                    }
                    if let Some(offset) = block.try_allocate(size, alignment) {
                        return SubAllocation { block: index, offset, size };
                    }
                }
            }
        }

        let mut block = MemoryBlock::new(placement, size.max(self.block_size));
        let offset = block.try_allocate(size, alignment).unwrap_or(0);

        let index = match self.blocks.iter().position(Option::is_none) {
            Some(index) => {
                self.blocks[index] = Some(block);
                index
            }
            None => {
                self.blocks.push(Some(block));
                self.blocks.len() - 1
            }
        };

        tracing::trace!(block = index, placement = placement.name(), "Software memory block created");
        SubAllocation { block: index, offset, size }
    }

    /// 释放分配；块变空时一并归还
    pub fn free(&mut self, allocation: SubAllocation) {
        let Some(slot) = self.blocks.get_mut(allocation.block) else {
            return;
        };
        let emptied = match slot.as_mut() {
            Some(block) => {
                block.release(allocation.offset, allocation.size);
                block.is_empty()
            }
            None => false,
        };
        if emptied {
            *slot = None;
        }
    }

    /// 当前存活的内存块数量
    pub fn block_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_allocations_share_block() {
        let mut allocator = BlockAllocator::new(4096);
        let a = allocator.allocate(MemoryPlacement::UploadVisible, 256, 256);
        let b = allocator.allocate(MemoryPlacement::UploadVisible, 100, 256);

        assert_eq!(a.block, b.block);
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(allocator.block_count(), 1);
    }

    #[test]
    fn test_placements_use_separate_blocks() {
        let mut allocator = BlockAllocator::new(4096);
        let a = allocator.allocate(MemoryPlacement::UploadVisible, 256, 256);
        let b = allocator.allocate(MemoryPlacement::DeviceLocal, 256, 256);
        assert_ne!(a.block, b.block);
    }

    #[test]
    fn test_free_merges_and_releases_block() {
        let mut allocator = BlockAllocator::new(4096);
        let a = allocator.allocate(MemoryPlacement::DeviceLocal, 1024, 256);
        let b = allocator.allocate(MemoryPlacement::DeviceLocal, 1024, 256);

        allocator.free(a);
        let c = allocator.allocate(MemoryPlacement::DeviceLocal, 1024, 256);
        assert_eq!(c.offset, 0);

        allocator.free(b);
        allocator.free(c);
        assert_eq!(allocator.block_count(), 0);
    }

    #[test]
    fn test_oversized_allocation_gets_dedicated_block() {
        let mut allocator = BlockAllocator::new(1024);
        let big = allocator.allocate(MemoryPlacement::DeviceLocal, 8192, 256);
        assert_eq!(big.offset, 0);
        assert_eq!(allocator.block_count(), 1);
    }
}
