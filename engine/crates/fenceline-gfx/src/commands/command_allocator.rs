use std::{cmp::Ordering, sync::Arc};

use crate::{
    GfxResult,
    foundation::{backend::GfxBackend, handles::RawCommandAllocator, queue_kind::GfxQueueKind},
};

/// command list 背后的内存
///
/// 提交之后会和 command context 分离，直到 fence 完成之前都不能 reset
pub struct GfxCommandAllocator {
    backend: Arc<dyn GfxBackend>,
    raw: RawCommandAllocator,
    queue: GfxQueueKind,
}

// init & destroy
impl GfxCommandAllocator {
    pub fn new(backend: Arc<dyn GfxBackend>, queue: GfxQueueKind, debug_name: &str) -> GfxResult<Self> {
        let raw = backend.create_command_allocator(queue, debug_name)?;
        Ok(Self { backend, raw, queue })
    }
}
impl Drop for GfxCommandAllocator {
    fn drop(&mut self) {
        self.backend.destroy_command_allocator(self.raw);
    }
}
// getters
impl GfxCommandAllocator {
    #[inline]
    pub fn raw(&self) -> RawCommandAllocator {
        self.raw
    }

    #[inline]
    pub fn queue(&self) -> GfxQueueKind {
        self.queue
    }
}
// tools
impl GfxCommandAllocator {
    /// 释放之前录制的所有命令的内存
    #[inline]
    pub fn reset(&self) -> GfxResult<()> {
        self.backend.reset_command_allocator(self.raw)
    }
}

/// 等待 fence 到达 `fence_value` 之后才能复用的 allocator
///
/// 只按照 `fence_value` 排序
pub struct PendingCommandAllocator {
    pub fence_value: u64,
    pub allocator: GfxCommandAllocator,
}

impl PartialEq for PendingCommandAllocator {
    fn eq(&self, other: &Self) -> bool {
        self.fence_value == other.fence_value
    }
}
impl Eq for PendingCommandAllocator {}
impl PartialOrd for PendingCommandAllocator {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingCommandAllocator {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fence_value.cmp(&other.fence_value)
    }
}

#[cfg(test)]
mod tests {
    use std::{cmp::Reverse, collections::BinaryHeap};

    use super::*;
    use crate::backends::null::{NullBackend, NullCompletionMode};

    #[test]
    fn test_pending_heap_pops_lowest_fence_first() {
        let backend: Arc<dyn GfxBackend> = Arc::new(NullBackend::new(NullCompletionMode::Manual));
        let mut heap = BinaryHeap::new();
        for fence_value in [5, 2, 9, 3] {
            let allocator = GfxCommandAllocator::new(backend.clone(), GfxQueueKind::Graphics, "alloc").unwrap();
            heap.push(Reverse(PendingCommandAllocator { fence_value, allocator }));
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|Reverse(p)| p.fence_value)).collect();
        assert_eq!(order, vec![2, 3, 5, 9]);
    }
}
