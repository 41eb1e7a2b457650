//! descriptor 分配器
//!
//! - 小于等于 `block_size` 的请求向上取整到 2 的幂，从对应 size class 的空闲链表中分配；
//!   链表为空时从 heap 末尾切出一整个 block（或者复用回收的超大块）拆成该 class 的节点
//! - 大于 `block_size` 的请求直接从 heap 末尾线性分配
//! - 释放只是记录一条带有 fence value 的待回收记录，`recycle` 时才会挂回链表

use std::sync::Arc;

use fenceline_gfx::{
    GfxResult,
    commands::{execution_queue::GfxExecutionQueue, fence::GfxFence},
    foundation::backend::GfxBackend,
    resources::descriptor_heap::{GfxDescriptorHeapDesc, GfxDescriptorHeapInfo, GfxDescriptorKind},
};
use parking_lot::Mutex;

use crate::{
    config::DescriptorHeapConfig,
    descriptor::{
        descriptor_table::DescriptorTable,
        free_list::{INVALID_NODE, SegregatedFreeList},
    },
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorAllocatorStats {
    pub capacity: u32,
    /// 没有被存活的 table 占用的 slot 数量（包括待回收的）
    pub free_count: u64,
    /// 已经释放但还在等待 fence 的 slot 数量
    pub pending_count: u64,
    pub bump_cursor: u32,
    pub node_count: usize,
    pub oversized_free_blocks: usize,
}

/// 待回收记录，`fence_value` 完成之后才能挂回空闲链表
#[derive(Copy, Clone, Debug)]
struct PendingFree {
    fence_value: u64,
    offset: u32,
    count: u32,
    node_hint: u32,
}

struct DescriptorAllocatorState {
    free_list: SegregatedFreeList,
    /// 从未分配过的区域的起点，只增不减
    bump_cursor: u32,
    free_count: u64,

    pending: Vec<PendingFree>,
    /// 回收的超大块 `(offset, count)`，只用来切新的 block
    oversized_free: Vec<(u32, u32)>,

    /// 下一次 recycle 会 signal 的值，释放的记录都以它为标记
    tracking_next_value: u64,
}

impl DescriptorAllocatorState {
    /// 为 class 准备一个新的 block：优先使用回收的超大块，其次从 heap 末尾切
    fn allocate_new_block(&mut self, class: usize, block_size: u32, capacity: u32) -> bool {
        let base = if let Some((offset, count)) = self.oversized_free.pop() {
            let rest = count - block_size;
            if rest >= block_size {
                self.oversized_free.push((offset + block_size, rest));
            } else if rest > 0 {
                self.free_list.push_range(offset + block_size, rest);
            }
            offset
        } else if self.bump_cursor as u64 + block_size as u64 <= capacity as u64 {
            let offset = self.bump_cursor;
            self.bump_cursor += block_size;
            offset
        } else {
            return false;
        };

        // 倒序压入，保证先弹出低地址
        let size = SegregatedFreeList::class_size(class);
        for i in (0..block_size / size).rev() {
            self.free_list.push(class, base + i * size, INVALID_NODE);
        }
        true
    }

    /// 返回 `(offset, granted, node)`
    fn try_allocate_class(&mut self, class: usize, block_size: u32, capacity: u32) -> Option<(u32, u32, u32)> {
        if self.free_list.is_empty(class) && !self.allocate_new_block(class, block_size, capacity) {
            return None;
        }
        let (offset, node) = self.free_list.pop(class)?;
        let granted = SegregatedFreeList::class_size(class);
        self.free_count -= granted as u64;
        Some((offset, granted, node))
    }

    /// 把 fence 已经完成的记录挂回空闲链表，返回回收的 slot 数量
    fn reclaim(&mut self, completed_value: u64, block_size: u32) -> u64 {
        let Self {
            pending,
            free_list,
            oversized_free,
            ..
        } = self;

        let mut reclaimed = 0;
        pending.retain(|record| {
            if record.fence_value > completed_value {
                return true;
            }
            if record.count <= block_size {
                free_list.push(SegregatedFreeList::class_of(record.count), record.offset, record.node_hint);
            } else {
                oversized_free.push((record.offset, record.count));
            }
            reclaimed += record.count as u64;
            false
        });
        reclaimed
    }
}

/// allocator 和所有 table 共享的部分
pub(crate) struct DescriptorHeapShared {
    backend: Arc<dyn GfxBackend>,
    queue: Arc<GfxExecutionQueue>,

    heap: GfxDescriptorHeapInfo,
    desc: GfxDescriptorHeapDesc,
    block_size: u32,

    /// 只有 shader visible 的 heap 需要等待 GPU
    tracking_fence: Option<GfxFence>,
    state: Mutex<DescriptorAllocatorState>,
}

impl Drop for DescriptorHeapShared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        log::info!(
            "destroy descriptor heap {}: {} pending slots, bump cursor {}/{}",
            self.desc.debug_name,
            state.pending.iter().map(|r| r.count as u64).sum::<u64>(),
            state.bump_cursor,
            self.desc.capacity
        );
        self.backend.destroy_descriptor_heap(self.heap.raw);
    }
}

impl DescriptorHeapShared {
    #[inline]
    pub(crate) fn heap_info(&self) -> &GfxDescriptorHeapInfo {
        &self.heap
    }

    fn allocate_oversized(&self, count: u32) -> (u32, u32, u32) {
        let mut state = self.state.lock();
        if state.bump_cursor as u64 + count as u64 > self.desc.capacity as u64 {
            drop(state);
            self.exhausted(count);
        }
        let offset = state.bump_cursor;
        state.bump_cursor += count;
        state.free_count -= count as u64;
        (offset, count, INVALID_NODE)
    }

    fn allocate_from_class(&self, count: u32) -> (u32, u32, u32) {
        let class = SegregatedFreeList::class_of(count);
        let capacity = self.desc.capacity;

        if let Some(allocation) = self.state.lock().try_allocate_class(class, self.block_size, capacity) {
            return allocation;
        }

        // 最后一次机会：回收 fence 已经完成的记录，不 signal
        let completed_value = self.completed_value_without_signal();
        let mut state = self.state.lock();
        let reclaimed = state.reclaim(completed_value, self.block_size);
        if reclaimed > 0 {
            log::debug!("descriptor heap {} reclaimed {} slots on exhaustion", self.desc.debug_name, reclaimed);
        }
        if let Some(allocation) = state.try_allocate_class(class, self.block_size, capacity) {
            return allocation;
        }

        // 借用更大的 class，多出来的部分在释放之前都是浪费的
        if let Some(larger) = state.free_list.first_non_empty_from(class + 1)
            && let Some((offset, node)) = state.free_list.pop(larger)
        {
            let granted = SegregatedFreeList::class_size(larger);
            state.free_count -= granted as u64;
            log::debug!(
                "descriptor heap {} borrowed a block of {} for a request of {}",
                self.desc.debug_name,
                granted,
                count
            );
            return (offset, granted, node);
        }

        drop(state);
        self.exhausted(count)
    }

    /// 分配路径没有办法返回错误，fence 查询失败时直接 panic
    fn completed_value_without_signal(&self) -> u64 {
        match &self.tracking_fence {
            Some(fence) => fence.completed_value().unwrap_or_else(|e| {
                log::error!("failed to query tracking fence of {}: {}", self.desc.debug_name, e);
                panic!("tracking fence of {} failed: {}", self.desc.debug_name, e)
            }),
            None => u64::MAX,
        }
    }

    fn exhausted(&self, count: u32) -> ! {
        let stats = self.stats();
        log::error!("descriptor heap {} exhausted when allocating {}: {:?}", self.desc.debug_name, count, stats);
        panic!("descriptor heap {} exhausted", self.desc.debug_name);
    }

    /// table drop 时调用，slot 的下标由 table 的 CPU 地址反推
    pub(crate) fn release_table(&self, cpu_handle: u64, granted: u32, node_hint: u32) {
        debug_assert!(cpu_handle >= self.heap.cpu_base);
        let offset = ((cpu_handle - self.heap.cpu_base) / self.heap.increment as u64) as u32;
        assert!(
            offset as u64 + granted as u64 <= self.desc.capacity as u64,
            "descriptor table [{}, {}) does not belong to heap {}",
            offset,
            offset as u64 + granted as u64,
            self.desc.debug_name
        );

        let mut state = self.state.lock();
        let fence_value = state.tracking_next_value;
        state.pending.push(PendingFree {
            fence_value,
            offset,
            count: granted,
            node_hint,
        });
        state.free_count += granted as u64;
    }

    fn stats(&self) -> DescriptorAllocatorStats {
        let state = self.state.lock();
        DescriptorAllocatorStats {
            capacity: self.desc.capacity,
            free_count: state.free_count,
            pending_count: state.pending.iter().map(|r| r.count as u64).sum(),
            bump_cursor: state.bump_cursor,
            node_count: state.free_list.node_count(),
            oversized_free_blocks: state.oversized_free.len(),
        }
    }
}

/// 一个 descriptor heap 以及它的分配器
pub struct DescriptorAllocator {
    shared: Arc<DescriptorHeapShared>,
}

// init & destroy
impl DescriptorAllocator {
    /// `queue` 用来 signal 追踪 fence：heap 中的 descriptor 只会被这个 queue 上的工作读取
    pub fn new(
        queue: Arc<GfxExecutionQueue>,
        kind: GfxDescriptorKind,
        config: &DescriptorHeapConfig,
        shader_visible: bool,
        debug_name: impl Into<String>,
    ) -> GfxResult<Self> {
        assert!(config.block_size.is_power_of_two(), "descriptor block size must be a power of two");
        assert!(config.block_size <= config.capacity, "descriptor block size is larger than capacity");

        let backend = queue.backend().clone();
        let desc = GfxDescriptorHeapDesc {
            kind,
            capacity: config.capacity,
            shader_visible,
            debug_name: debug_name.into(),
        };
        let heap = backend.create_descriptor_heap(&desc)?;
        let tracking_fence = if shader_visible {
            Some(GfxFence::new(backend.clone(), 0, format!("{}-tracking", desc.debug_name))?)
        } else {
            None
        };

        log::info!(
            "create descriptor heap {}: capacity {}, block size {}, shader visible: {}",
            desc.debug_name,
            config.capacity,
            config.block_size,
            shader_visible
        );

        Ok(Self {
            shared: Arc::new(DescriptorHeapShared {
                backend,
                queue,
                heap,
                block_size: config.block_size,
                tracking_fence,
                state: Mutex::new(DescriptorAllocatorState {
                    free_list: SegregatedFreeList::new(config.block_size),
                    bump_cursor: 0,
                    free_count: config.capacity as u64,
                    pending: Vec::new(),
                    oversized_free: Vec::new(),
                    tracking_next_value: 1,
                }),
                desc,
            }),
        })
    }
}
// getters
impl DescriptorAllocator {
    #[inline]
    pub fn heap_info(&self) -> &GfxDescriptorHeapInfo {
        &self.shared.heap
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.shared.desc.capacity
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.shared.block_size
    }

    #[inline]
    pub fn is_shader_visible(&self) -> bool {
        self.shared.desc.shader_visible
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.shared.desc.debug_name
    }

    /// 只有 shader visible 的 heap 才有
    #[inline]
    pub fn tracking_fence(&self) -> Option<&GfxFence> {
        self.shared.tracking_fence.as_ref()
    }

    #[inline]
    pub fn stats(&self) -> DescriptorAllocatorStats {
        self.shared.stats()
    }
}
// allocate & release
impl DescriptorAllocator {
    /// 分配 `count` 个连续的 slot
    ///
    /// # Panics
    /// - `count` 为 0 或者超过 heap 的容量
    /// - heap 已经耗尽，且没有可以回收的 slot
    pub fn allocate(&self, count: u32) -> DescriptorTable {
        let _span = tracy_client::span!("DescriptorAllocator::allocate");
        let shared = &self.shared;
        assert!(count > 0, "allocate 0 descriptors from heap {}", shared.desc.debug_name);
        assert!(
            count <= shared.desc.capacity,
            "allocate {} descriptors from heap {} of capacity {}",
            count,
            shared.desc.debug_name,
            shared.desc.capacity
        );

        let (offset, granted, node) =
            if count > shared.block_size { shared.allocate_oversized(count) } else { shared.allocate_from_class(count) };
        DescriptorTable::new(shared.clone(), offset, count, granted, node)
    }

    /// 等价于 drop，额外检查 table 来自这个 heap
    pub fn release(&self, table: DescriptorTable) {
        assert!(
            table.heap().is_none_or(|heap| Arc::ptr_eq(heap, &self.shared)),
            "descriptor table released to foreign heap {}",
            self.shared.desc.debug_name
        );
        drop(table);
    }

    /// 每帧调用一次：signal 追踪 fence，把已经完成的待回收记录挂回空闲链表
    pub fn recycle(&self) -> GfxResult<()> {
        let _span = tracy_client::span!("DescriptorAllocator::recycle");
        let shared = &self.shared;

        let signal_value = {
            let mut state = shared.state.lock();
            let value = state.tracking_next_value;
            state.tracking_next_value += 1;
            value
        };
        let completed_value = match &shared.tracking_fence {
            Some(fence) => {
                shared.queue.signal(fence, signal_value)?;
                fence.completed_value()?
            }
            // CPU-only 的 heap 不会被 GPU 读取
            None => u64::MAX,
        };

        let reclaimed = shared.state.lock().reclaim(completed_value, shared.block_size);
        log::debug!(
            "recycle descriptor heap {}: reclaimed {} slots, {:?}",
            shared.desc.debug_name,
            reclaimed,
            shared.stats()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use fenceline_gfx::{
        backends::null::{NullBackend, NullCompletionMode},
        foundation::queue_kind::GfxQueueKind,
    };
    use proptest::prelude::*;

    use super::*;

    struct Fixture {
        null: Arc<NullBackend>,
        allocator: DescriptorAllocator,
    }

    fn fixture(mode: NullCompletionMode, capacity: u32, block_size: u32, shader_visible: bool) -> Fixture {
        let null = Arc::new(NullBackend::new(mode));
        let queue = Arc::new(GfxExecutionQueue::new(null.clone(), GfxQueueKind::Graphics).unwrap());
        let allocator = DescriptorAllocator::new(
            queue,
            GfxDescriptorKind::SampledImage,
            &DescriptorHeapConfig { capacity, block_size },
            shader_visible,
            "test-heap",
        )
        .unwrap();
        Fixture { null, allocator }
    }

    #[test]
    fn test_scenario_block_4_capacity_16() {
        let f = fixture(NullCompletionMode::Immediate, 16, 4, true);
        let a = f.allocator.allocate(2);
        let b = f.allocator.allocate(2);
        assert_eq!(f.allocator.stats().bump_cursor, 4);

        // 第一个 block 已经用完，切出第二个 block
        let c = f.allocator.allocate(2);
        assert_eq!(f.allocator.stats().bump_cursor, 8);
        assert_eq!((a.offset(), b.offset(), c.offset()), (0, 2, 4));

        let a_offset = a.offset();
        drop(a);
        // 还在等待 fence，不能复用
        let d = f.allocator.allocate(2);
        assert_ne!(d.offset(), a_offset);

        f.allocator.recycle().unwrap();
        let e = f.allocator.allocate(2);
        assert_eq!(e.offset(), a_offset);
        assert_eq!(f.allocator.stats().bump_cursor, 8);
    }

    #[test]
    fn test_round_trip_restores_free_count() {
        let f = fixture(NullCompletionMode::Immediate, 64, 8, true);
        let before = f.allocator.stats();

        let table = f.allocator.allocate(3);
        assert_eq!(table.granted_count(), 4);
        assert_eq!(f.allocator.stats().free_count, before.free_count - 4);
        let offset = table.offset();
        f.allocator.release(table);
        f.allocator.recycle().unwrap();
        let after_recycle = f.allocator.stats();
        assert_eq!(after_recycle.free_count, before.free_count);
        assert_eq!(after_recycle.pending_count, 0);

        let again = f.allocator.allocate(4);
        assert_eq!(again.offset(), offset);
        // 复用了原来的节点，节点数组没有增长
        assert_eq!(f.allocator.stats().node_count, after_recycle.node_count);
    }

    #[test]
    fn test_no_reuse_until_fence_completes() {
        let f = fixture(NullCompletionMode::Manual, 8, 4, true);
        let a = f.allocator.allocate(4);
        let a_offset = a.offset();
        drop(a);

        f.allocator.recycle().unwrap();
        assert_eq!(f.allocator.stats().pending_count, 4);
        let b = f.allocator.allocate(4);
        assert_ne!(b.offset(), a_offset);

        f.null.complete_all();
        f.allocator.recycle().unwrap();
        let c = f.allocator.allocate(4);
        assert_eq!(c.offset(), a_offset);
    }

    #[test]
    fn test_cpu_heap_reclaims_without_gpu() {
        let f = fixture(NullCompletionMode::Manual, 8, 4, false);
        assert!(f.allocator.tracking_fence().is_none());
        assert!(f.allocator.heap_info().gpu_base.is_none());

        let a = f.allocator.allocate(4);
        let a_offset = a.offset();
        drop(a);
        f.allocator.recycle().unwrap();
        assert_eq!(f.allocator.allocate(4).offset(), a_offset);
    }

    #[test]
    fn test_handles_follow_increment() {
        let f = fixture(NullCompletionMode::Immediate, 64, 8, true);
        let _first = f.allocator.allocate(8);
        let table = f.allocator.allocate(3);
        let info = *f.allocator.heap_info();

        assert_eq!(table.cpu_handle(0), info.cpu_base + table.offset() as u64 * info.increment as u64);
        assert_eq!(table.cpu_handle(2) - table.cpu_handle(1), info.increment as u64);
        assert_eq!(
            table.gpu_handle(1),
            info.gpu_base.map(|base| base + (table.offset() + 1) as u64 * info.increment as u64)
        );
    }

    #[test]
    fn test_take_leaves_empty_table() {
        let f = fixture(NullCompletionMode::Immediate, 16, 4, true);
        let mut table = f.allocator.allocate(2);
        let moved = table.take();
        assert!(table.is_empty());
        assert_eq!(moved.count(), 2);

        drop(table);
        assert_eq!(f.allocator.stats().pending_count, 0);
        drop(moved);
        assert_eq!(f.allocator.stats().pending_count, 2);
    }

    #[test]
    fn test_oversized_block_feeds_size_classes() {
        let f = fixture(NullCompletionMode::Immediate, 16, 4, true);
        let big = f.allocator.allocate(10);
        let _tail = f.allocator.allocate(4);
        assert_eq!(f.allocator.stats().bump_cursor, 14);

        drop(big);
        f.allocator.recycle().unwrap();
        assert_eq!(f.allocator.stats().oversized_free_blocks, 1);

        // heap 末尾只剩 2 个 slot，从回收的超大块中切 block：[0, 4) 给 class 0，剩下 6 个仍是超大块
        let one = f.allocator.allocate(1);
        assert_eq!(one.offset(), 0);
        assert_eq!(f.allocator.stats().oversized_free_blocks, 1);

        // 再切 [4, 8)，剩下的 2 个 slot 进入 class 1
        let four = f.allocator.allocate(4);
        assert_eq!(four.offset(), 4);
        assert_eq!(f.allocator.stats().oversized_free_blocks, 0);
        let two = f.allocator.allocate(2);
        assert_eq!(two.offset(), 8);
    }

    #[test]
    fn test_borrow_from_larger_class() {
        let f = fixture(NullCompletionMode::Immediate, 8, 4, true);
        let a = f.allocator.allocate(4);
        let _b = f.allocator.allocate(4);
        let a_offset = a.offset();
        drop(a);
        f.allocator.recycle().unwrap();

        let small = f.allocator.allocate(1);
        assert_eq!(small.offset(), a_offset);
        assert_eq!(small.granted_count(), 4);
        assert_eq!(f.allocator.stats().free_count, 0);

        drop(small);
        f.allocator.recycle().unwrap();
        assert_eq!(f.allocator.allocate(4).offset(), a_offset);
    }

    #[test]
    fn test_last_chance_reclaim_on_exhaustion() {
        let f = fixture(NullCompletionMode::Manual, 4, 4, true);
        let a = f.allocator.allocate(4);
        drop(a);
        f.allocator.recycle().unwrap();
        // recycle 时 fence 还没有完成，之后 GPU 才跑完
        f.null.complete_all();

        let b = f.allocator.allocate(4);
        assert_eq!(b.offset(), 0);
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn test_oversized_exhaustion_is_fatal() {
        let f = fixture(NullCompletionMode::Immediate, 16, 4, true);
        let mut tables = Vec::new();
        for _ in 0..3 {
            tables.push(f.allocator.allocate(5));
        }
        assert_eq!(f.allocator.stats().bump_cursor, 15);
        tables.push(f.allocator.allocate(5));
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn test_pending_slots_are_not_reused_on_exhaustion() {
        let f = fixture(NullCompletionMode::Manual, 4, 4, true);
        let a = f.allocator.allocate(4);
        drop(a);
        let _b = f.allocator.allocate(1);
    }

    #[test]
    #[should_panic(expected = "tracking fence of test-heap failed")]
    fn test_fence_query_failure_is_fatal() {
        let f = fixture(NullCompletionMode::Immediate, 8, 4, true);
        let a = f.allocator.allocate(4);
        let _b = f.allocator.allocate(4);
        drop(a);
        f.allocator.recycle().unwrap();

        // 模拟 device lost：class 0 为空，分配需要查询 fence
        let tracking = f.allocator.tracking_fence().unwrap().raw();
        f.null.destroy_fence(tracking);
        let _ = f.allocator.allocate(1);
    }

    #[test]
    #[should_panic(expected = "allocate 0 descriptors")]
    fn test_zero_count_is_fatal() {
        let f = fixture(NullCompletionMode::Immediate, 16, 4, true);
        let _ = f.allocator.allocate(0);
    }

    #[test]
    #[should_panic(expected = "of capacity")]
    fn test_over_capacity_is_fatal() {
        let f = fixture(NullCompletionMode::Immediate, 16, 4, true);
        let _ = f.allocator.allocate(17);
    }

    #[test]
    #[should_panic(expected = "foreign heap")]
    fn test_release_to_foreign_heap_is_fatal() {
        let f = fixture(NullCompletionMode::Immediate, 16, 4, true);
        let g = fixture(NullCompletionMode::Immediate, 16, 4, true);
        let table = f.allocator.allocate(1);
        g.allocator.release(table);
    }

    #[test]
    fn test_heap_outlives_allocator_while_tables_live() {
        let f = fixture(NullCompletionMode::Immediate, 16, 4, true);
        let table = f.allocator.allocate(2);
        let Fixture { null, allocator } = f;
        drop(allocator);
        assert_eq!(null.object_counts().descriptor_heaps, 1);
        drop(table);
        assert_eq!(null.object_counts().descriptor_heaps, 0);
    }

    #[derive(Clone, Debug)]
    enum DescriptorOp {
        Allocate(u32),
        Release(usize),
        Recycle,
        Complete,
    }

    fn descriptor_op() -> impl Strategy<Value = DescriptorOp> {
        prop_oneof![
            4 => (1u32..=8).prop_map(DescriptorOp::Allocate),
            3 => any::<usize>().prop_map(DescriptorOp::Release),
            2 => Just(DescriptorOp::Recycle),
            1 => Just(DescriptorOp::Complete),
        ]
    }

    fn overlaps(a: (u32, u32), b: (u32, u32)) -> bool {
        a.0 < b.0 + b.1 && b.0 < a.0 + a.1
    }

    proptest! {
        #[test]
        fn test_no_premature_descriptor_reuse(ops in prop::collection::vec(descriptor_op(), 1..60)) {
            let f = fixture(NullCompletionMode::Manual, 1024, 8, true);
            let tracking = f.allocator.tracking_fence().unwrap().raw();

            let mut live: Vec<DescriptorTable> = Vec::new();
            // (offset, granted) -> 释放时的 tracking value
            let mut pending: HashMap<(u32, u32), u64> = HashMap::new();
            let mut recycle_count = 0u64;

            for op in ops {
                match op {
                    DescriptorOp::Allocate(count) => {
                        let table = f.allocator.allocate(count);
                        let range = (table.offset(), table.granted_count());
                        prop_assert!(range.0 + range.1 <= 1024);
                        for other in &live {
                            prop_assert!(!overlaps(range, (other.offset(), other.granted_count())));
                        }

                        let completed = f.null.fence_completed_value(tracking).unwrap();
                        let reused: Vec<_> = pending.keys().copied().filter(|r| overlaps(range, *r)).collect();
                        for r in reused {
                            let fence_value = pending.remove(&r).unwrap();
                            prop_assert!(completed >= fence_value);
                        }
                        live.push(table);
                    }
                    DescriptorOp::Release(index) => {
                        if !live.is_empty() {
                            let table = live.swap_remove(index % live.len());
                            pending.insert((table.offset(), table.granted_count()), recycle_count + 1);
                            f.allocator.release(table);
                        }
                    }
                    DescriptorOp::Recycle => {
                        f.allocator.recycle().unwrap();
                        recycle_count += 1;
                    }
                    DescriptorOp::Complete => f.null.complete_all(),
                }
            }
        }
    }
}
