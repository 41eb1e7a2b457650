//! 多个线程同时分配和释放 descriptor table，存活的 table 之间不能有重叠

use std::{collections::BTreeMap, sync::Arc, thread};

use fenceline_gfx::{
    backends::null::{NullBackend, NullCompletionMode},
    commands::execution_queue::GfxExecutionQueue,
    foundation::queue_kind::GfxQueueKind,
    resources::descriptor_heap::GfxDescriptorKind,
};
use fenceline_render_interface::{
    config::DescriptorHeapConfig,
    descriptor::{descriptor_allocator::DescriptorAllocator, descriptor_table::DescriptorTable},
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

const THREAD_COUNT: usize = 8;
const FRAME_COUNT: usize = 16;
const TABLES_PER_FRAME: usize = 24;

/// 所有存活 table 的区间 `offset -> end`
#[derive(Default)]
struct LiveRanges {
    ranges: BTreeMap<u32, u32>,
}

impl LiveRanges {
    fn insert(&mut self, table: &DescriptorTable) {
        let start = table.offset();
        let end = start + table.granted_count();
        if let Some((&prev_start, &prev_end)) = self.ranges.range(..=start).next_back() {
            assert!(prev_end <= start, "table {}..{} overlaps live {}..{}", start, end, prev_start, prev_end);
        }
        if let Some((&next_start, &next_end)) = self.ranges.range(start..).next() {
            assert!(end <= next_start, "table {}..{} overlaps live {}..{}", start, end, next_start, next_end);
        }
        self.ranges.insert(start, end);
    }

    fn remove(&mut self, table: &DescriptorTable) {
        assert!(self.ranges.remove(&table.offset()).is_some());
    }
}

#[test]
fn test_concurrent_tables_are_disjoint() {
    fenceline_crate_tools::init_log::init_log();

    let null = Arc::new(NullBackend::new(NullCompletionMode::Manual));
    let queue = Arc::new(GfxExecutionQueue::new(null.clone(), GfxQueueKind::Graphics).unwrap());
    let allocator = DescriptorAllocator::new(
        queue.clone(),
        GfxDescriptorKind::SampledImage,
        &DescriptorHeapConfig {
            capacity: 16 * 1024,
            block_size: 16,
        },
        true,
        "stress-descriptors",
    )
    .unwrap();
    let live = Mutex::new(LiveRanges::default());

    for frame in 0..FRAME_COUNT {
        thread::scope(|s| {
            for thread_index in 0..THREAD_COUNT {
                let allocator = &allocator;
                let live = &live;
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64((frame * THREAD_COUNT + thread_index) as u64);
                    let mut tables = Vec::with_capacity(TABLES_PER_FRAME);
                    for _ in 0..TABLES_PER_FRAME {
                        // 偶尔申请超过 block size 的 table
                        let count = if rng.gen_ratio(1, 16) {
                            rng.gen_range(17..41)
                        } else {
                            rng.gen_range(1..=16)
                        };
                        let table = allocator.allocate(count);
                        assert!(table.granted_count() >= count);
                        live.lock().insert(&table);
                        tables.push(table);
                    }
                    // 释放一半，另一半留到这一帧结束
                    for table in tables.drain(..TABLES_PER_FRAME / 2) {
                        live.lock().remove(&table);
                        allocator.release(table);
                    }
                    for table in tables {
                        live.lock().remove(&table);
                        drop(table);
                    }
                });
            }
        });

        allocator.recycle().unwrap();
        // 每隔一帧 GPU 才追上
        if frame % 2 == 1 {
            null.complete_all();
        }
    }

    null.complete_all();
    allocator.recycle().unwrap();
    allocator.recycle().unwrap();

    let stats = allocator.stats();
    assert_eq!(stats.pending_count, 0);
    assert_eq!(stats.free_count, stats.capacity as u64);
    assert!(live.lock().ranges.is_empty());
}

#[test]
fn test_tables_released_on_other_threads() {
    let null = Arc::new(NullBackend::new(NullCompletionMode::Immediate));
    let queue = Arc::new(GfxExecutionQueue::new(null.clone(), GfxQueueKind::Graphics).unwrap());
    let allocator = DescriptorAllocator::new(
        queue,
        GfxDescriptorKind::StorageBuffer,
        &DescriptorHeapConfig {
            capacity: 1024,
            block_size: 8,
        },
        false,
        "cross-thread-descriptors",
    )
    .unwrap();

    let tables: Vec<DescriptorTable> = (0..64).map(|i| allocator.allocate(1 + i % 8)).collect();
    let (left, right) = tables.split_at(32);
    let mut live = LiveRanges::default();
    for table in left.iter().chain(right) {
        live.insert(table);
    }

    // table 是 Send 的，可以在其他线程上 drop
    let mut tables = tables;
    let second_half = tables.split_off(32);
    thread::scope(|s| {
        s.spawn(move || drop(tables));
        s.spawn(move || drop(second_half));
    });

    allocator.recycle().unwrap();
    assert_eq!(allocator.stats().free_count, 1024);
    assert_eq!(allocator.stats().pending_count, 0);
}
