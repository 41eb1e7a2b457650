//! GPU 内存管理
//!
//! 两件事，同一种回收模式：
//! - 共享 upload arena 的子分配，以及每个 worker 的 upload batch
//! - buffer / texture / heap 的延迟销毁
//!
//! 释放时记录 manager 自己的追踪计数器，`recycle` 时在每个被追踪的 queue 上 signal 这个计数器，
//! 读取各个 queue 的完成值，把已经完成的记录拆成两类：
//! - arena 区间和单独的 upload buffer 在帧线程上立即释放
//! - 其他原生资源打包成一个后台任务交给调度器

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use fenceline_gfx::{
    GfxResult,
    commands::{execution_queue::GfxExecutionQueue, fence::GfxFence},
    foundation::{
        backend::GfxBackend,
        handles::{RawBuffer, RawTexture},
        queue_kind::{GfxQueueKind, GfxQueueMask},
    },
    resources::{
        buffer::{GfxBuffer, GfxBufferDesc},
        heap::{GfxHeap, GfxHeapDesc},
        texture::{GfxTexture, GfxTextureDesc},
    },
};
use parking_lot::{Mutex, MutexGuard, RwLock};
use slotmap::SlotMap;

use crate::{
    config::GpuContextConfig,
    memory::{
        handles::{GfxBufferHandle, GfxTextureHandle},
        pending_release::{PendingRelease, PendingResource},
        upload_arena::{UploadAllocation, UploadArena, UploadBacking},
        upload_batch::UploadBatch,
    },
    task_scheduler::GfxTaskScheduler,
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GpuMemoryStats {
    pub arena_free_bytes: u64,
    pub arena_largest_free_region: u64,
    pub pending_releases: usize,
    pub dedicated_fallbacks_this_frame: u64,
    pub uploaded_bytes_this_frame: u64,
}

/// manager 和所有 upload batch 共享的部分
pub(crate) struct GpuMemoryShared {
    backend: Arc<dyn GfxBackend>,
    arena: UploadArena,

    pending: Mutex<Vec<PendingRelease>>,
    /// 下一次 recycle 会 signal 的值
    tracking_next_value: AtomicU64,

    dedicated_fallbacks: AtomicU64,
    pub(crate) uploaded_bytes: AtomicU64,
}

impl GpuMemoryShared {
    pub(crate) fn get_upload_allocation(&self, size: u64, alignment: u64) -> GfxResult<UploadAllocation> {
        let _span = tracy_client::span!("GpuMemoryManager::get_upload_allocation");
        assert!(size > 0, "upload allocation of 0 bytes");
        assert!(alignment.is_power_of_two(), "upload alignment {} is not a power of two", alignment);

        if let Some(allocation) = self.arena.try_allocate(size, alignment) {
            return Ok(allocation);
        }

        let (free_bytes, largest) = self.arena.free_space();
        log::warn!(
            "upload arena cannot serve {} bytes (align {}, free {}, largest region {}), creating a dedicated buffer",
            size,
            alignment,
            free_bytes,
            largest
        );
        self.dedicated_fallbacks.fetch_add(1, Ordering::Relaxed);
        UploadAllocation::dedicated(&*self.backend, size)
    }

    pub(crate) fn release_upload(&self, allocation: UploadAllocation, queues: GfxQueueMask) {
        let resource = match allocation.into_backing() {
            UploadBacking::Arena(range) => PendingResource::ArenaRange(range),
            UploadBacking::Dedicated(buffer) => PendingResource::UploadBuffer(buffer),
        };
        self.defer(resource, queues);
    }

    /// mask 为空说明 GPU 没有使用过，直接释放
    fn defer(&self, resource: PendingResource, queues: GfxQueueMask) {
        if queues.is_empty() {
            self.destroy_now(resource);
            return;
        }
        let fence_value = self.tracking_next_value.load(Ordering::Acquire);
        self.pending.lock().push(PendingRelease {
            fence_value,
            queues,
            resource,
        });
    }

    fn destroy_now(&self, resource: PendingResource) {
        if let Some(range) = resource.destroy_native(&*self.backend) {
            self.arena.free(range);
        }
    }
}

/// 一个被追踪的 queue，以及 manager 在它上面 signal 的 fence
struct TrackedQueue {
    queue: Arc<GfxExecutionQueue>,
    fence: GfxFence,
}

#[derive(Default)]
struct PersistentResources {
    buffers: SlotMap<GfxBufferHandle, GfxBuffer>,
    textures: SlotMap<GfxTextureHandle, GfxTexture>,
    buffer_names: HashMap<String, GfxBufferHandle>,
    texture_names: HashMap<String, GfxTextureHandle>,
}

pub struct GpuMemoryManager {
    shared: Arc<GpuMemoryShared>,
    tracked: Vec<TrackedQueue>,
    scheduler: Arc<dyn GfxTaskScheduler>,

    /// 每个 worker 一个，只有对应的 worker 会访问
    ///
    /// 锁不会竞争，只用来通过 `&self` 拿到 `&mut UploadBatch`
    upload_batches: Vec<Mutex<UploadBatch>>,
    upload_queue: GfxQueueKind,

    /// 按名字查找，读多写少
    persistent: RwLock<PersistentResources>,
}

// init & destroy
impl GpuMemoryManager {
    /// `queues` 中第一个是 graphics queue；upload batch 优先使用 compute queue
    pub fn new(
        queues: &[Arc<GfxExecutionQueue>],
        scheduler: Arc<dyn GfxTaskScheduler>,
        config: &GpuContextConfig,
    ) -> GfxResult<Self> {
        assert!(!queues.is_empty(), "GpuMemoryManager needs at least one queue");
        let backend = queues[0].backend().clone();

        let tracked = queues
            .iter()
            .map(|queue| -> GfxResult<TrackedQueue> {
                let fence = GfxFence::new(backend.clone(), 0, format!("gpu-memory-tracking-{}", queue.kind().name()))?;
                Ok(TrackedQueue {
                    queue: queue.clone(),
                    fence,
                })
            })
            .collect::<GfxResult<Vec<_>>>()?;

        let shared = Arc::new(GpuMemoryShared {
            arena: UploadArena::new(backend.clone(), config.upload_arena_size, config.upload_arena_max_allocations)?,
            backend,
            pending: Mutex::new(Vec::new()),
            tracking_next_value: AtomicU64::new(1),
            dedicated_fallbacks: AtomicU64::new(0),
            uploaded_bytes: AtomicU64::new(0),
        });

        let upload_queue = queues
            .iter()
            .find(|queue| queue.kind() == GfxQueueKind::Compute)
            .unwrap_or(&queues[0])
            .clone();
        let upload_batches = (0..config.worker_count)
            .map(|worker_index| Mutex::new(UploadBatch::new(worker_index, shared.clone(), upload_queue.clone())))
            .collect();

        log::info!(
            "create GpuMemoryManager: {} tracked queues, {} upload batches on {} queue",
            tracked.len(),
            config.worker_count,
            upload_queue.kind()
        );

        Ok(Self {
            shared,
            tracked,
            scheduler,
            upload_batches,
            upload_queue: upload_queue.kind(),
            persistent: RwLock::new(PersistentResources::default()),
        })
    }
}
impl Drop for GpuMemoryManager {
    fn drop(&mut self) {
        let _span = tracy_client::span!("GpuMemoryManager::destroy_all");
        for tracked in &self.tracked {
            if let Err(e) = tracked.queue.wait_for_idle() {
                log::error!("failed to drain {} queue when dropping GpuMemoryManager: {}", tracked.queue.kind(), e);
            }
        }
        self.scheduler.wait_idle();

        // batch drop 时会释放没有提交的 upload 内存
        self.upload_batches.clear();

        let backend = self.shared.backend.clone();
        let persistent = self.persistent.get_mut();
        let persistent_count = persistent.buffers.len() + persistent.textures.len();
        for (_, buffer) in persistent.buffers.drain() {
            buffer.destroy(&*backend);
        }
        for (_, texture) in persistent.textures.drain() {
            texture.destroy(&*backend);
        }
        persistent.buffer_names.clear();
        persistent.texture_names.clear();

        let pending = std::mem::take(&mut *self.shared.pending.lock());
        let pending_count = pending.len();
        for record in pending {
            self.shared.destroy_now(record.resource);
        }

        log::info!(
            "destroy GpuMemoryManager: {} pending releases, {} persistent resources",
            pending_count,
            persistent_count
        );
    }
}
// getters
impl GpuMemoryManager {
    #[inline]
    pub fn backend(&self) -> &Arc<dyn GfxBackend> {
        &self.shared.backend
    }

    #[inline]
    pub fn upload_arena(&self) -> &UploadArena {
        &self.shared.arena
    }

    /// upload batch 提交到的 queue
    #[inline]
    pub fn upload_queue(&self) -> GfxQueueKind {
        self.upload_queue
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.upload_batches.len()
    }

    pub fn stats(&self) -> GpuMemoryStats {
        let (arena_free_bytes, arena_largest_free_region) = self.shared.arena.free_space();
        GpuMemoryStats {
            arena_free_bytes,
            arena_largest_free_region,
            pending_releases: self.shared.pending.lock().len(),
            dedicated_fallbacks_this_frame: self.shared.dedicated_fallbacks.load(Ordering::Relaxed),
            uploaded_bytes_this_frame: self.shared.uploaded_bytes.load(Ordering::Relaxed),
        }
    }
}
// upload
impl GpuMemoryManager {
    /// 从共享 arena 中分配，arena 无法满足时退化为单独的 buffer 并打印警告
    #[inline]
    pub fn get_upload_allocation(&self, size: u64, alignment: u64) -> GfxResult<UploadAllocation> {
        self.shared.get_upload_allocation(size, alignment)
    }

    /// `queues` 是可能还在读取这段内存的 queue
    #[inline]
    pub fn release_upload(&self, allocation: UploadAllocation, queues: GfxQueueMask) {
        self.shared.release_upload(allocation, queues);
    }

    /// 第 `worker_index` 个 worker 的 upload batch
    pub fn upload_batch(&self, worker_index: usize) -> MutexGuard<'_, UploadBatch> {
        assert!(
            worker_index < self.upload_batches.len(),
            "worker index {} out of {} upload batches",
            worker_index,
            self.upload_batches.len()
        );
        self.upload_batches[worker_index].lock()
    }
}
// resources
impl GpuMemoryManager {
    #[inline]
    pub fn create_buffer(&self, desc: &GfxBufferDesc) -> GfxResult<GfxBuffer> {
        GfxBuffer::new(&*self.shared.backend, desc)
    }

    #[inline]
    pub fn create_texture(&self, desc: &GfxTextureDesc) -> GfxResult<GfxTexture> {
        GfxTexture::new(&*self.shared.backend, desc)
    }

    #[inline]
    pub fn create_heap(&self, desc: &GfxHeapDesc) -> GfxResult<GfxHeap> {
        GfxHeap::new(&*self.shared.backend, desc)
    }

    /// `queues` 为空时立即销毁，否则等待这些 queue 完成当前已经提交的工作
    #[inline]
    pub fn release_buffer(&self, buffer: GfxBuffer, queues: GfxQueueMask) {
        self.shared.defer(PendingResource::Buffer(buffer), queues);
    }

    #[inline]
    pub fn release_texture(&self, texture: GfxTexture, queues: GfxQueueMask) {
        self.shared.defer(PendingResource::Texture(texture), queues);
    }

    #[inline]
    pub fn release_heap(&self, heap: GfxHeap, queues: GfxQueueMask) {
        self.shared.defer(PendingResource::Heap(heap), queues);
    }
}
// persistent resources
impl GpuMemoryManager {
    /// 按名字获取持久 buffer，不存在时创建
    pub fn get_or_create_persistent_buffer(&self, name: &str, desc: &GfxBufferDesc) -> GfxResult<GfxBufferHandle> {
        if let Some(&handle) = self.persistent.read().buffer_names.get(name) {
            return Ok(handle);
        }

        // 创建时不持有锁
        let buffer = self.create_buffer(desc)?;
        let mut persistent = self.persistent.write();
        if let Some(&handle) = persistent.buffer_names.get(name) {
            drop(persistent);
            buffer.destroy(&*self.shared.backend);
            return Ok(handle);
        }
        let handle = persistent.buffers.insert(buffer);
        persistent.buffer_names.insert(name.to_string(), handle);
        Ok(handle)
    }

    pub fn get_or_create_persistent_texture(&self, name: &str, desc: &GfxTextureDesc) -> GfxResult<GfxTextureHandle> {
        if let Some(&handle) = self.persistent.read().texture_names.get(name) {
            return Ok(handle);
        }

        let texture = self.create_texture(desc)?;
        let mut persistent = self.persistent.write();
        if let Some(&handle) = persistent.texture_names.get(name) {
            drop(persistent);
            texture.destroy(&*self.shared.backend);
            return Ok(handle);
        }
        let handle = persistent.textures.insert(texture);
        persistent.texture_names.insert(name.to_string(), handle);
        Ok(handle)
    }

    #[inline]
    pub fn persistent_buffer(&self, handle: GfxBufferHandle) -> Option<RawBuffer> {
        self.persistent.read().buffers.get(handle).map(|buffer| buffer.raw())
    }

    #[inline]
    pub fn persistent_texture(&self, handle: GfxTextureHandle) -> Option<RawTexture> {
        self.persistent.read().textures.get(handle).map(|texture| texture.raw())
    }

    /// 移除持久 buffer，走延迟销毁；句柄无效时返回 false
    pub fn release_persistent_buffer(&self, handle: GfxBufferHandle, queues: GfxQueueMask) -> bool {
        let buffer = {
            let mut persistent = self.persistent.write();
            let Some(buffer) = persistent.buffers.remove(handle) else {
                return false;
            };
            persistent.buffer_names.retain(|_, h| *h != handle);
            buffer
        };
        self.release_buffer(buffer, queues);
        true
    }

    pub fn release_persistent_texture(&self, handle: GfxTextureHandle, queues: GfxQueueMask) -> bool {
        let texture = {
            let mut persistent = self.persistent.write();
            let Some(texture) = persistent.textures.remove(handle) else {
                return false;
            };
            persistent.texture_names.retain(|_, h| *h != handle);
            texture
        };
        self.release_texture(texture, queues);
        true
    }
}
// frame
impl GpuMemoryManager {
    /// 重置每帧的统计
    pub fn begin_frame(&self) {
        self.shared.dedicated_fallbacks.store(0, Ordering::Relaxed);
        self.shared.uploaded_bytes.store(0, Ordering::Relaxed);
    }

    /// 每帧调用一次，在这一帧的所有提交之后
    pub fn recycle(&self) -> GfxResult<()> {
        let _span = tracy_client::span!("GpuMemoryManager::recycle");

        let signal_value = self.shared.tracking_next_value.fetch_add(1, Ordering::AcqRel);
        for tracked in &self.tracked {
            tracked.queue.signal(&tracked.fence, signal_value)?;
        }
        // 没有被追踪的 queue 视为已经完成
        let mut completed = [u64::MAX; 2];
        for tracked in &self.tracked {
            completed[tracked.queue.kind().index()] = tracked.fence.completed_value()?;
        }

        let finished: Vec<PendingRelease> = {
            let mut pending = self.shared.pending.lock();
            let (finished, in_flight): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *pending).into_iter().partition(|record| record.is_complete(&completed));
            *pending = in_flight;
            finished
        };

        let finished_count = finished.len();
        let mut background = Vec::new();
        for record in finished {
            match record.resource {
                PendingResource::ArenaRange(range) => self.shared.arena.free(range),
                PendingResource::UploadBuffer(buffer) => buffer.destroy(&*self.shared.backend),
                resource => background.push(resource),
            }
        }

        let background_count = background.len();
        if !background.is_empty() {
            let backend = self.shared.backend.clone();
            self.scheduler.submit_background(Box::new(move || {
                let _span = tracy_client::span!("GpuMemoryManager::background_deletion");
                for resource in background {
                    resource.destroy_native(&*backend);
                }
            }));
        }

        log::debug!(
            "recycle gpu memory: {} finished ({} in background), {:?}",
            finished_count,
            background_count,
            self.stats()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fenceline_gfx::{
        backends::null::{NullBackend, NullCompletionMode, NullObjectCounts},
        resources::{
            GfxMemoryLocation,
            buffer::GfxBufferUsage,
            texture::{GfxFormat, GfxTextureUsage},
        },
    };

    use super::*;
    use crate::task_scheduler::InlineTaskScheduler;

    struct Fixture {
        null: Arc<NullBackend>,
        graphics: Arc<GfxExecutionQueue>,
        compute: Arc<GfxExecutionQueue>,
        manager: GpuMemoryManager,
    }

    fn fixture(mode: NullCompletionMode, arena_size: u32) -> Fixture {
        fixture_with_max_allocations(mode, arena_size, 256)
    }

    fn fixture_with_max_allocations(mode: NullCompletionMode, arena_size: u32, max_allocations: u32) -> Fixture {
        let null = Arc::new(NullBackend::new(mode));
        let graphics = Arc::new(GfxExecutionQueue::new(null.clone(), GfxQueueKind::Graphics).unwrap());
        let compute = Arc::new(GfxExecutionQueue::new(null.clone(), GfxQueueKind::Compute).unwrap());
        let config = GpuContextConfig {
            upload_arena_size: arena_size,
            upload_arena_max_allocations: max_allocations,
            worker_count: 2,
            ..Default::default()
        };
        let manager = GpuMemoryManager::new(
            &[graphics.clone(), compute.clone()],
            Arc::new(InlineTaskScheduler::new(2)),
            &config,
        )
        .unwrap();
        Fixture {
            null,
            graphics,
            compute,
            manager,
        }
    }

    fn device_buffer(f: &Fixture, size: u64) -> GfxBuffer {
        f.manager
            .create_buffer(&GfxBufferDesc::device_local(size, GfxBufferUsage::STORAGE, "device"))
            .unwrap()
    }

    #[test]
    fn test_arena_range_waits_for_both_queues() {
        let f = fixture(NullCompletionMode::Manual, 1024);
        let allocation = f.manager.get_upload_allocation(512, 1).unwrap();
        assert!(!allocation.is_dedicated());
        let free_before_release = f.manager.stats().arena_free_bytes;

        f.manager.release_upload(allocation, GfxQueueMask::GRAPHICS | GfxQueueMask::COMPUTE);
        f.manager.recycle().unwrap();
        assert_eq!(f.manager.stats().pending_releases, 1);
        assert_eq!(f.null.signaled_value(f.manager.tracked[1].fence.raw()), Some(1));

        // 只有 graphics 完成了
        f.null.complete_fence(f.manager.tracked[0].fence.raw(), 1);
        f.manager.recycle().unwrap();
        assert_eq!(f.manager.stats().pending_releases, 1);
        assert_eq!(f.manager.stats().arena_free_bytes, free_before_release);

        f.null.complete_all();
        f.manager.recycle().unwrap();
        assert_eq!(f.manager.stats().pending_releases, 0);
        assert_eq!(f.manager.stats().arena_free_bytes, 1024);
    }

    #[test]
    fn test_dedicated_fallback_when_arena_too_small() {
        let f = fixture(NullCompletionMode::Immediate, 256);
        let allocation = f.manager.get_upload_allocation(1024, 16).unwrap();
        assert!(allocation.is_dedicated());
        assert_eq!(allocation.offset(), 0);
        assert_ne!(allocation.buffer(), f.manager.upload_arena().buffer());
        assert_eq!(f.manager.stats().dedicated_fallbacks_this_frame, 1);

        let buffers_before = f.null.object_counts().buffers;
        f.manager.release_upload(allocation, GfxQueueMask::GRAPHICS);
        f.manager.recycle().unwrap();
        assert_eq!(f.null.object_counts().buffers, buffers_before - 1);

        f.manager.begin_frame();
        assert_eq!(f.manager.stats().dedicated_fallbacks_this_frame, 0);
    }

    #[test]
    fn test_dedicated_fallback_when_arena_out_of_nodes() {
        let f = fixture_with_max_allocations(NullCompletionMode::Immediate, 4096, 4);
        let allocations: Vec<_> = (0..16).map(|_| f.manager.get_upload_allocation(16, 1).unwrap()).collect();

        // 空间足够，但是 arena 的分配记录用完了
        assert!(!allocations[0].is_dedicated());
        assert!(allocations.last().unwrap().is_dedicated());
        let dedicated = allocations.iter().filter(|a| a.is_dedicated()).count();
        assert!(dedicated > 0);
        assert_eq!(f.manager.stats().dedicated_fallbacks_this_frame, dedicated as u64);
        for allocation in allocations.iter().filter(|a| a.is_dedicated()) {
            assert_ne!(allocation.buffer(), f.manager.upload_arena().buffer());
        }

        for allocation in allocations {
            f.manager.release_upload(allocation, GfxQueueMask::GRAPHICS);
        }
        f.manager.recycle().unwrap();
        assert_eq!(f.manager.stats().pending_releases, 0);
        assert_eq!(f.manager.stats().arena_free_bytes, 4096);
    }

    #[test]
    fn test_release_with_empty_mask_destroys_immediately() {
        let f = fixture(NullCompletionMode::Manual, 1024);
        let buffer = device_buffer(&f, 64);
        let raw = buffer.raw();
        f.manager.release_buffer(buffer, GfxQueueMask::empty());
        assert!(!f.null.is_buffer_alive(raw));
        assert_eq!(f.manager.stats().pending_releases, 0);
    }

    #[test]
    fn test_resources_destroyed_after_fence() {
        let f = fixture(NullCompletionMode::Manual, 1024);
        let buffer = device_buffer(&f, 64);
        let buffer_raw = buffer.raw();
        let texture = f
            .manager
            .create_texture(&GfxTextureDesc::new_2d(4, 4, GfxFormat::Rgba8Unorm, GfxTextureUsage::SAMPLED, "tex"))
            .unwrap();
        let texture_raw = texture.raw();
        let heap = f
            .manager
            .create_heap(&GfxHeapDesc {
                size: 1 << 16,
                memory: GfxMemoryLocation::GpuOnly,
                debug_name: "heap".to_string(),
            })
            .unwrap();

        f.manager.release_buffer(buffer, GfxQueueMask::GRAPHICS);
        f.manager.release_texture(texture, GfxQueueMask::GRAPHICS);
        f.manager.release_heap(heap, GfxQueueMask::COMPUTE);

        f.manager.recycle().unwrap();
        assert!(f.null.is_buffer_alive(buffer_raw));
        assert!(f.null.is_texture_alive(texture_raw));

        f.null.complete_all();
        f.manager.recycle().unwrap();
        assert!(!f.null.is_buffer_alive(buffer_raw));
        assert!(!f.null.is_texture_alive(texture_raw));
        assert_eq!(f.null.object_counts().heaps, 0);
    }

    #[test]
    fn test_released_after_recycle_waits_for_next_signal() {
        let f = fixture(NullCompletionMode::Manual, 1024);
        f.manager.recycle().unwrap();
        f.null.complete_all();

        // 释放发生在第一次 signal 之后，需要等第二次 signal 完成
        let buffer = device_buffer(&f, 16);
        let raw = buffer.raw();
        f.manager.release_buffer(buffer, GfxQueueMask::GRAPHICS);
        f.manager.recycle().unwrap();
        assert!(f.null.is_buffer_alive(raw));

        f.null.complete_all();
        f.manager.recycle().unwrap();
        assert!(!f.null.is_buffer_alive(raw));
    }

    #[test]
    fn test_upload_batch_copies_on_end() {
        let f = fixture(NullCompletionMode::Immediate, 4096);
        let dst = device_buffer(&f, 64);

        let submission = {
            let mut batch = f.manager.upload_batch(1);
            assert_eq!(batch.queue_kind(), GfxQueueKind::Compute);
            batch.begin();
            batch.upload_buffer(dst.raw(), 8, &[1, 2, 3, 4]).unwrap();
            batch.upload_buffer(dst.raw(), 32, &[9; 8]).unwrap();
            assert_eq!(batch.uploaded_bytes(), 12);
            batch.end().unwrap()
        };

        let submission = submission.unwrap();
        assert_eq!(submission.queue, GfxQueueKind::Compute);
        assert_eq!(submission.fence_value, 1);
        assert_eq!(f.null.read_buffer(dst.raw(), 8, 4), vec![1, 2, 3, 4]);
        assert_eq!(f.null.read_buffer(dst.raw(), 32, 8), vec![9; 8]);

        // graphics 需要等 upload 完成才能读取 dst
        f.graphics.gpu_wait(&f.compute, submission.fence_value).unwrap();

        assert_eq!(f.manager.stats().pending_releases, 2);
        f.manager.recycle().unwrap();
        assert_eq!(f.manager.stats().pending_releases, 0);
        assert_eq!(f.manager.stats().arena_free_bytes, 4096);

        f.manager.release_buffer(dst, GfxQueueMask::GRAPHICS);
    }

    #[test]
    fn test_empty_batch_submits_nothing() {
        let f = fixture(NullCompletionMode::Immediate, 1024);
        let mut batch = f.manager.upload_batch(0);
        batch.begin();
        assert!(batch.end().unwrap().is_none());
        assert_eq!(f.compute.next_fence_value(), 1);
    }

    #[test]
    #[should_panic(expected = "out of 2 upload batches")]
    fn test_worker_index_out_of_range() {
        let f = fixture(NullCompletionMode::Immediate, 1024);
        let _batch = f.manager.upload_batch(2);
    }

    #[test]
    fn test_persistent_buffer_is_created_once() {
        let f = fixture(NullCompletionMode::Immediate, 1024);
        let desc = GfxBufferDesc::device_local(256, GfxBufferUsage::UNIFORM, "per-frame-constants");
        let a = f.manager.get_or_create_persistent_buffer("constants", &desc).unwrap();
        let b = f.manager.get_or_create_persistent_buffer("constants", &desc).unwrap();
        assert_eq!(a, b);
        let raw = f.manager.persistent_buffer(a).unwrap();

        assert!(f.manager.release_persistent_buffer(a, GfxQueueMask::GRAPHICS));
        assert!(f.manager.persistent_buffer(a).is_none());
        assert!(!f.manager.release_persistent_buffer(a, GfxQueueMask::GRAPHICS));

        f.manager.recycle().unwrap();
        assert!(!f.null.is_buffer_alive(raw));

        // 同名再次创建得到新的资源
        let c = f.manager.get_or_create_persistent_buffer("constants", &desc).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_persistent_texture_lookup() {
        let f = fixture(NullCompletionMode::Immediate, 1024);
        let desc = GfxTextureDesc::new_2d(8, 8, GfxFormat::Rgba16Float, GfxTextureUsage::STORAGE, "history");
        let handle = f.manager.get_or_create_persistent_texture("history", &desc).unwrap();
        assert!(f.manager.persistent_texture(handle).is_some());
        assert!(f.manager.release_persistent_texture(handle, GfxQueueMask::empty()));
        assert!(f.manager.persistent_texture(handle).is_none());
    }

    #[test]
    fn test_drop_destroys_everything() {
        let f = fixture(NullCompletionMode::Manual, 1024);
        let buffer = device_buffer(&f, 16);
        f.manager.release_buffer(buffer, GfxQueueMask::GRAPHICS);
        let upload = f.manager.get_upload_allocation(64, 1).unwrap();
        f.manager.release_upload(upload, GfxQueueMask::COMPUTE);
        f.manager
            .get_or_create_persistent_buffer("kept", &GfxBufferDesc::upload(32, "kept"))
            .unwrap();
        {
            let mut batch = f.manager.upload_batch(0);
            batch.begin();
            let allocation = batch.allocate(16, 1).unwrap();
            let dst = f.manager.create_buffer(&GfxBufferDesc::device_local(16, GfxBufferUsage::STORAGE, "dst")).unwrap();
            batch.record_copy(allocation, dst.raw(), 0).unwrap();
            f.manager.release_buffer(dst, GfxQueueMask::COMPUTE);
        }

        let Fixture {
            null,
            graphics,
            compute,
            manager,
        } = f;
        drop(manager);
        drop(graphics);
        drop(compute);
        assert_eq!(null.object_counts(), NullObjectCounts::default());
    }
}
