//! 帧边界
//!
//! [`GpuContext`] 持有 queue、descriptor 分配器和内存管理器，
//! 由调用者显式地创建和传递，不存在全局的单例。

use std::sync::Arc;

use fenceline_gfx::{
    GfxError, GfxResult,
    commands::execution_queue::GfxExecutionQueue,
    foundation::{backend::GfxBackend, queue_kind::GfxQueueKind},
    resources::descriptor_heap::GfxDescriptorKind,
};
use thiserror::Error;

use crate::{
    config::{ConfigError, GpuContextConfig},
    descriptor::descriptor_allocator::DescriptorAllocator,
    frame_counter::FrameCounter,
    memory::gpu_memory_manager::GpuMemoryManager,
    task_scheduler::GfxTaskScheduler,
};

#[derive(Debug, Error)]
pub enum GpuContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gfx(#[from] GfxError),
}

/// 一帧的使用方式：
/// 1. `begin_frame`
/// 2. 各个 worker 通过 `&GpuContext` 分配 descriptor、录制 upload、释放资源
/// 3. 提交这一帧的所有工作
/// 4. `recycle`，每帧恰好一次
pub struct GpuContext {
    // 字段的 drop 顺序：先是依赖 queue 的组件，最后是 queue 本身
    gpu_memory: GpuMemoryManager,
    shader_visible_descriptors: DescriptorAllocator,
    cpu_descriptors: DescriptorAllocator,

    graphics_queue: Arc<GfxExecutionQueue>,
    compute_queue: Option<Arc<GfxExecutionQueue>>,

    scheduler: Arc<dyn GfxTaskScheduler>,
    frame_counter: FrameCounter,
    config: GpuContextConfig,
}

// init & destroy
impl GpuContext {
    pub fn new(
        backend: Arc<dyn GfxBackend>,
        config: GpuContextConfig,
        scheduler: Arc<dyn GfxTaskScheduler>,
    ) -> Result<Self, GpuContextError> {
        let _span = tracy_client::span!("GpuContext::new");
        config.validate()?;

        if scheduler.worker_count() != config.worker_count {
            log::warn!(
                "scheduler has {} workers but config asks for {} upload batches",
                scheduler.worker_count(),
                config.worker_count
            );
        }

        let graphics_queue = Arc::new(GfxExecutionQueue::new(backend.clone(), GfxQueueKind::Graphics)?);
        let compute_queue = if config.enable_compute_queue && backend.has_queue(GfxQueueKind::Compute) {
            Some(Arc::new(GfxExecutionQueue::new(backend.clone(), GfxQueueKind::Compute)?))
        } else {
            if config.enable_compute_queue {
                log::warn!("backend {} has no compute queue, uploads go through the graphics queue", backend.name());
            }
            None
        };

        let shader_visible_descriptors = DescriptorAllocator::new(
            graphics_queue.clone(),
            GfxDescriptorKind::SampledImage,
            &config.shader_visible_heap,
            true,
            "shader-visible-descriptors",
        )?;
        let cpu_descriptors = DescriptorAllocator::new(
            graphics_queue.clone(),
            GfxDescriptorKind::SampledImage,
            &config.cpu_heap,
            false,
            "cpu-descriptors",
        )?;

        let mut queues = vec![graphics_queue.clone()];
        queues.extend(compute_queue.clone());
        let gpu_memory = GpuMemoryManager::new(&queues, scheduler.clone(), &config)?;

        log::info!("create GpuContext on backend {}: {} queues", backend.name(), queues.len());

        Ok(Self {
            gpu_memory,
            shader_visible_descriptors,
            cpu_descriptors,
            graphics_queue,
            compute_queue,
            scheduler,
            frame_counter: FrameCounter::default(),
            config,
        })
    }
}
impl Drop for GpuContext {
    fn drop(&mut self) {
        if let Err(e) = self.wait_for_idle() {
            log::error!("failed to wait for idle when dropping GpuContext: {}", e);
        }
        log::info!("destroy GpuContext at frame {}", self.frame_counter.frame_id());
    }
}
// getters
impl GpuContext {
    #[inline]
    pub fn graphics_queue(&self) -> &Arc<GfxExecutionQueue> {
        &self.graphics_queue
    }

    #[inline]
    pub fn compute_queue(&self) -> Option<&Arc<GfxExecutionQueue>> {
        self.compute_queue.as_ref()
    }

    /// 按照种类获取 queue；没有 compute queue 时返回 None
    pub fn queue(&self, kind: GfxQueueKind) -> Option<&Arc<GfxExecutionQueue>> {
        match kind {
            GfxQueueKind::Graphics => Some(&self.graphics_queue),
            GfxQueueKind::Compute => self.compute_queue.as_ref(),
        }
    }

    #[inline]
    pub fn shader_visible_descriptors(&self) -> &DescriptorAllocator {
        &self.shader_visible_descriptors
    }

    #[inline]
    pub fn cpu_descriptors(&self) -> &DescriptorAllocator {
        &self.cpu_descriptors
    }

    #[inline]
    pub fn gpu_memory(&self) -> &GpuMemoryManager {
        &self.gpu_memory
    }

    #[inline]
    pub fn scheduler(&self) -> &Arc<dyn GfxTaskScheduler> {
        &self.scheduler
    }

    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn config(&self) -> &GpuContextConfig {
        &self.config
    }
}
// frame
impl GpuContext {
    pub fn begin_frame(&mut self) {
        self.frame_counter.next_frame();
        self.gpu_memory.begin_frame();
    }

    /// 这一帧的所有工作提交之后调用
    pub fn recycle(&self) -> GfxResult<()> {
        let _span = tracy_client::span!("GpuContext::recycle");
        self.shader_visible_descriptors.recycle()?;
        self.cpu_descriptors.recycle()?;
        self.gpu_memory.recycle()?;

        log::debug!("{} recycle done", self.frame_counter.frame_name());
        tracy_client::frame_mark();
        Ok(())
    }

    /// 阻塞直到所有 queue 都执行完，后台的销毁任务也执行完
    pub fn wait_for_idle(&self) -> GfxResult<()> {
        let _span = tracy_client::span!("GpuContext::wait_for_idle");
        self.graphics_queue.wait_for_idle()?;
        if let Some(compute_queue) = &self.compute_queue {
            compute_queue.wait_for_idle()?;
        }
        self.scheduler.wait_idle();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fenceline_gfx::{
        backends::null::{NullBackend, NullCompletionMode, NullObjectCounts},
        foundation::queue_kind::GfxQueueMask,
        resources::buffer::{GfxBufferDesc, GfxBufferUsage},
    };

    use super::*;
    use crate::{config::DescriptorHeapConfig, task_scheduler::InlineTaskScheduler};

    fn small_config() -> GpuContextConfig {
        GpuContextConfig {
            shader_visible_heap: DescriptorHeapConfig {
                capacity: 64,
                block_size: 8,
            },
            cpu_heap: DescriptorHeapConfig {
                capacity: 16,
                block_size: 4,
            },
            upload_arena_size: 4096,
            upload_arena_max_allocations: 64,
            worker_count: 2,
            enable_compute_queue: true,
        }
    }

    fn context(null: &Arc<NullBackend>, config: GpuContextConfig) -> GpuContext {
        GpuContext::new(null.clone(), config, Arc::new(InlineTaskScheduler::new(2))).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let null = Arc::new(NullBackend::new(NullCompletionMode::Immediate));
        let mut config = small_config();
        config.worker_count = 0;
        let result = GpuContext::new(null.clone(), config, Arc::new(InlineTaskScheduler::new(1)));
        assert!(matches!(result, Err(GpuContextError::Config(_))));
        assert_eq!(null.object_counts(), NullObjectCounts::default());
    }

    #[test]
    fn test_compute_queue_is_optional() {
        let null = Arc::new(NullBackend::with_queues(NullCompletionMode::Immediate, false));
        let ctx = context(&null, small_config());
        assert!(ctx.compute_queue().is_none());
        assert!(ctx.queue(GfxQueueKind::Compute).is_none());
        assert_eq!(ctx.gpu_memory().upload_queue(), GfxQueueKind::Graphics);
    }

    #[test]
    fn test_frame_loop_reuses_descriptors() {
        let null = Arc::new(NullBackend::new(NullCompletionMode::Immediate));
        let mut ctx = context(&null, small_config());

        let mut first_offset = None;
        for _ in 0..3 {
            ctx.begin_frame();
            let table = ctx.shader_visible_descriptors().allocate(8);
            first_offset.get_or_insert(table.offset());
            drop(table);
            ctx.recycle().unwrap();
        }
        assert_eq!(ctx.frame_counter().frame_id(), 3);
        assert_eq!(ctx.shader_visible_descriptors().stats().pending_count, 0);
        assert_eq!(ctx.shader_visible_descriptors().stats().bump_cursor, 8);
        assert_eq!(first_offset, Some(0));
    }

    #[test]
    fn test_pending_slots_wait_for_graphics_queue() {
        let null = Arc::new(NullBackend::new(NullCompletionMode::Manual));
        let mut ctx = context(&null, small_config());

        ctx.begin_frame();
        drop(ctx.shader_visible_descriptors().allocate(8));
        drop(ctx.cpu_descriptors().allocate(4));
        ctx.recycle().unwrap();

        // CPU heap 不需要等待 GPU
        assert_eq!(ctx.cpu_descriptors().stats().pending_count, 0);
        assert_eq!(ctx.shader_visible_descriptors().stats().pending_count, 8);

        null.complete_all();
        ctx.begin_frame();
        ctx.recycle().unwrap();
        assert_eq!(ctx.shader_visible_descriptors().stats().pending_count, 0);
    }

    #[test]
    fn test_drop_releases_everything() {
        let null = Arc::new(NullBackend::new(NullCompletionMode::Manual));
        {
            let mut ctx = context(&null, small_config());
            ctx.begin_frame();
            let kept = ctx.shader_visible_descriptors().allocate(3);
            let dst = ctx
                .gpu_memory()
                .create_buffer(&GfxBufferDesc::device_local(64, GfxBufferUsage::STORAGE, "dst"))
                .unwrap();
            {
                let mut batch = ctx.gpu_memory().upload_batch(0);
                batch.begin();
                batch.upload_buffer(dst.raw(), 0, &[7; 16]).unwrap();
                batch.end().unwrap();
            }
            ctx.gpu_memory().release_buffer(dst, GfxQueueMask::GRAPHICS | GfxQueueMask::COMPUTE);
            ctx.recycle().unwrap();
            assert!(ctx.gpu_memory().stats().pending_releases > 0);
            drop(kept);
        }
        assert_eq!(null.object_counts(), NullObjectCounts::default());
    }
}
