use std::sync::{Arc, atomic::Ordering};

use fenceline_gfx::{
    GfxResult,
    commands::{
        command_context::GfxCommandContext,
        execution_queue::{GfxExecutionQueue, GfxSubmission},
    },
    foundation::{
        handles::RawBuffer,
        queue_kind::{GfxQueueKind, GfxQueueMask},
    },
};

use crate::memory::{gpu_memory_manager::GpuMemoryShared, upload_arena::UploadAllocation};

/// 一个 worker 在一帧之内的 upload 工作
///
/// `begin` 和 `end` 之间积累 upload 内存和 copy 命令，`end` 时一次性提交。
/// 每个 worker 有自己的 batch，通过显式的 worker index 访问。
pub struct UploadBatch {
    worker_index: usize,
    shared: Arc<GpuMemoryShared>,
    queue: Arc<GfxExecutionQueue>,

    /// 第一次录制 copy 时才会申请
    ctx: Option<GfxCommandContext>,
    allocations: Vec<UploadAllocation>,
    recording: bool,
    uploaded_bytes: u64,
}

// init & destroy
impl UploadBatch {
    pub(crate) fn new(worker_index: usize, shared: Arc<GpuMemoryShared>, queue: Arc<GfxExecutionQueue>) -> Self {
        Self {
            worker_index,
            shared,
            queue,
            ctx: None,
            allocations: Vec::new(),
            recording: false,
            uploaded_bytes: 0,
        }
    }
}
impl Drop for UploadBatch {
    fn drop(&mut self) {
        if !self.allocations.is_empty() {
            log::warn!(
                "upload batch of worker {} dropped with {} unsubmitted uploads",
                self.worker_index,
                self.allocations.len()
            );
        }
        // 没有提交过，GPU 不会读取这些内存
        for allocation in self.allocations.drain(..) {
            self.shared.release_upload(allocation, GfxQueueMask::empty());
        }
    }
}
// getters
impl UploadBatch {
    #[inline]
    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    /// copy 命令提交到的 queue
    #[inline]
    pub fn queue_kind(&self) -> GfxQueueKind {
        self.queue.kind()
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// 当前 batch 中积累的字节数
    #[inline]
    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }
}
// lifecycle
impl UploadBatch {
    pub fn begin(&mut self) {
        assert!(!self.recording, "upload batch of worker {} begun twice", self.worker_index);
        self.recording = true;
        self.uploaded_bytes = 0;
    }

    /// 提交积累的 copy 命令；没有任何 copy 时返回 None
    ///
    /// batch 中的 upload 内存会等待这次提交完成之后再回收
    pub fn end(&mut self) -> GfxResult<Option<GfxSubmission>> {
        let _span = tracy_client::span!("UploadBatch::end");
        assert!(self.recording, "upload batch of worker {} ended without begin", self.worker_index);
        self.recording = false;

        let Some(ctx) = self.ctx.take() else {
            debug_assert!(self.allocations.is_empty());
            return Ok(None);
        };

        let result = self.queue.submit_and_release(ctx);
        let queues = GfxQueueMask::from(self.queue.kind());
        for allocation in self.allocations.drain(..) {
            self.shared.release_upload(allocation, queues);
        }
        let fence_value = result?;

        Ok(Some(GfxSubmission {
            queue: self.queue.kind(),
            fence_value,
        }))
    }
}
// upload
impl UploadBatch {
    /// 申请一段 upload 内存，写入之后通过 [`UploadBatch::record_copy`] 交还给 batch
    #[inline]
    pub fn allocate(&self, size: u64, alignment: u64) -> GfxResult<UploadAllocation> {
        self.shared.get_upload_allocation(size, alignment)
    }

    /// 录制从 `allocation` 到 `dst` 的 copy，batch 接管 `allocation`
    pub fn record_copy(&mut self, allocation: UploadAllocation, dst: RawBuffer, dst_offset: u64) -> GfxResult<()> {
        assert!(self.recording, "upload batch of worker {} is not recording", self.worker_index);

        let mut ctx = match self.ctx.take() {
            Some(ctx) => ctx,
            None => match self.queue.get_command_context() {
                Ok(ctx) => ctx,
                Err(e) => {
                    self.shared.release_upload(allocation, GfxQueueMask::empty());
                    return Err(e);
                }
            },
        };
        let result =
            ctx.copy_buffer_region(allocation.buffer(), allocation.offset(), dst, dst_offset, allocation.size());
        self.ctx = Some(ctx);
        if let Err(e) = result {
            self.shared.release_upload(allocation, GfxQueueMask::empty());
            return Err(e);
        }

        self.uploaded_bytes += allocation.size();
        self.shared.uploaded_bytes.fetch_add(allocation.size(), Ordering::Relaxed);
        self.allocations.push(allocation);
        Ok(())
    }

    /// 将 `data` 写入 upload 内存，并录制到 `dst[dst_offset..]` 的 copy
    pub fn upload_buffer(&mut self, dst: RawBuffer, dst_offset: u64, data: &[u8]) -> GfxResult<()> {
        let _span = tracy_client::span!("UploadBatch::upload_buffer");
        let mut allocation = self.allocate(data.len() as u64, 4)?;
        allocation.write(0, data);
        self.record_copy(allocation, dst, dst_offset)
    }
}
