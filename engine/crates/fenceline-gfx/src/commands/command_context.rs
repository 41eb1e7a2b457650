use std::sync::Arc;

use crate::{
    GfxResult,
    commands::command_allocator::GfxCommandAllocator,
    foundation::{
        backend::GfxBackend,
        handles::{RawBuffer, RawCommandList},
        queue_kind::GfxQueueKind,
    },
};

/// 可以反复使用的录制上下文（command list）
///
/// 任意时刻最多绑定一个 [`GfxCommandAllocator`]：
/// - 提交时 allocator 被分离，交给 queue 等待 fence
/// - 再次使用前必须通过 [`GfxCommandContext::reset`] 绑定一个新的 allocator
///
/// context 本身在提交之后就可以立即复用，已经录制好的命令保存在 allocator 中
pub struct GfxCommandContext {
    backend: Arc<dyn GfxBackend>,
    raw: RawCommandList,
    queue: GfxQueueKind,

    allocator: Option<GfxCommandAllocator>,
    command_count: usize,
    closed: bool,

    debug_name: String,
}

// init & destroy
impl GfxCommandContext {
    /// 创建后处于录制状态
    pub fn new(
        backend: Arc<dyn GfxBackend>,
        queue: GfxQueueKind,
        allocator: GfxCommandAllocator,
        debug_name: impl Into<String>,
    ) -> GfxResult<Self> {
        let debug_name = debug_name.into();
        debug_assert_eq!(allocator.queue(), queue);
        let raw = backend.create_command_list(queue, allocator.raw(), &debug_name)?;
        Ok(Self {
            backend,
            raw,
            queue,
            allocator: Some(allocator),
            command_count: 0,
            closed: false,
            debug_name,
        })
    }
}
impl Drop for GfxCommandContext {
    fn drop(&mut self) {
        self.backend.destroy_command_list(self.raw);
    }
}
// getters
impl GfxCommandContext {
    #[inline]
    pub fn raw(&self) -> RawCommandList {
        self.raw
    }

    #[inline]
    pub fn queue(&self) -> GfxQueueKind {
        self.queue
    }

    #[inline]
    pub fn allocator(&self) -> Option<&GfxCommandAllocator> {
        self.allocator.as_ref()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    pub fn has_commands(&self) -> bool {
        self.command_count > 0
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}
// lifecycle
impl GfxCommandContext {
    /// 绑定新的 allocator，重新开始录制
    pub fn reset(&mut self, allocator: GfxCommandAllocator) -> GfxResult<()> {
        assert!(
            self.allocator.is_none(),
            "command context {} reset while still holding an allocator",
            self.debug_name
        );
        assert!(self.closed, "command context {} reset while recording", self.debug_name);
        debug_assert_eq!(allocator.queue(), self.queue);

        self.backend.reset_command_list(self.raw, allocator.raw())?;
        self.allocator = Some(allocator);
        self.command_count = 0;
        self.closed = false;
        Ok(())
    }

    pub fn close(&mut self) -> GfxResult<()> {
        assert!(!self.closed, "command context {} closed twice", self.debug_name);
        self.backend.close_command_list(self.raw)?;
        self.closed = true;
        Ok(())
    }

    /// 提交之后由 queue 调用，将 allocator 分离出来
    #[inline]
    pub fn take_allocator(&mut self) -> Option<GfxCommandAllocator> {
        self.allocator.take()
    }
}
// commands
impl GfxCommandContext {
    pub fn copy_buffer_region(
        &mut self,
        src: RawBuffer,
        src_offset: u64,
        dst: RawBuffer,
        dst_offset: u64,
        size: u64,
    ) -> GfxResult<()> {
        assert!(!self.closed, "record into closed command context {}", self.debug_name);
        self.backend.cmd_copy_buffer(self.raw, src, src_offset, dst, dst_offset, size)?;
        self.command_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::null::{NullBackend, NullCompletionMode};

    fn make_context(backend: &Arc<dyn GfxBackend>) -> GfxCommandContext {
        let allocator = GfxCommandAllocator::new(backend.clone(), GfxQueueKind::Graphics, "alloc").unwrap();
        GfxCommandContext::new(backend.clone(), GfxQueueKind::Graphics, allocator, "ctx").unwrap()
    }

    #[test]
    fn test_reset_requires_detached_allocator() {
        let backend: Arc<dyn GfxBackend> = Arc::new(NullBackend::new(NullCompletionMode::Immediate));
        let mut ctx = make_context(&backend);
        ctx.close().unwrap();

        let old = ctx.take_allocator().unwrap();
        let new = GfxCommandAllocator::new(backend.clone(), GfxQueueKind::Graphics, "alloc-2").unwrap();
        let new_raw = new.raw();
        ctx.reset(new).unwrap();

        assert!(!ctx.is_closed());
        assert!(!ctx.has_commands());
        assert_eq!(ctx.allocator().map(|a| a.raw()), Some(new_raw));
        drop(old);
    }

    #[test]
    #[should_panic(expected = "still holding an allocator")]
    fn test_reset_with_attached_allocator_panics() {
        let backend: Arc<dyn GfxBackend> = Arc::new(NullBackend::new(NullCompletionMode::Immediate));
        let mut ctx = make_context(&backend);
        ctx.close().unwrap();
        let another = GfxCommandAllocator::new(backend.clone(), GfxQueueKind::Graphics, "alloc-2").unwrap();
        let _ = ctx.reset(another);
    }

    #[test]
    fn test_drop_releases_native_objects() {
        let null = Arc::new(NullBackend::new(NullCompletionMode::Immediate));
        let backend: Arc<dyn GfxBackend> = null.clone();
        {
            let mut ctx = make_context(&backend);
            ctx.close().unwrap();
            assert_eq!(null.object_counts().command_lists, 1);
        }
        let counts = null.object_counts();
        assert_eq!(counts.command_lists, 0);
        assert_eq!(counts.command_allocators, 0);
    }
}
