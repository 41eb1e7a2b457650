//! 对硬件 queue 的封装
//!
//! - 发放严格递增的 fence value：第 n 次提交 signal 的值就是 n
//! - 池化 command context 和 command allocator：allocator 只有在它最后一次提交的 fence 完成之后才会被复用

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::{
    GfxError, GfxResult,
    commands::{
        command_allocator::{GfxCommandAllocator, PendingCommandAllocator},
        command_context::GfxCommandContext,
        fence::GfxFence,
    },
    foundation::{backend::GfxBackend, queue_kind::GfxQueueKind},
};

/// 一次提交的结果，依赖这次提交的 queue 可以通过 [`GfxExecutionQueue::gpu_wait`] 等待它
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxSubmission {
    pub queue: GfxQueueKind,
    pub fence_value: u64,
}

pub struct GfxExecutionQueue {
    backend: Arc<dyn GfxBackend>,
    kind: GfxQueueKind,

    fence: GfxFence,
    /// 下一次提交会 signal 的值，只在 `submit_lock` 内部修改
    next_fence_value: AtomicU64,
    /// 缓存的 completed value，只会向前推进
    last_completed_value: AtomicU64,
    /// signal 和 `next_fence_value` 自增必须是原子的
    submit_lock: Mutex<()>,

    /// 按照 fence value 升序的小顶堆
    pending_allocators: Mutex<BinaryHeap<Reverse<PendingCommandAllocator>>>,
    context_pool: SegQueue<GfxCommandContext>,
    created_context_count: AtomicU64,
}

// init & destroy
impl GfxExecutionQueue {
    pub fn new(backend: Arc<dyn GfxBackend>, kind: GfxQueueKind) -> GfxResult<Self> {
        if !backend.has_queue(kind) {
            return Err(GfxError::Backend(format!("backend {} has no {} queue", backend.name(), kind)));
        }
        let fence = GfxFence::new(backend.clone(), 0, format!("{}-queue-fence", kind.name()))?;
        log::info!("create {} execution queue on backend {}", kind, backend.name());

        Ok(Self {
            backend,
            kind,
            fence,
            next_fence_value: AtomicU64::new(1),
            last_completed_value: AtomicU64::new(0),
            submit_lock: Mutex::new(()),
            pending_allocators: Mutex::new(BinaryHeap::new()),
            context_pool: SegQueue::new(),
            created_context_count: AtomicU64::new(0),
        })
    }
}
impl Drop for GfxExecutionQueue {
    fn drop(&mut self) {
        // 确保 GPU 不再使用任何 allocator 之后再销毁它们
        if let Err(e) = self.wait_for_idle() {
            log::error!("failed to drain {} queue on drop: {}", self.kind, e);
        }
        log::info!(
            "destroy {} execution queue: {} contexts, {} allocators",
            self.kind,
            self.context_pool.len(),
            self.pending_allocators.get_mut().len()
        );
    }
}
// getters
impl GfxExecutionQueue {
    #[inline]
    pub fn kind(&self) -> GfxQueueKind {
        self.kind
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn GfxBackend> {
        &self.backend
    }

    #[inline]
    pub fn fence(&self) -> &GfxFence {
        &self.fence
    }

    /// 下一次提交会 signal 的值
    #[inline]
    pub fn next_fence_value(&self) -> u64 {
        self.next_fence_value.load(Ordering::Acquire)
    }

    /// 最近一次观察到的 completed value，不会访问驱动
    #[inline]
    pub fn cached_completed_value(&self) -> u64 {
        self.last_completed_value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn pending_allocator_count(&self) -> usize {
        self.pending_allocators.lock().len()
    }

    #[inline]
    pub fn pooled_context_count(&self) -> usize {
        self.context_pool.len()
    }
}
// fence
impl GfxExecutionQueue {
    /// 向驱动查询并刷新缓存的 completed value
    pub fn completed_value(&self) -> GfxResult<u64> {
        let completed = self.fence.completed_value()?;
        Ok(self.observe_completed(completed))
    }

    /// 只有缓存落后于 `value` 时才会访问驱动
    pub fn is_fence_complete(&self, value: u64) -> GfxResult<bool> {
        if value <= self.cached_completed_value() {
            return Ok(true);
        }
        Ok(value <= self.completed_value()?)
    }

    /// 阻塞等待 fence 到达 `value`，没有超时
    pub fn wait_for_fence_cpu(&self, value: u64) -> GfxResult<()> {
        if self.is_fence_complete(value)? {
            return Ok(());
        }
        debug_assert!(
            value < self.next_fence_value(),
            "wait for {} on {} queue which has never been signaled",
            value,
            self.kind
        );

        let _span = tracy_client::span!("GfxExecutionQueue::wait_for_fence_cpu");
        self.fence.wait(value)?;
        self.observe_completed(value);
        Ok(())
    }

    /// signal 一个新的值并等待，排空整个 queue
    pub fn wait_for_idle(&self) -> GfxResult<()> {
        let value = {
            let _guard = self.submit_lock.lock();
            let value = self.next_fence_value.load(Ordering::Acquire);
            self.backend.queue_signal(self.kind, self.fence.raw(), value)?;
            self.next_fence_value.store(value + 1, Ordering::Release);
            value
        };
        self.wait_for_fence_cpu(value)
    }

    /// 在 queue 上 signal 一个其他组件拥有的 fence
    ///
    /// 会排在这之前提交的所有工作之后
    pub fn signal(&self, fence: &GfxFence, value: u64) -> GfxResult<()> {
        let _guard = self.submit_lock.lock();
        self.backend.queue_signal(self.kind, fence.raw(), value)
    }

    /// 让之后提交到这个 queue 的工作在 GPU 上等待 `other` 到达 `value`
    pub fn gpu_wait(&self, other: &GfxExecutionQueue, value: u64) -> GfxResult<()> {
        let _guard = self.submit_lock.lock();
        self.backend.queue_wait(self.kind, other.fence.raw(), value)
    }

    #[inline]
    fn observe_completed(&self, completed: u64) -> u64 {
        let prev = self.last_completed_value.fetch_max(completed, Ordering::AcqRel);
        prev.max(completed)
    }
}
// allocator & context pool
impl GfxExecutionQueue {
    /// 优先复用 fence 已经完成的 allocator，否则创建新的
    ///
    /// 只检查堆顶：fence value 单调递增，释放顺序大致和提交顺序相同
    pub fn get_allocator(&self) -> GfxResult<GfxCommandAllocator> {
        let _span = tracy_client::span!("GfxExecutionQueue::get_allocator");

        // 查询 fence 时不持有锁
        let front = self.pending_allocators.lock().peek().map(|Reverse(pending)| pending.fence_value);
        let recycled = match front {
            Some(fence_value) if self.is_fence_complete(fence_value)? => {
                let completed = self.cached_completed_value();
                let mut pending = self.pending_allocators.lock();
                // 其他线程可能已经取走了，重新检查堆顶
                match pending.peek() {
                    Some(Reverse(front)) if front.fence_value <= completed => {
                        pending.pop().map(|Reverse(pending)| pending.allocator)
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        let allocator = match recycled {
            Some(allocator) => allocator,
            None => GfxCommandAllocator::new(
                self.backend.clone(),
                self.kind,
                &format!("{}-allocator", self.kind.name()),
            )?,
        };
        allocator.reset()?;
        Ok(allocator)
    }

    /// `allocator` 在 fence 到达 `fence_value` 之后才能被再次发放
    pub fn release_allocator(&self, allocator: GfxCommandAllocator, fence_value: u64) {
        debug_assert_eq!(allocator.queue(), self.kind);
        self.pending_allocators.lock().push(Reverse(PendingCommandAllocator { fence_value, allocator }));
    }

    /// 返回的 context 处于录制状态，并绑定了一个已经 reset 的 allocator
    pub fn get_command_context(&self) -> GfxResult<GfxCommandContext> {
        let _span = tracy_client::span!("GfxExecutionQueue::get_command_context");
        let allocator = self.get_allocator()?;
        match self.context_pool.pop() {
            Some(mut ctx) => {
                ctx.reset(allocator)?;
                Ok(ctx)
            }
            None => {
                let index = self.created_context_count.fetch_add(1, Ordering::Relaxed);
                GfxCommandContext::new(
                    self.backend.clone(),
                    self.kind,
                    allocator,
                    format!("{}-context-{}", self.kind.name(), index),
                )
            }
        }
    }

    /// 只能在 context 提交（allocator 已经分离）之后调用
    pub fn release_command_context(&self, ctx: GfxCommandContext) {
        assert!(
            ctx.allocator().is_none(),
            "command context {} released before submission",
            ctx.debug_name()
        );
        debug_assert_eq!(ctx.queue(), self.kind);
        self.context_pool.push(ctx);
    }
}
// submit
impl GfxExecutionQueue {
    /// close 并提交 context，返回这次提交 signal 的 fence value
    ///
    /// context 的 allocator 会被分离并等待这个 fence value
    pub fn submit(&self, ctx: &mut GfxCommandContext) -> GfxResult<u64> {
        let _span = tracy_client::span!("GfxExecutionQueue::submit");
        assert_eq!(ctx.queue(), self.kind, "command context {} submitted to wrong queue", ctx.debug_name());

        if !ctx.is_closed() {
            ctx.close()?;
        }
        let allocator = ctx
            .take_allocator()
            .unwrap_or_else(|| panic!("command context {} submitted without allocator", ctx.debug_name()));

        let fence_value = {
            let _guard = self.submit_lock.lock();
            self.backend.queue_execute(self.kind, &[ctx.raw()])?;
            let value = self.next_fence_value.load(Ordering::Acquire);
            self.backend.queue_signal(self.kind, self.fence.raw(), value)?;
            self.next_fence_value.store(value + 1, Ordering::Release);
            value
        };

        self.release_allocator(allocator, fence_value);
        Ok(fence_value)
    }

    /// 提交之后直接将 context 放回池中
    pub fn submit_and_release(&self, mut ctx: GfxCommandContext) -> GfxResult<u64> {
        let fence_value = self.submit(&mut ctx)?;
        self.release_command_context(ctx);
        Ok(fence_value)
    }
}
