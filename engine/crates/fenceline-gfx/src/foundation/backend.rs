use crate::{
    GfxResult,
    foundation::{
        handles::{
            RawBuffer, RawCommandAllocator, RawCommandList, RawDescriptorHeap, RawFence, RawHeap, RawTexture,
        },
        queue_kind::GfxQueueKind,
    },
    resources::{
        buffer::{GfxBufferAllocation, GfxBufferDesc},
        descriptor_heap::{GfxDescriptorHeapDesc, GfxDescriptorHeapInfo},
        heap::GfxHeapDesc,
        texture::GfxTextureDesc,
    },
};

/// 图形 API 的最小抽象
///
/// 只包含资源生命周期系统需要的部分：fence、队列提交、命令对象的池化、
/// 原生资源的创建与销毁。draw/dispatch 的录制不在这里。
///
/// # 线程
/// 所有方法都可以被多个线程同时调用，后端自己负责原生对象的外部同步
/// （例如 `vkQueueSubmit` 对同一个 queue 需要互斥）。
///
/// # 错误
/// `create_*` 以及和队列相关的调用返回 [`GfxResult`]，调用者直接用 `?` 向上传递；
/// `destroy_*` 不会失败。
pub trait GfxBackend: Send + Sync {
    fn name(&self) -> &str;

    /// 当前设备是否有独立的 compute 队列
    fn has_queue(&self, queue: GfxQueueKind) -> bool;

    // fence ==========================================================
    fn create_fence(&self, initial_value: u64, debug_name: &str) -> GfxResult<RawFence>;
    fn destroy_fence(&self, fence: RawFence);
    /// GPU 已经完成的最大值
    fn fence_completed_value(&self, fence: RawFence) -> GfxResult<u64>;
    /// 阻塞当前线程直到 `completed >= value`，没有超时
    fn wait_fence(&self, fence: RawFence, value: u64) -> GfxResult<()>;

    // queue ==========================================================
    /// 在队列中排入一个 signal：之前提交的工作全部完成后，fence 变为 `value`
    fn queue_signal(&self, queue: GfxQueueKind, fence: RawFence, value: u64) -> GfxResult<()>;
    /// 在队列中排入一个 GPU 端的等待：之后提交的工作要等 fence 到达 `value`
    fn queue_wait(&self, queue: GfxQueueKind, fence: RawFence, value: u64) -> GfxResult<()>;
    fn queue_execute(&self, queue: GfxQueueKind, command_lists: &[RawCommandList]) -> GfxResult<()>;

    // command ========================================================
    fn create_command_allocator(&self, queue: GfxQueueKind, debug_name: &str) -> GfxResult<RawCommandAllocator>;
    /// 回收 allocator 的全部内存，调用者需要保证 GPU 不再使用它
    fn reset_command_allocator(&self, allocator: RawCommandAllocator) -> GfxResult<()>;
    fn destroy_command_allocator(&self, allocator: RawCommandAllocator);

    /// 创建 command list 并绑定到 allocator，返回时处于录制状态
    fn create_command_list(
        &self,
        queue: GfxQueueKind,
        allocator: RawCommandAllocator,
        debug_name: &str,
    ) -> GfxResult<RawCommandList>;
    /// 将已经 close 的 command list 重新绑定到 allocator 并进入录制状态
    fn reset_command_list(&self, command_list: RawCommandList, allocator: RawCommandAllocator) -> GfxResult<()>;
    fn close_command_list(&self, command_list: RawCommandList) -> GfxResult<()>;
    fn destroy_command_list(&self, command_list: RawCommandList);

    /// - command type: action
    /// - 支持的 queue：graphics，compute
    fn cmd_copy_buffer(
        &self,
        command_list: RawCommandList,
        src: RawBuffer,
        src_offset: u64,
        dst: RawBuffer,
        dst_offset: u64,
        size: u64,
    ) -> GfxResult<()>;

    // resources ======================================================
    fn create_buffer(&self, desc: &GfxBufferDesc) -> GfxResult<GfxBufferAllocation>;
    /// 如果 buffer 处于映射状态，会先 unmap
    fn destroy_buffer(&self, buffer: RawBuffer);

    fn create_texture(&self, desc: &GfxTextureDesc) -> GfxResult<RawTexture>;
    fn destroy_texture(&self, texture: RawTexture);

    fn create_heap(&self, desc: &GfxHeapDesc) -> GfxResult<RawHeap>;
    fn destroy_heap(&self, heap: RawHeap);

    fn create_descriptor_heap(&self, desc: &GfxDescriptorHeapDesc) -> GfxResult<GfxDescriptorHeapInfo>;
    fn destroy_descriptor_heap(&self, heap: RawDescriptorHeap);
}
