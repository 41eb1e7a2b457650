//! 纯软件的 GPU
//!
//! - buffer 就是 host 内存，copy 命令在 `queue_execute` 时立即执行
//! - fence 就是两个计数器：`signaled`（已经排入队列的最大值）和 `completed`
//! - [`NullCompletionMode::Manual`] 下 GPU "不会自己前进"，测试通过
//!   [`NullBackend::complete_fence`] / [`NullBackend::complete_all`] 显式推进，
//!   用来验证各种延迟回收不会提前复用资源

use std::{
    collections::HashMap,
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use parking_lot::{Condvar, Mutex};

use crate::{
    GfxError, GfxResult,
    foundation::{
        backend::GfxBackend,
        handles::{
            MappedPtr, RawBuffer, RawCommandAllocator, RawCommandList, RawDescriptorHeap, RawFence, RawHeap,
            RawTexture,
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

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NullCompletionMode {
    /// signal 立即完成
    Immediate,
    /// 只有显式推进或者 CPU 等待时才会完成
    Manual,
}

/// 仍然存活的原生对象数量，用于检查泄漏
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NullObjectCounts {
    pub fences: usize,
    pub command_allocators: usize,
    pub command_lists: usize,
    pub buffers: usize,
    pub textures: usize,
    pub heaps: usize,
    pub descriptor_heaps: usize,
}

struct NullFence {
    completed: u64,
    signaled: u64,
    /// `fence_completed_value` 被调用的次数
    queries: u64,
    debug_name: String,
}

/// 地址稳定的 host 内存
struct NullMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: 独占的堆内存，读写区间由上层保证不相交
unsafe impl Send for NullMemory {}

impl NullMemory {
    fn zeroed(len: usize) -> Self {
        let boxed = vec![0u8; len.max(1)].into_boxed_slice();
        let len = boxed.len();
        let ptr = NonNull::from(Box::leak(boxed)).cast::<u8>();
        Self { ptr, len }
    }
}

impl Drop for NullMemory {
    fn drop(&mut self) {
        // SAFETY: ptr 和 len 来自 Box::leak
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len)));
        }
    }
}

struct NullBuffer {
    memory: NullMemory,
    size: u64,
    debug_name: String,
}

struct NullCommandAllocator {
    queue: GfxQueueKind,
    debug_name: String,
}

enum NullCommand {
    CopyBuffer {
        src: RawBuffer,
        src_offset: u64,
        dst: RawBuffer,
        dst_offset: u64,
        size: u64,
    },
}

struct NullCommandList {
    queue: GfxQueueKind,
    allocator: RawCommandAllocator,
    recording: bool,
    commands: Vec<NullCommand>,
    debug_name: String,
}

#[derive(Default)]
struct NullState {
    fences: HashMap<u64, NullFence>,
    command_allocators: HashMap<u64, NullCommandAllocator>,
    command_lists: HashMap<u64, NullCommandList>,
    buffers: HashMap<u64, NullBuffer>,
    textures: HashMap<u64, GfxTextureDesc>,
    heaps: HashMap<u64, GfxHeapDesc>,
    descriptor_heaps: HashMap<u64, GfxDescriptorHeapDesc>,

    executed_command_lists: u64,
}

pub struct NullBackend {
    mode: NullCompletionMode,
    has_compute_queue: bool,

    next_id: AtomicU64,
    /// 模拟显存耗尽：之后的资源创建全部失败
    fail_allocations: AtomicBool,

    state: Mutex<NullState>,
    fence_progress: Condvar,
}

// new & init
impl NullBackend {
    pub fn new(mode: NullCompletionMode) -> Self {
        Self::with_queues(mode, true)
    }

    pub fn with_queues(mode: NullCompletionMode, has_compute_queue: bool) -> Self {
        Self {
            mode,
            has_compute_queue,
            next_id: AtomicU64::new(1),
            fail_allocations: AtomicBool::new(false),
            state: Mutex::new(NullState::default()),
            fence_progress: Condvar::new(),
        }
    }

    #[inline]
    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn check_allocation(&self) -> GfxResult<()> {
        if self.fail_allocations.load(Ordering::Acquire) { Err(GfxError::OutOfDeviceMemory) } else { Ok(()) }
    }
}
impl Drop for NullBackend {
    fn drop(&mut self) {
        let counts = self.object_counts();
        if counts != NullObjectCounts::default() {
            log::warn!("NullBackend dropped with live objects: {:?}", counts);
        }
    }
}
// 测试用的控制接口
impl NullBackend {
    /// 模拟 GPU 执行到 `value`，不会超过已经 signal 的值
    pub fn complete_fence(&self, fence: RawFence, value: u64) {
        let mut state = self.state.lock();
        if let Some(fence) = state.fences.get_mut(&fence.as_raw()) {
            fence.completed = fence.completed.max(value.min(fence.signaled));
        }
        self.fence_progress.notify_all();
    }

    /// 模拟 GPU 执行完所有已经提交的工作
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        for fence in state.fences.values_mut() {
            fence.completed = fence.signaled;
        }
        self.fence_progress.notify_all();
    }

    pub fn signaled_value(&self, fence: RawFence) -> Option<u64> {
        self.state.lock().fences.get(&fence.as_raw()).map(|f| f.signaled)
    }

    /// 向 fence 查询完成值的次数
    pub fn fence_query_count(&self, fence: RawFence) -> Option<u64> {
        self.state.lock().fences.get(&fence.as_raw()).map(|f| f.queries)
    }

    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::Release);
    }

    pub fn object_counts(&self) -> NullObjectCounts {
        let state = self.state.lock();
        NullObjectCounts {
            fences: state.fences.len(),
            command_allocators: state.command_allocators.len(),
            command_lists: state.command_lists.len(),
            buffers: state.buffers.len(),
            textures: state.textures.len(),
            heaps: state.heaps.len(),
            descriptor_heaps: state.descriptor_heaps.len(),
        }
    }

    pub fn executed_command_list_count(&self) -> u64 {
        self.state.lock().executed_command_lists
    }

    pub fn is_buffer_alive(&self, buffer: RawBuffer) -> bool {
        self.state.lock().buffers.contains_key(&buffer.as_raw())
    }

    pub fn is_texture_alive(&self, texture: RawTexture) -> bool {
        self.state.lock().textures.contains_key(&texture.as_raw())
    }

    /// 读回 buffer 的内容
    pub fn read_buffer(&self, buffer: RawBuffer, offset: u64, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        let buffer = state.buffers.get(&buffer.as_raw()).unwrap_or_else(|| panic!("invalid buffer {:?}", buffer));
        assert!(offset + len as u64 <= buffer.size, "read out of range of {}", buffer.debug_name);
        let mut out = vec![0u8; len];
        // SAFETY: 区间已经检查过
        unsafe {
            std::ptr::copy_nonoverlapping(buffer.memory.ptr.as_ptr().add(offset as usize), out.as_mut_ptr(), len);
        }
        out
    }
}
// 执行
impl NullBackend {
    fn execute_copy(
        state: &NullState,
        src: RawBuffer,
        src_offset: u64,
        dst: RawBuffer,
        dst_offset: u64,
        size: u64,
    ) -> GfxResult<()> {
        let src_buffer = state
            .buffers
            .get(&src.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("copy src {:?}", src)))?;
        let dst_buffer = state
            .buffers
            .get(&dst.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("copy dst {:?}", dst)))?;
        if src_offset + size > src_buffer.size || dst_offset + size > dst_buffer.size {
            return Err(GfxError::Backend(format!(
                "copy out of range: {}[{}..{}] -> {}[{}..{}]",
                src_buffer.debug_name,
                src_offset,
                src_offset + size,
                dst_buffer.debug_name,
                dst_offset,
                dst_offset + size
            )));
        }
        // SAFETY: 区间已经检查过；同一个 buffer 内部的 copy 可能重叠，使用 ptr::copy
        unsafe {
            std::ptr::copy(
                src_buffer.memory.ptr.as_ptr().add(src_offset as usize),
                dst_buffer.memory.ptr.as_ptr().add(dst_offset as usize),
                size as usize,
            );
        }
        Ok(())
    }
}

impl GfxBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn has_queue(&self, queue: GfxQueueKind) -> bool {
        match queue {
            GfxQueueKind::Graphics => true,
            GfxQueueKind::Compute => self.has_compute_queue,
        }
    }

    fn create_fence(&self, initial_value: u64, debug_name: &str) -> GfxResult<RawFence> {
        let id = self.alloc_id();
        self.state.lock().fences.insert(
            id,
            NullFence {
                completed: initial_value,
                signaled: initial_value,
                queries: 0,
                debug_name: debug_name.to_string(),
            },
        );
        Ok(RawFence::from_raw(id))
    }

    fn destroy_fence(&self, fence: RawFence) {
        self.state.lock().fences.remove(&fence.as_raw());
    }

    fn fence_completed_value(&self, fence: RawFence) -> GfxResult<u64> {
        let mut state = self.state.lock();
        let null_fence = state
            .fences
            .get_mut(&fence.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", fence)))?;
        null_fence.queries += 1;
        Ok(null_fence.completed)
    }

    fn wait_fence(&self, fence: RawFence, value: u64) -> GfxResult<()> {
        let mut state = self.state.lock();
        loop {
            let manual = self.mode == NullCompletionMode::Manual;
            let null_fence = state
                .fences
                .get_mut(&fence.as_raw())
                .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", fence)))?;
            if null_fence.completed >= value {
                return Ok(());
            }
            // 已经排入队列的工作总会完成：CPU 等待时直接让 GPU 跑到 value
            if manual && null_fence.signaled >= value {
                null_fence.completed = value;
                self.fence_progress.notify_all();
                return Ok(());
            }
            self.fence_progress.wait(&mut state);
        }
    }

    fn queue_signal(&self, queue: GfxQueueKind, fence: RawFence, value: u64) -> GfxResult<()> {
        debug_assert!(self.has_queue(queue));
        let mut state = self.state.lock();
        let null_fence = state
            .fences
            .get_mut(&fence.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", fence)))?;
        if value <= null_fence.signaled {
            return Err(GfxError::Backend(format!(
                "fence {} signaled with non-increasing value {} (last {})",
                null_fence.debug_name, value, null_fence.signaled
            )));
        }
        null_fence.signaled = value;
        if self.mode == NullCompletionMode::Immediate {
            null_fence.completed = value;
        }
        self.fence_progress.notify_all();
        Ok(())
    }

    fn queue_wait(&self, queue: GfxQueueKind, fence: RawFence, _value: u64) -> GfxResult<()> {
        debug_assert!(self.has_queue(queue));
        // 软件 GPU 按提交顺序立即执行，不需要真正的跨队列等待
        if self.state.lock().fences.contains_key(&fence.as_raw()) {
            Ok(())
        } else {
            Err(GfxError::InvalidHandle(format!("{:?}", fence)))
        }
    }

    fn queue_execute(&self, queue: GfxQueueKind, command_lists: &[RawCommandList]) -> GfxResult<()> {
        let mut state = self.state.lock();
        for list in command_lists {
            let null_list = state
                .command_lists
                .get(&list.as_raw())
                .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", list)))?;
            if null_list.recording {
                return Err(GfxError::Backend(format!("command list {} is not closed", null_list.debug_name)));
            }
            if null_list.queue != queue {
                return Err(GfxError::Backend(format!(
                    "command list {} recorded for {} submitted to {}",
                    null_list.debug_name, null_list.queue, queue
                )));
            }
            for command in &null_list.commands {
                match *command {
                    NullCommand::CopyBuffer {
                        src,
                        src_offset,
                        dst,
                        dst_offset,
                        size,
                    } => Self::execute_copy(&state, src, src_offset, dst, dst_offset, size)?,
                }
            }
        }
        state.executed_command_lists += command_lists.len() as u64;
        Ok(())
    }

    fn create_command_allocator(&self, queue: GfxQueueKind, debug_name: &str) -> GfxResult<RawCommandAllocator> {
        self.check_allocation()?;
        let id = self.alloc_id();
        self.state.lock().command_allocators.insert(
            id,
            NullCommandAllocator {
                queue,
                debug_name: debug_name.to_string(),
            },
        );
        Ok(RawCommandAllocator::from_raw(id))
    }

    fn reset_command_allocator(&self, allocator: RawCommandAllocator) -> GfxResult<()> {
        let state = self.state.lock();
        let null_allocator = state
            .command_allocators
            .get(&allocator.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", allocator)))?;
        // 和 D3D12 一样：还在录制的 command list 不允许 reset 它的 allocator
        if state.command_lists.values().any(|list| list.recording && list.allocator == allocator) {
            return Err(GfxError::Backend(format!(
                "command allocator {} reset while a command list is recording into it",
                null_allocator.debug_name
            )));
        }
        Ok(())
    }

    fn destroy_command_allocator(&self, allocator: RawCommandAllocator) {
        self.state.lock().command_allocators.remove(&allocator.as_raw());
    }

    fn create_command_list(
        &self,
        queue: GfxQueueKind,
        allocator: RawCommandAllocator,
        debug_name: &str,
    ) -> GfxResult<RawCommandList> {
        let id = self.alloc_id();
        let mut state = self.state.lock();
        let null_allocator = state
            .command_allocators
            .get(&allocator.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", allocator)))?;
        if null_allocator.queue != queue {
            return Err(GfxError::Backend(format!(
                "allocator {} belongs to {} queue",
                null_allocator.debug_name, null_allocator.queue
            )));
        }
        state.command_lists.insert(
            id,
            NullCommandList {
                queue,
                allocator,
                recording: true,
                commands: Vec::new(),
                debug_name: debug_name.to_string(),
            },
        );
        Ok(RawCommandList::from_raw(id))
    }

    fn reset_command_list(&self, command_list: RawCommandList, allocator: RawCommandAllocator) -> GfxResult<()> {
        let mut state = self.state.lock();
        if !state.command_allocators.contains_key(&allocator.as_raw()) {
            return Err(GfxError::InvalidHandle(format!("{:?}", allocator)));
        }
        let list = state
            .command_lists
            .get_mut(&command_list.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", command_list)))?;
        if list.recording {
            return Err(GfxError::Backend(format!("command list {} reset while recording", list.debug_name)));
        }
        list.allocator = allocator;
        list.recording = true;
        list.commands.clear();
        Ok(())
    }

    fn close_command_list(&self, command_list: RawCommandList) -> GfxResult<()> {
        let mut state = self.state.lock();
        let list = state
            .command_lists
            .get_mut(&command_list.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", command_list)))?;
        if !list.recording {
            return Err(GfxError::Backend(format!("command list {} closed twice", list.debug_name)));
        }
        list.recording = false;
        Ok(())
    }

    fn destroy_command_list(&self, command_list: RawCommandList) {
        self.state.lock().command_lists.remove(&command_list.as_raw());
    }

    fn cmd_copy_buffer(
        &self,
        command_list: RawCommandList,
        src: RawBuffer,
        src_offset: u64,
        dst: RawBuffer,
        dst_offset: u64,
        size: u64,
    ) -> GfxResult<()> {
        let mut state = self.state.lock();
        let list = state
            .command_lists
            .get_mut(&command_list.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", command_list)))?;
        if !list.recording {
            return Err(GfxError::Backend(format!("command list {} is not recording", list.debug_name)));
        }
        list.commands.push(NullCommand::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
        Ok(())
    }

    fn create_buffer(&self, desc: &GfxBufferDesc) -> GfxResult<GfxBufferAllocation> {
        self.check_allocation()?;
        let id = self.alloc_id();
        let memory = NullMemory::zeroed(desc.size as usize);
        let mapped = if desc.memory.is_host_visible() { MappedPtr::new(memory.ptr.as_ptr()) } else { None };
        self.state.lock().buffers.insert(
            id,
            NullBuffer {
                memory,
                size: desc.size,
                debug_name: desc.debug_name.clone(),
            },
        );
        Ok(GfxBufferAllocation {
            raw: RawBuffer::from_raw(id),
            mapped,
        })
    }

    fn destroy_buffer(&self, buffer: RawBuffer) {
        self.state.lock().buffers.remove(&buffer.as_raw());
    }

    fn create_texture(&self, desc: &GfxTextureDesc) -> GfxResult<RawTexture> {
        self.check_allocation()?;
        let id = self.alloc_id();
        self.state.lock().textures.insert(id, desc.clone());
        Ok(RawTexture::from_raw(id))
    }

    fn destroy_texture(&self, texture: RawTexture) {
        self.state.lock().textures.remove(&texture.as_raw());
    }

    fn create_heap(&self, desc: &GfxHeapDesc) -> GfxResult<RawHeap> {
        self.check_allocation()?;
        let id = self.alloc_id();
        self.state.lock().heaps.insert(id, desc.clone());
        Ok(RawHeap::from_raw(id))
    }

    fn destroy_heap(&self, heap: RawHeap) {
        self.state.lock().heaps.remove(&heap.as_raw());
    }

    fn create_descriptor_heap(&self, desc: &GfxDescriptorHeapDesc) -> GfxResult<GfxDescriptorHeapInfo> {
        self.check_allocation()?;
        let id = self.alloc_id();
        self.state.lock().descriptor_heaps.insert(id, desc.clone());
        // 伪造一组互不重叠的地址，方便测试从地址反推 slot
        let cpu_base = id << 32;
        Ok(GfxDescriptorHeapInfo {
            raw: RawDescriptorHeap::from_raw(id),
            cpu_base,
            gpu_base: desc.shader_visible.then_some((1 << 63) | cpu_base),
            increment: 32,
        })
    }

    fn destroy_descriptor_heap(&self, heap: RawDescriptorHeap) {
        self.state.lock().descriptor_heaps.remove(&heap.as_raw());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{GfxMemoryLocation, buffer::GfxBufferUsage};

    #[test]
    fn test_immediate_signal_completes() {
        let backend = NullBackend::new(NullCompletionMode::Immediate);
        let fence = backend.create_fence(0, "fence").unwrap();
        backend.queue_signal(GfxQueueKind::Graphics, fence, 1).unwrap();
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 1);
        backend.destroy_fence(fence);
    }

    #[test]
    fn test_manual_fence_only_moves_when_asked() {
        let backend = NullBackend::new(NullCompletionMode::Manual);
        let fence = backend.create_fence(0, "fence").unwrap();
        backend.queue_signal(GfxQueueKind::Graphics, fence, 1).unwrap();
        backend.queue_signal(GfxQueueKind::Graphics, fence, 2).unwrap();
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 0);

        // 不能超过已经 signal 的值
        backend.complete_fence(fence, 5);
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 2);

        backend.queue_signal(GfxQueueKind::Graphics, fence, 3).unwrap();
        backend.wait_fence(fence, 3).unwrap();
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 3);
        backend.destroy_fence(fence);
    }

    #[test]
    fn test_signal_must_increase() {
        let backend = NullBackend::new(NullCompletionMode::Manual);
        let fence = backend.create_fence(0, "fence").unwrap();
        backend.queue_signal(GfxQueueKind::Graphics, fence, 2).unwrap();
        assert!(backend.queue_signal(GfxQueueKind::Graphics, fence, 2).is_err());
        backend.destroy_fence(fence);
    }

    #[test]
    fn test_copy_executes_on_submit() {
        let backend = NullBackend::new(NullCompletionMode::Immediate);
        let src = backend
            .create_buffer(&GfxBufferDesc::upload(16, "src"))
            .unwrap();
        let dst = backend
            .create_buffer(&GfxBufferDesc {
                size: 16,
                usage: GfxBufferUsage::TRANSFER_DST,
                memory: GfxMemoryLocation::GpuOnly,
                debug_name: "dst".to_string(),
            })
            .unwrap();
        assert!(dst.mapped.is_none());
        unsafe {
            std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), src.mapped.unwrap().as_ptr().add(4), 4);
        }

        let allocator = backend.create_command_allocator(GfxQueueKind::Graphics, "alloc").unwrap();
        let list = backend.create_command_list(GfxQueueKind::Graphics, allocator, "list").unwrap();
        backend.cmd_copy_buffer(list, src.raw, 4, dst.raw, 8, 4).unwrap();

        // 未 close 的 list 不能提交
        assert!(backend.queue_execute(GfxQueueKind::Graphics, &[list]).is_err());
        backend.close_command_list(list).unwrap();
        backend.queue_execute(GfxQueueKind::Graphics, &[list]).unwrap();

        assert_eq!(backend.read_buffer(dst.raw, 8, 4), vec![1, 2, 3, 4]);
        assert_eq!(backend.executed_command_list_count(), 1);

        backend.destroy_command_list(list);
        backend.destroy_command_allocator(allocator);
        backend.destroy_buffer(src.raw);
        backend.destroy_buffer(dst.raw);
        assert_eq!(backend.object_counts(), NullObjectCounts::default());
    }

    #[test]
    fn test_reset_allocator_while_recording_fails() {
        let backend = NullBackend::new(NullCompletionMode::Immediate);
        let allocator = backend.create_command_allocator(GfxQueueKind::Graphics, "alloc").unwrap();
        let list = backend.create_command_list(GfxQueueKind::Graphics, allocator, "list").unwrap();
        assert!(backend.reset_command_allocator(allocator).is_err());

        backend.close_command_list(list).unwrap();
        backend.reset_command_allocator(allocator).unwrap();

        backend.destroy_command_list(list);
        backend.destroy_command_allocator(allocator);
    }

    #[test]
    fn test_fail_allocations() {
        let backend = NullBackend::new(NullCompletionMode::Immediate);
        backend.set_fail_allocations(true);
        assert!(matches!(
            backend.create_buffer(&GfxBufferDesc::upload(16, "oom")),
            Err(GfxError::OutOfDeviceMemory)
        ));
    }
}
